//! Violation confirmation.
//!
//! The engine receives, once per processed frame, the tracks that are
//! missing required equipment. A track's violation is confirmed only when
//! its uninterrupted streak has lasted both `min_consecutive_frames` frames
//! and `debounce` of real time. A confirmed violation then passes through
//! duplicate suppression ([`ViolationHashes`]) and spatial suppression
//! ([`SuppressionGrid`]) before it fires.
//!
//! Time is injected on every call, so the engine does no I/O and never
//! reads a clock.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use ppewatch_common::config::AlertConfig;
use ppewatch_model::{BBox, GridCell, TrackState};

use crate::dedup::{ViolationHashes, ViolationKey};
use crate::grid::SuppressionGrid;

/// A track seen missing required equipment in the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub track_id: u64,
    pub bbox: BBox,
    pub missing: BTreeSet<String>,
}

impl Violation {
    /// The violation `track` represents, if it misses any `required` class.
    pub fn from_track(track: &TrackState, required: &[String]) -> Option<Self> {
        let missing = track.missing(required);
        if missing.is_empty() {
            return None;
        }
        Some(Self {
            track_id: track.track_id,
            bbox: track.bbox,
            missing,
        })
    }
}

/// What happened to a confirmed violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// New alert; side effects should run.
    Fired,
    /// The cell already had a recent alert.
    Suppressed,
    /// The same track and equipment set fired within the hash TTL.
    Duplicate,
}

/// A violation that met both confirmation thresholds on this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub track_id: u64,
    pub bbox: BBox,
    pub cell: GridCell,
    /// Missing equipment accumulated over the streak, sorted.
    pub missing: Vec<String>,
    pub frames: u32,
    /// Time since the streak started.
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Progress of a track towards confirmation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertStatus {
    /// Streak in progress.
    Pending {
        remaining_frames: u32,
        remaining: Duration,
    },
    /// Both thresholds met; decided on the next frame.
    Confirmed,
    /// Already decided for this streak.
    Alerted,
}

/// Per-track streak state.
#[derive(Debug, Clone)]
struct Accumulator {
    consecutive_frames: u32,
    streak_started: Instant,
    last_seen_frame: u64,
    missing: BTreeSet<String>,
    bbox: BBox,
    cell: GridCell,
    alerted: bool,
}

/// Thresholds the engine applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub min_consecutive_frames: u32,
    pub debounce: Duration,
}

/// Per-camera alert engine.
#[derive(Debug)]
pub struct AlertEngine {
    thresholds: Thresholds,
    frame: u64,
    tracks: HashMap<u64, Accumulator>,
    grid: SuppressionGrid,
    hashes: ViolationHashes,
}

impl AlertEngine {
    pub fn new(config: &AlertConfig, frame_width: u32, frame_height: u32) -> Self {
        Self {
            thresholds: Thresholds {
                min_consecutive_frames: config.min_consecutive_frames,
                debounce: config.debounce,
            },
            frame: 0,
            tracks: HashMap::new(),
            grid: SuppressionGrid::new(
                config.grid_size,
                frame_width,
                frame_height,
                config.suppression_reset,
            ),
            hashes: ViolationHashes::new(config.hash_ttl),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Number of frames processed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frame
    }

    /// Feed one frame's violations and return every violation decided on it.
    ///
    /// Tracks absent from `violations` are treated as compliant or lost and
    /// their streak is discarded.
    pub fn process(&mut self, violations: &[Violation], now: Instant) -> Vec<Confirmation> {
        self.frame += 1;
        let frame = self.frame;

        self.grid.expire(now);
        self.hashes.expire(now);

        for violation in violations {
            let cell = self.grid.cell_for(&violation.bbox);
            match self.tracks.get_mut(&violation.track_id) {
                Some(acc) if acc.last_seen_frame + 1 == frame => {
                    acc.consecutive_frames += 1;
                    acc.last_seen_frame = frame;
                    acc.missing.extend(violation.missing.iter().cloned());
                    acc.bbox = violation.bbox;
                    acc.cell = cell;
                }
                Some(acc) if acc.last_seen_frame == frame => {
                    // Same track listed twice in one frame.
                    acc.missing.extend(violation.missing.iter().cloned());
                }
                _ => {
                    tracing::debug!(
                        track_id = violation.track_id,
                        missing = ?violation.missing,
                        frame,
                        "Violation streak started"
                    );
                    self.tracks.insert(
                        violation.track_id,
                        Accumulator {
                            consecutive_frames: 1,
                            streak_started: now,
                            last_seen_frame: frame,
                            missing: violation.missing.clone(),
                            bbox: violation.bbox,
                            cell,
                            alerted: false,
                        },
                    );
                }
            }
            self.grid.renew(cell, now);
        }

        self.tracks.retain(|track_id, acc| {
            let seen = acc.last_seen_frame == frame;
            if !seen && !acc.alerted {
                tracing::debug!(
                    track_id,
                    frames = acc.consecutive_frames,
                    "Violation streak reset"
                );
            }
            seen
        });

        let mut decided: Vec<u64> = self
            .tracks
            .iter()
            .filter(|(_, acc)| !acc.alerted && self.thresholds.met(acc, now))
            .map(|(track_id, _)| *track_id)
            .collect();
        decided.sort_unstable();

        let mut confirmations = Vec::with_capacity(decided.len());
        for track_id in decided {
            if let Some(confirmation) = self.decide(track_id, now) {
                confirmations.push(confirmation);
            }
        }
        confirmations
    }

    fn decide(&mut self, track_id: u64, now: Instant) -> Option<Confirmation> {
        let acc = self.tracks.get_mut(&track_id)?;
        acc.alerted = true;

        let key = ViolationKey::new(track_id, acc.missing.clone());
        let outcome = if self.hashes.contains(&key, now) {
            Outcome::Duplicate
        } else if self.grid.is_active(acc.cell, now) {
            Outcome::Suppressed
        } else {
            self.hashes.mark(key, now);
            self.grid.activate(acc.cell, now);
            Outcome::Fired
        };

        let confirmation = Confirmation {
            track_id,
            bbox: acc.bbox,
            cell: acc.cell,
            missing: acc.missing.iter().cloned().collect(),
            frames: acc.consecutive_frames,
            duration: now.saturating_duration_since(acc.streak_started),
            outcome,
        };

        match outcome {
            Outcome::Fired => tracing::info!(
                track_id,
                cell = ?confirmation.cell,
                frames = confirmation.frames,
                duration_secs = confirmation.duration.as_secs_f64(),
                missing = ?confirmation.missing,
                "Violation confirmed, alert fired"
            ),
            Outcome::Suppressed => tracing::debug!(
                track_id,
                cell = ?confirmation.cell,
                "Violation confirmed in suppressed cell"
            ),
            Outcome::Duplicate => tracing::debug!(
                track_id,
                missing = ?confirmation.missing,
                "Violation confirmed but already alerted"
            ),
        }
        Some(confirmation)
    }

    /// Progress of `track_id` towards confirmation, if it has a streak.
    pub fn status(&self, track_id: u64, now: Instant) -> Option<AlertStatus> {
        let acc = self.tracks.get(&track_id)?;
        if acc.alerted {
            return Some(AlertStatus::Alerted);
        }
        if self.thresholds.met(acc, now) {
            return Some(AlertStatus::Confirmed);
        }
        let elapsed = now.saturating_duration_since(acc.streak_started);
        Some(AlertStatus::Pending {
            remaining_frames: self
                .thresholds
                .min_consecutive_frames
                .saturating_sub(acc.consecutive_frames),
            remaining: self.thresholds.debounce.saturating_sub(elapsed),
        })
    }

    /// Tracks with an open streak, sorted.
    pub fn tracked(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.tracks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cells currently suppressing alerts.
    pub fn suppressed_cells(&self, now: Instant) -> Vec<GridCell> {
        self.grid.active_cells(now)
    }
}

impl Thresholds {
    fn met(&self, acc: &Accumulator, now: Instant) -> bool {
        acc.consecutive_frames >= self.min_consecutive_frames
            && now.saturating_duration_since(acc.streak_started) >= self.debounce
    }
}
