//! Offline collaborators.
//!
//! These let the whole pipeline run without a camera or a model: frames
//! are blank buffers and detections are replayed from a recording.
//!
//! A recording is a JSONL file. Each line holds the detections of one
//! frame for one camera; lines starting with `#` are comments.
//!
//! ```text
//! {"camera_id":"gate","detections":{"persons":[...],"equipment":[...]}}
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ppewatch_common::config::CameraConfig;
use ppewatch_model::{Detections, FrameEnvelope, FramePayload, PpeStatus, TrackState};
use serde::Deserialize;

use crate::collaborators::{
    CameraFactory, CameraIo, Detector, DetectorFactory, FrameSource, Tracker,
};
use crate::error::{CaptureError, DetectorError};

#[derive(Debug, Deserialize)]
struct RecordedFrame {
    camera_id: String,
    #[serde(default)]
    detections: Detections,
}

/// Loads a [`ReplayDetector`] from a recording.
#[derive(Debug, Clone)]
pub struct ReplayDetectorFactory {
    path: PathBuf,
}

impl ReplayDetectorFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DetectorFactory for ReplayDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>, DetectorError> {
        Ok(Box::new(ReplayDetector::load(&self.path)?))
    }
}

/// Serves recorded detections per camera, looping when a camera's
/// recording runs out. Cameras without a recording see empty frames.
#[derive(Debug)]
pub struct ReplayDetector {
    name: String,
    frames: BTreeMap<String, Vec<Detections>>,
    cursors: BTreeMap<String, usize>,
}

impl ReplayDetector {
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DetectorError::load(format!("{}: {e}", path.display())))?;

        let mut frames: BTreeMap<String, Vec<Detections>> = BTreeMap::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let frame: RecordedFrame = serde_json::from_str(line).map_err(|e| {
                DetectorError::load(format!("{}:{}: {e}", path.display(), index + 1))
            })?;
            frames.entry(frame.camera_id).or_default().push(frame.detections);
        }

        tracing::info!(
            path = %path.display(),
            cameras = frames.len(),
            frames = frames.values().map(Vec::len).sum::<usize>(),
            "Replay recording loaded"
        );
        Ok(Self {
            name: format!("replay:{}", path.display()),
            frames,
            cursors: BTreeMap::new(),
        })
    }
}

impl Detector for ReplayDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&mut self, frame: &FrameEnvelope) -> Result<Detections, DetectorError> {
        let Some(recorded) = self.frames.get(&frame.camera_id) else {
            return Ok(Detections::default());
        };
        if recorded.is_empty() {
            return Ok(Detections::default());
        }
        let cursor = self.cursors.entry(frame.camera_id.clone()).or_insert(0);
        let detections = recorded[*cursor % recorded.len()].clone();
        *cursor = (*cursor + 1) % recorded.len();
        Ok(detections)
    }
}

/// Opens a [`SyntheticSource`] and a [`PassthroughTracker`] per camera.
#[derive(Debug, Clone)]
pub struct SyntheticCameraFactory {
    default_required: Vec<String>,
}

impl SyntheticCameraFactory {
    /// `default_required` applies to cameras without their own list.
    pub fn new(default_required: Vec<String>) -> Self {
        Self { default_required }
    }
}

#[async_trait::async_trait]
impl CameraFactory for SyntheticCameraFactory {
    async fn open(&self, camera: &CameraConfig) -> Result<CameraIo, CaptureError> {
        if camera.width == 0 || camera.height == 0 {
            return Err(CaptureError::Open {
                uri: camera.uri.clone(),
                message: format!("invalid resolution {}x{}", camera.width, camera.height),
            });
        }
        let required = camera
            .required_ppe
            .clone()
            .unwrap_or_else(|| self.default_required.clone());
        Ok(CameraIo {
            source: Box::new(SyntheticSource::new(camera.width, camera.height)),
            tracker: Box::new(PassthroughTracker::new(required)),
        })
    }
}

/// Produces blank grayscale frames of a fixed size.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    blank: FramePayload,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        let size = width as usize * height as usize;
        Self {
            blank: FramePayload::new(width, height, vec![0u8; size]),
        }
    }
}

#[async_trait::async_trait]
impl FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> Result<FramePayload, CaptureError> {
        let mut frame = self.blank.clone();
        frame.captured_at = chrono::Utc::now();
        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.blank.width, self.blank.height)
    }
}

/// Turns person detections into tracks without any association.
///
/// Track ids come from the detector, or the detection's index when the
/// detector assigns none. A required class is `Present` when a matching
/// equipment box has its center inside the person box, `Missing` otherwise.
#[derive(Debug, Clone)]
pub struct PassthroughTracker {
    required: Vec<String>,
}

impl PassthroughTracker {
    pub fn new(required: Vec<String>) -> Self {
        Self { required }
    }
}

impl Tracker for PassthroughTracker {
    fn update(&mut self, detections: &Detections) -> Vec<TrackState> {
        detections
            .persons
            .iter()
            .enumerate()
            .map(|(index, person)| {
                let track_id = person.track_id.unwrap_or(index as u64);
                self.required
                    .iter()
                    .fold(TrackState::new(track_id, person.bbox), |track, class| {
                        let worn = detections.equipment.iter().any(|item| {
                            let (cx, cy) = item.bbox.center();
                            item.class == *class && person.bbox.contains(cx, cy)
                        });
                        let status = if worn {
                            PpeStatus::Present
                        } else {
                            PpeStatus::Missing
                        };
                        track.with_status(class.clone(), status)
                    })
            })
            .collect()
    }
}
