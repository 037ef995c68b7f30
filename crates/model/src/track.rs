//! Tracker output consumed by the alert engine.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::geometry::BBox;

/// Rolling per-track status of one equipment class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpeStatus {
    /// Worn.
    Present,
    /// Confidently absent.
    Missing,
    /// Not enough evidence yet.
    Pending,
}

/// One tracked person as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    /// Stable identity across frames.
    pub track_id: u64,
    /// Current box in frame pixels.
    pub bbox: BBox,
    /// Status per equipment class.
    #[serde(default)]
    pub equipment: BTreeMap<String, PpeStatus>,
}

impl TrackState {
    pub fn new(track_id: u64, bbox: BBox) -> Self {
        Self {
            track_id,
            bbox,
            equipment: BTreeMap::new(),
        }
    }

    /// Set the status of one equipment class.
    pub fn with_status(mut self, class: impl Into<String>, status: PpeStatus) -> Self {
        self.equipment.insert(class.into(), status);
        self
    }

    /// Required classes this track is confidently missing.
    ///
    /// `Pending` and unknown classes never count as missing.
    pub fn missing(&self, required: &[String]) -> BTreeSet<String> {
        required
            .iter()
            .filter(|class| self.equipment.get(class.as_str()) == Some(&PpeStatus::Missing))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<String> {
        vec!["helmet".to_string(), "vest".to_string()]
    }

    #[test]
    fn test_missing_only_counts_confident_absence() {
        let track = TrackState::new(1, BBox::new(0.0, 0.0, 10.0, 10.0))
            .with_status("helmet", PpeStatus::Missing)
            .with_status("vest", PpeStatus::Pending)
            .with_status("gloves", PpeStatus::Missing);
        let missing = track.missing(&required());
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["helmet"]);
    }

    #[test]
    fn test_compliant_track_has_no_missing() {
        let track = TrackState::new(2, BBox::new(0.0, 0.0, 10.0, 10.0))
            .with_status("helmet", PpeStatus::Present)
            .with_status("vest", PpeStatus::Present);
        assert!(track.missing(&required()).is_empty());
    }
}
