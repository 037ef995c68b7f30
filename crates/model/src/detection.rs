//! Detector output types.

use serde::{Deserialize, Serialize};

use crate::geometry::BBox;

/// One detected box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label (e.g., "person", "helmet").
    pub class: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Box in frame pixels.
    pub bbox: BBox,
    /// Identity assigned by detectors that track internally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

/// Raw detector output for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detections {
    /// Person boxes.
    #[serde(default)]
    pub persons: Vec<Detection>,
    /// PPE and equipment boxes.
    #[serde(default)]
    pub equipment: Vec<Detection>,
}

/// The GPU worker's answer to one frame envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Camera the frame came from.
    pub camera_id: String,
    /// Sequence number of the envelope this answers.
    pub seq: u64,
    /// What the detector found.
    pub detections: Detections,
    /// Time spent inside the detector.
    pub inference_ms: f64,
}

impl Detection {
    pub fn new(class: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            class: class.into(),
            confidence,
            bbox,
            track_id: None,
        }
    }

    /// Attach a detector-assigned identity.
    pub fn with_track_id(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }
}
