//! Alert records and notification payloads.
//!
//! An [`AlertRecord`] is what persistence stores; a [`Notification`] is what
//! the notifier delivers. Both are produced once per fired alert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::FramePayload;
use crate::geometry::{BBox, PixelRect};

/// A cell of the suppression grid, `(0, 0)` top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub x: u32,
    pub y: u32,
}

/// Which part of the frame accompanies an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRegion {
    /// The whole frame.
    FullFrame,
    /// The padded person crop.
    Crop(PixelRect),
}

/// Reference to the image attached to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertImageRef {
    /// Sequence number of the frame the image comes from.
    pub frame_seq: u64,
    /// Region of that frame.
    pub region: ImageRegion,
}

/// Persisted record of one fired alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    pub grid_x: u32,
    pub grid_y: u32,
    pub person_track_id: u64,
    /// Missing equipment, sorted.
    pub missing_ppe: Vec<String>,
    pub person_box: BBox,
    /// Selected ROI names, comma separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi_name: Option<String>,
    pub frame_width: u32,
    pub frame_height: u32,
    /// How long the violation lasted before it fired.
    pub alert_duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<AlertImageRef>,
}

/// Image handed to the notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertImage {
    /// The source frame.
    pub frame: FramePayload,
    /// Region to show.
    pub region: ImageRegion,
}

/// Payload delivered by the notifier collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub camera_id: String,
    /// Human-readable message body.
    pub message: String,
    pub image: Option<AlertImage>,
}

impl AlertRecord {
    pub fn cell(&self) -> GridCell {
        GridCell {
            x: self.grid_x,
            y: self.grid_y,
        }
    }
}
