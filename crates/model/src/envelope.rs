//! The versioned frame envelope.
//!
//! A [`FrameEnvelope`] is the only shape in which frames travel from a
//! camera worker to the GPU worker. Its fields are fixed; the `version`
//! field lets the receiver refuse envelopes it does not understand.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u16 = 1;

/// Opaque image buffer plus capture metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Encoded or raw image bytes; never interpreted by the core.
    pub data: Arc<[u8]>,
}

/// One frame submitted for inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEnvelope {
    /// Envelope format version.
    pub version: u16,
    /// Camera that captured the frame.
    pub camera_id: String,
    /// Monotonic per-camera sequence number.
    pub seq: u64,
    /// The frame itself.
    pub payload: FramePayload,
}

impl FramePayload {
    pub fn new(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            captured_at: Utc::now(),
            width,
            height,
            data: data.into(),
        }
    }
}

impl FrameEnvelope {
    /// Wrap a payload in a current-version envelope.
    pub fn new(camera_id: impl Into<String>, seq: u64, payload: FramePayload) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            camera_id: camera_id.into(),
            seq,
            payload,
        }
    }

    /// Whether this envelope uses the format this build understands.
    pub fn is_supported(&self) -> bool {
        self.version == ENVELOPE_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_envelope_is_current_version() {
        let env = FrameEnvelope::new("CAM1", 7, FramePayload::new(4, 2, vec![0u8; 8]));
        assert_eq!(env.version, ENVELOPE_VERSION);
        assert!(env.is_supported());
        assert_eq!(env.payload.data.len(), 8);
    }

    #[test]
    fn test_foreign_version_is_unsupported() {
        let mut env = FrameEnvelope::new("CAM1", 1, FramePayload::new(1, 1, vec![0u8]));
        env.version = ENVELOPE_VERSION + 1;
        assert!(!env.is_supported());
    }

    #[test]
    fn test_envelope_json_keeps_fixed_fields() {
        let env = FrameEnvelope::new("CAM9", 42, FramePayload::new(2, 1, vec![1u8, 2]));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["camera_id"], "CAM9");
        assert_eq!(json["seq"], 42);
        assert_eq!(json["payload"]["width"], 2);
    }
}
