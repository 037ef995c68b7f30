//! Interfaces to the external collaborators the runtime drives.
//!
//! Detection models, trackers, capture devices and alert delivery are all
//! black boxes behind these traits. Built-in implementations for offline
//! operation live in [`crate::replay`] and [`crate::sinks`].

use ppewatch_common::config::CameraConfig;
use ppewatch_model::{
    AlertRecord, Detections, FrameEnvelope, FramePayload, Notification, TrackState,
};

use crate::error::{CaptureError, DetectorError, SinkError};

/// A loaded detection model.
///
/// `infer` is synchronous and may block for as long as the accelerator
/// needs; the GPU worker runs it on a blocking thread.
pub trait Detector: Send {
    /// Human-readable model name for logs.
    fn name(&self) -> &str;

    /// Detect persons and equipment in one frame.
    fn infer(&mut self, frame: &FrameEnvelope) -> Result<Detections, DetectorError>;
}

/// Loads detection models. Called once per GPU worker incarnation.
pub trait DetectorFactory: Send + Sync {
    fn load(&self) -> Result<Box<dyn Detector>, DetectorError>;
}

/// A camera's frame source.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame.
    async fn next_frame(&mut self) -> Result<FramePayload, CaptureError>;

    /// Frame size in pixels.
    fn resolution(&self) -> (u32, u32);
}

/// Multi-object tracker for one camera.
pub trait Tracker: Send {
    /// Associate this frame's detections with existing tracks.
    fn update(&mut self, detections: &Detections) -> Vec<TrackState>;
}

/// Per-camera collaborators opened when a camera worker spawns.
pub struct CameraIo {
    pub source: Box<dyn FrameSource>,
    pub tracker: Box<dyn Tracker>,
}

/// Opens capture and tracking for a camera.
#[async_trait::async_trait]
pub trait CameraFactory: Send + Sync {
    async fn open(&self, camera: &CameraConfig) -> Result<CameraIo, CaptureError>;
}

/// Alert persistence.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn persist(&self, record: &AlertRecord) -> Result<(), SinkError>;
}

/// Alert delivery to people.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError>;
}
