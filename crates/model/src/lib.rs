//! ppewatch Model
//!
//! Defines the data contracts shared by the runtime and the alert engine:
//! - **Envelope:** the versioned frame envelope sent to the GPU worker
//! - **Detections:** detector output for one frame
//! - **Tracks:** tracker output with per-track equipment status
//! - **Alerts:** persisted alert records and notification payloads
//! - **Equipment:** the equipment classes and prompts to detect
//!
//! All coordinates are frame pixels.

pub mod alert;
pub mod detection;
pub mod envelope;
pub mod equipment;
pub mod geometry;
pub mod track;

pub use alert::*;
pub use detection::*;
pub use envelope::*;
pub use equipment::*;
pub use geometry::*;
pub use track::*;
