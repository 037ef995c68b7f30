//! ppewatch Runtime
//!
//! Runs the video-inspection pipeline: one GPU worker that owns the
//! detection model, one camera worker per camera, and the supervisor that
//! keeps them alive.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!                    │          Supervisor          │
//!                    │  heartbeat monitor, restart  │
//!                    │  policy, lifecycle, shutdown │
//!                    └───────▲──────────────▲───────┘
//!                  heartbeats│              │heartbeats
//!   ┌────────────────────────┴───┐      ┌───┴──────────────┐
//!   │ Camera worker (one per cam)│      │    GPU worker    │
//!   │ capture → infer → track →  │─────▶│ serialized infer │
//!   │ alert engine → sink/notify │◀─────│ on the detector  │
//!   └────────────────────────────┘reply └──────────────────┘
//! ```
//!
//! Workers never touch supervisor state; they only send heartbeats and
//! queue messages.

pub mod camera;
pub mod collaborators;
pub mod dispatch;
pub mod error;
pub mod gpu;
pub mod heartbeat;
pub mod lifecycle;
pub mod replay;
pub mod restart;
pub mod shutdown;
pub mod sinks;
pub mod supervisor;

pub use collaborators::{
    AlertSink, CameraFactory, CameraIo, Detector, DetectorFactory, FrameSource, Notifier, Tracker,
};
pub use dispatch::Dispatcher;
pub use error::{
    CaptureError, DetectorError, DispatchError, InferenceError, SinkError, SupervisorError,
    WorkerError,
};
pub use heartbeat::{WorkerId, WorkerStatus};
pub use lifecycle::WorkerState;
pub use supervisor::{Collaborators, Supervisor, WorkerSnapshot};
