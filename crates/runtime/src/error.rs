//! Error taxonomy of the runtime.
//!
//! | Kind | Type | Handling |
//! |---|---|---|
//! | worker-fatal | [`SupervisorError::GpuStartup`] | halts startup |
//! | worker-recoverable | [`WorkerError`] | restart under the restart policy |
//! | request-level | [`DispatchError`], [`InferenceError`] | frame dropped |
//! | side effect | [`SinkError`] | logged |

use std::time::Duration;

use ppewatch_common::error::PpewatchError;

/// Failure inside a detection model.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Model load failed: {message}")]
    Load { message: String },

    #[error("Detection failed: {message}")]
    Failed { message: String },
}

impl DetectorError {
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load {
            message: msg.into(),
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed {
            message: msg.into(),
        }
    }
}

/// Error returned to the submitter of one inference request.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("Unsupported frame envelope version {version}")]
    UnsupportedEnvelope { version: u16 },
}

/// Error on the camera side of the dispatch channel.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Inference queue full, frame dropped")]
    QueueFull,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference queue closed")]
    Closed,

    #[error("GPU worker went away before replying")]
    WorkerGone,

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Failure reading from a frame source.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to open {uri}: {message}")]
    Open { uri: String, message: String },

    #[error("Frame read failed: {message}")]
    Read { message: String },

    #[error("End of stream")]
    EndOfStream,
}

/// Failure persisting or delivering an alert.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Delivery failed: {message}")]
    Delivery { message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a worker task ended or could not be started.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Setup(#[from] PpewatchError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("Detector panicked")]
    DetectorPanicked,

    #[error("{count} consecutive inference failures")]
    TooManyInferenceFailures { count: u32 },

    #[error("Spawn timed out after {0:?}")]
    SpawnTimeout(Duration),
}

/// Errors surfaced by the supervisor itself.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("GPU worker failed to start: {0}")]
    GpuStartup(#[source] WorkerError),

    #[error("Supervisor already started")]
    AlreadyStarted,

    #[error("No enabled cameras configured")]
    NoCameras,
}
