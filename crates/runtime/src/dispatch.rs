//! Frame dispatch between camera workers and the GPU worker.
//!
//! All cameras share one bounded request queue. Every request carries its
//! own reply channel, so results go straight back to the camera that
//! submitted the frame. When the queue is full the camera either waits up
//! to `submit_timeout` or drops the frame, depending on
//! [`BackpressureMode`].

use std::sync::Arc;
use std::time::Duration;

use ppewatch_common::config::{BackpressureMode, DispatchConfig};
use ppewatch_model::{DetectionResult, FrameEnvelope};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{DispatchError, InferenceError};

/// Reply to one inference request.
pub type InferenceReply = Result<DetectionResult, InferenceError>;

/// One frame waiting for inference.
#[derive(Debug)]
pub struct InferenceRequest {
    pub envelope: FrameEnvelope,
    pub reply: oneshot::Sender<InferenceReply>,
}

impl InferenceRequest {
    /// Whether the submitter has stopped waiting for the result.
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

/// Receiving end of the queue.
///
/// Shared behind a mutex so that a restarted GPU worker picks up the same
/// queue; only one worker holds the lock at a time.
pub type RequestQueue = Arc<Mutex<mpsc::Receiver<InferenceRequest>>>;

/// Submitting end of the queue, cloned into every camera worker.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<InferenceRequest>,
    backpressure: BackpressureMode,
    submit_timeout: Duration,
    inference_timeout: Duration,
}

/// Create the shared queue.
pub fn channel(config: &DispatchConfig) -> (Dispatcher, RequestQueue) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let dispatcher = Dispatcher {
        tx,
        backpressure: config.backpressure,
        submit_timeout: config.submit_timeout,
        inference_timeout: config.inference_timeout,
    };
    (dispatcher, Arc::new(Mutex::new(rx)))
}

impl Dispatcher {
    /// Submit a frame and wait for its detections.
    pub async fn infer(&self, envelope: FrameEnvelope) -> Result<DetectionResult, DispatchError> {
        let pending = self.submit(envelope).await?;
        self.wait(pending).await
    }

    /// Enqueue a frame, applying the backpressure policy.
    pub async fn submit(
        &self,
        envelope: FrameEnvelope,
    ) -> Result<oneshot::Receiver<InferenceReply>, DispatchError> {
        let (reply, pending) = oneshot::channel();
        let request = InferenceRequest { envelope, reply };

        match self.backpressure {
            BackpressureMode::Drop => self.tx.try_send(request).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })?,
            BackpressureMode::Block => self
                .tx
                .send_timeout(request, self.submit_timeout)
                .await
                .map_err(|e| match e {
                    mpsc::error::SendTimeoutError::Timeout(_) => {
                        DispatchError::Timeout(self.submit_timeout)
                    }
                    mpsc::error::SendTimeoutError::Closed(_) => DispatchError::Closed,
                })?,
        }
        Ok(pending)
    }

    /// Wait up to the inference timeout for a submitted frame's result.
    ///
    /// Giving up drops the receiver, which tells the GPU worker to skip the
    /// request if it has not started on it yet.
    pub async fn wait(
        &self,
        pending: oneshot::Receiver<InferenceReply>,
    ) -> Result<DetectionResult, DispatchError> {
        match tokio::time::timeout(self.inference_timeout, pending).await {
            Ok(Ok(reply)) => Ok(reply?),
            Ok(Err(_)) => Err(DispatchError::WorkerGone),
            Err(_) => Err(DispatchError::Timeout(self.inference_timeout)),
        }
    }

    /// Requests currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
