//! The GPU worker.
//!
//! Exactly one GPU worker runs at a time. It owns the loaded detector and
//! processes inference requests one by one. The detector is paired with
//! the accelerator lease in an [`Accelerator`]; both move together onto a
//! blocking thread for each call and come back with the result. If the
//! worker task is aborted mid-inference the blocking call still owns the
//! lease, so a replacement worker cannot touch the accelerator until that
//! call has returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ppewatch_model::{DetectionResult, Detections, FrameEnvelope};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::collaborators::{Detector, DetectorFactory};
use crate::dispatch::{InferenceRequest, RequestQueue};
use crate::error::{DetectorError, InferenceError, WorkerError};
use crate::heartbeat::{HeartbeatSender, WorkerStatus};
use crate::shutdown::ShutdownSignal;

/// Loaded detector plus exclusive use of the accelerator.
pub struct Accelerator {
    detector: Box<dyn Detector>,
    _lease: OwnedSemaphorePermit,
}

impl Accelerator {
    /// Wait for the accelerator to be free, then load a detector onto it.
    pub async fn acquire(
        lease: Arc<Semaphore>,
        factory: Arc<dyn DetectorFactory>,
    ) -> Result<Self, WorkerError> {
        let permit = match lease.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!("Accelerator still held by an abandoned inference call, waiting");
                lease
                    .acquire_owned()
                    .await
                    .map_err(|_| DetectorError::load("accelerator lease closed"))?
            }
        };
        let detector = tokio::task::spawn_blocking(move || factory.load())
            .await
            .map_err(|_| WorkerError::DetectorPanicked)??;
        Ok(Self {
            detector,
            _lease: permit,
        })
    }

    pub fn model_name(&self) -> &str {
        self.detector.name()
    }

    /// Run one inference on a blocking thread.
    async fn infer(
        mut self,
        envelope: FrameEnvelope,
    ) -> Result<(Self, FrameEnvelope, Result<Detections, DetectorError>), WorkerError> {
        tokio::task::spawn_blocking(move || {
            let outcome = self.detector.infer(&envelope);
            (self, envelope, outcome)
        })
        .await
        .map_err(|_| WorkerError::DetectorPanicked)
    }
}

/// Settings for one GPU worker incarnation.
#[derive(Debug, Clone)]
pub struct GpuWorkerSettings {
    pub heartbeat_interval: Duration,
    pub max_consecutive_failures: u32,
}

/// The inference worker task.
pub struct GpuWorker {
    settings: GpuWorkerSettings,
    factory: Arc<dyn DetectorFactory>,
    lease: Arc<Semaphore>,
    requests: RequestQueue,
    heartbeat: HeartbeatSender,
    shutdown: ShutdownSignal,
    consecutive_failures: u32,
    served: u64,
}

impl GpuWorker {
    pub fn new(
        settings: GpuWorkerSettings,
        factory: Arc<dyn DetectorFactory>,
        lease: Arc<Semaphore>,
        requests: RequestQueue,
        heartbeat: HeartbeatSender,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            settings,
            factory,
            lease,
            requests,
            heartbeat,
            shutdown,
            consecutive_failures: 0,
            served: 0,
        }
    }

    /// Run until shutdown. `ready` fires once the model is loaded; on a
    /// load failure it is dropped and the task returns the error.
    pub async fn run(self, ready: oneshot::Sender<()>) -> Result<(), WorkerError> {
        let span = tracing::info_span!("worker", worker = %self.heartbeat.worker());
        self.run_inner(ready).instrument(span).await
    }

    async fn run_inner(
        mut self,
        ready: oneshot::Sender<()>,
    ) -> Result<(), WorkerError> {
        let mut accelerator =
            match Accelerator::acquire(self.lease.clone(), self.factory.clone()).await {
                Ok(accelerator) => accelerator,
                Err(e) => {
                    tracing::error!(error = %e, "Model load failed");
                    return Err(e);
                }
            };
        tracing::info!(model = accelerator.model_name(), "Model loaded");
        let _ = ready.send(());
        self.heartbeat.beat(WorkerStatus::Ok);

        let requests = self.requests.clone();
        let mut queue = requests.lock().await;

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    tracing::info!(served = self.served, "Shutdown signal received");
                    break;
                }

                _ = heartbeat.tick() => {
                    self.heartbeat.beat(self.status());
                }

                request = queue.recv() => {
                    let Some(request) = request else {
                        tracing::info!("Inference queue closed");
                        break;
                    };
                    accelerator = self.serve(accelerator, request).await?;
                }
            }
        }

        // Anything still queued is abandoned; dropping the replies tells
        // the submitters.
        let mut abandoned = 0usize;
        while let Ok(request) = queue.try_recv() {
            drop(request);
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::info!(abandoned, "Abandoned queued requests at shutdown");
        }
        Ok(())
    }

    async fn serve(
        &mut self,
        accelerator: Accelerator,
        request: InferenceRequest,
    ) -> Result<Accelerator, WorkerError> {
        if request.is_abandoned() {
            tracing::debug!(
                camera = %request.envelope.camera_id,
                seq = request.envelope.seq,
                "Skipping abandoned request"
            );
            return Ok(accelerator);
        }

        let InferenceRequest { envelope, reply } = request;
        if !envelope.is_supported() {
            tracing::warn!(
                camera = %envelope.camera_id,
                version = envelope.version,
                "Rejecting unsupported frame envelope"
            );
            let _ = reply.send(Err(InferenceError::UnsupportedEnvelope {
                version: envelope.version,
            }));
            return Ok(accelerator);
        }

        let started = Instant::now();
        let (accelerator, envelope, outcome) = accelerator.infer(envelope).await?;
        let inference_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.served += 1;

        match outcome {
            Ok(detections) => {
                self.consecutive_failures = 0;
                let result = DetectionResult {
                    camera_id: envelope.camera_id,
                    seq: envelope.seq,
                    detections,
                    inference_ms,
                };
                let _ = reply.send(Ok(result));
                Ok(accelerator)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    camera = %envelope.camera_id,
                    seq = envelope.seq,
                    failures = self.consecutive_failures,
                    error = %e,
                    "Inference failed"
                );
                let _ = reply.send(Err(InferenceError::Detector(e)));
                if self.consecutive_failures >= self.settings.max_consecutive_failures {
                    tracing::error!(
                        failures = self.consecutive_failures,
                        "Too many consecutive inference failures, exiting for restart"
                    );
                    return Err(WorkerError::TooManyInferenceFailures {
                        count: self.consecutive_failures,
                    });
                }
                Ok(accelerator)
            }
        }
    }

    fn status(&self) -> WorkerStatus {
        if self.consecutive_failures > 0 {
            WorkerStatus::Degraded(format!(
                "{} consecutive inference failures",
                self.consecutive_failures
            ))
        } else {
            WorkerStatus::Ok
        }
    }
}
