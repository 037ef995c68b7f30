//! The camera worker.
//!
//! One per camera. Each iteration grabs a frame at the paced rate, sends it
//! through the dispatcher, tracks the returned detections, and feeds the
//! camera's [`AlertEngine`]. Fired alerts are persisted and delivered by
//! short-lived side tasks so a slow sink never stalls capture. The worker
//! owns those tasks: on exit it waits up to `drain_timeout` for them and
//! aborts the rest.
//!
//! Heartbeats are sent from the loop itself: a worker stuck anywhere in the
//! loop stops beating and is restarted by the supervisor.

use std::sync::Arc;
use std::time::Duration;

use ppewatch_alerts::{build_alert, AlertEngine, AlertSource, Confirmation, Outcome, Violation};
use ppewatch_common::clock::RateController;
use ppewatch_common::config::{AlertConfig, CameraConfig};
use ppewatch_common::error::PpewatchError;
use ppewatch_model::{DetectionResult, EquipmentSpec, FrameEnvelope, FramePayload};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

use crate::collaborators::{AlertSink, CameraFactory, CameraIo, Notifier};
use crate::dispatch::Dispatcher;
use crate::error::{CaptureError, DispatchError, WorkerError};
use crate::heartbeat::{HeartbeatSender, WorkerStatus};
use crate::shutdown::ShutdownSignal;

/// Consecutive read failures after which the worker exits with the read
/// error; the supervisor then respawns it with a freshly opened source.
const MAX_CAPTURE_FAILURES: u32 = 10;

/// Pause after a failed read.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Settings shared by every camera worker.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub heartbeat_interval: Duration,
    /// How long an exiting worker waits for alert side tasks.
    pub drain_timeout: Duration,
    pub alerts: AlertConfig,
    /// Equipment labels used in notification text.
    pub equipment: Option<Arc<EquipmentSpec>>,
}

/// Where a camera worker sends fired alerts.
#[derive(Clone)]
pub struct AlertOutputs {
    pub sink: Arc<dyn AlertSink>,
    pub notifier: Arc<dyn Notifier>,
}

/// Counters reported in the periodic summary.
#[derive(Debug, Default, Clone, Copy)]
struct FrameStats {
    captured: u64,
    processed: u64,
    dropped: u64,
    capture_failures: u32,
    inference_failures: u32,
}

pub struct CameraWorker {
    camera: CameraConfig,
    required: Vec<String>,
    roi_name: Option<String>,
    settings: CameraSettings,
    io: CameraIo,
    dispatch: Dispatcher,
    outputs: AlertOutputs,
    heartbeat: HeartbeatSender,
    shutdown: ShutdownSignal,
    engine: AlertEngine,
    rate: RateController,
    seq: u64,
    stats: FrameStats,
    side_effects: JoinSet<()>,
}

impl CameraWorker {
    /// Check the camera's ROI file and open its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        camera: CameraConfig,
        required: Vec<String>,
        settings: CameraSettings,
        factory: &dyn CameraFactory,
        dispatch: Dispatcher,
        outputs: AlertOutputs,
        heartbeat: HeartbeatSender,
        shutdown: ShutdownSignal,
    ) -> Result<Self, WorkerError> {
        if let Some(roi) = &camera.roi_path {
            if !roi.exists() {
                return Err(PpewatchError::file_not_found(roi).into());
            }
        }

        let io = factory.open(&camera).await?;
        let (width, height) = io.source.resolution();
        let engine = AlertEngine::new(&settings.alerts, width, height);
        let roi_name = if camera.roi_polys.is_empty() {
            None
        } else {
            Some(camera.roi_polys.join(","))
        };
        let rate = RateController::new(camera.target_fps);

        tracing::info!(
            camera = %camera.id,
            uri = %camera.uri,
            width,
            height,
            fps = camera.target_fps,
            required = ?required,
            thresholds = ?engine.thresholds(),
            "Camera opened"
        );

        Ok(Self {
            camera,
            required,
            roi_name,
            settings,
            io,
            dispatch,
            outputs,
            heartbeat,
            shutdown,
            engine,
            rate,
            seq: 0,
            stats: FrameStats::default(),
            side_effects: JoinSet::new(),
        })
    }

    pub async fn run(self) -> Result<(), WorkerError> {
        let span = tracing::info_span!("worker", worker = %self.heartbeat.worker());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> Result<(), WorkerError> {
        let result = self.capture_loop().await;
        self.drain_side_effects().await;
        result
    }

    async fn capture_loop(&mut self) -> Result<(), WorkerError> {
        self.heartbeat.beat(WorkerStatus::Ok);
        let mut next_heartbeat = Instant::now() + self.settings.heartbeat_interval;
        let mut consecutive_capture_failures = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            while self.side_effects.try_join_next().is_some() {}

            let now = Instant::now();
            if now >= next_heartbeat {
                self.heartbeat.beat(self.status());
                self.log_summary();
                self.stats.capture_failures = 0;
                self.stats.inference_failures = 0;
                next_heartbeat = now + self.settings.heartbeat_interval;
            }

            if !self.rate.should_tick(now.into_std()) {
                let wait = self
                    .rate
                    .remaining(now.into_std())
                    .min(next_heartbeat.saturating_duration_since(now));
                if !self.pause(wait).await {
                    break;
                }
                continue;
            }

            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                frame = self.io.source.next_frame() => frame,
            };
            let frame = match frame {
                Ok(frame) => {
                    consecutive_capture_failures = 0;
                    frame
                }
                Err(CaptureError::EndOfStream) => {
                    tracing::warn!("Frame source ended");
                    return Err(CaptureError::EndOfStream.into());
                }
                Err(e) => {
                    self.stats.capture_failures += 1;
                    consecutive_capture_failures += 1;
                    tracing::warn!(
                        error = %e,
                        failures = consecutive_capture_failures,
                        "Capture failed"
                    );
                    if consecutive_capture_failures >= MAX_CAPTURE_FAILURES {
                        return Err(e.into());
                    }
                    if !self.pause(CAPTURE_RETRY_DELAY).await {
                        break;
                    }
                    continue;
                }
            };
            self.stats.captured += 1;
            self.seq += 1;

            let envelope = FrameEnvelope::new(self.camera.id.clone(), self.seq, frame.clone());
            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                result = self.dispatch.infer(envelope) => result,
            };
            match result {
                Ok(result) => self.handle_result(result, &frame),
                Err(DispatchError::QueueFull) => {
                    self.stats.dropped += 1;
                    tracing::debug!(seq = self.seq, "Inference queue full, frame dropped");
                }
                Err(e) => {
                    self.stats.dropped += 1;
                    self.stats.inference_failures += 1;
                    tracing::warn!(
                        seq = self.seq,
                        error = %e,
                        "Inference request failed, frame dropped"
                    );
                }
            }
        }

        tracing::info!(
            captured = self.stats.captured,
            processed = self.stats.processed,
            dropped = self.stats.dropped,
            "Camera worker stopped"
        );
        Ok(())
    }

    /// Wait for in-flight alert side tasks, aborting whatever is left at
    /// the drain deadline.
    async fn drain_side_effects(&mut self) {
        if self.side_effects.is_empty() {
            return;
        }
        let limit = self.settings.drain_timeout;
        let side_effects = &mut self.side_effects;
        let drained = tokio::time::timeout(limit, async {
            while side_effects.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                abandoned = self.side_effects.len(),
                timeout = ?limit,
                "Abandoning unfinished alert side tasks"
            );
            self.side_effects.abort_all();
            while self.side_effects.join_next().await.is_some() {}
        }
    }

    /// Sleep for `delay`. Returns `false` if shutdown arrived first.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn handle_result(&mut self, result: DetectionResult, frame: &FramePayload) {
        self.stats.processed += 1;
        let tracks = self.io.tracker.update(&result.detections);
        let violations: Vec<Violation> = tracks
            .iter()
            .filter_map(|track| Violation::from_track(track, &self.required))
            .collect();

        let now = Instant::now().into_std();
        for confirmation in self.engine.process(&violations, now) {
            if confirmation.outcome == Outcome::Fired {
                self.emit(&confirmation, result.seq, frame);
            }
        }
    }

    fn emit(&mut self, confirmation: &Confirmation, frame_seq: u64, frame: &FramePayload) {
        if !self.settings.alerts.enable_alerts {
            tracing::info!(
                track_id = confirmation.track_id,
                cell = ?confirmation.cell,
                "Alert fired but delivery is disabled"
            );
            return;
        }

        let source = AlertSource {
            camera_id: &self.camera.id,
            roi_name: self.roi_name.as_deref(),
            frame_seq,
            frame,
        };
        let (record, notification) = build_alert(
            &self.settings.alerts,
            confirmation,
            source,
            self.settings.equipment.as_deref(),
        );
        let limit = self.settings.alerts.side_effect_timeout;

        let sink = self.outputs.sink.clone();
        self.side_effects.spawn(
            async move {
                match tokio::time::timeout(limit, sink.persist(&record)).await {
                    Ok(Ok(())) => {
                        tracing::debug!(track_id = record.person_track_id, "Alert persisted")
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "Failed to persist alert"),
                    Err(_) => tracing::warn!(timeout = ?limit, "Timed out persisting alert"),
                }
            }
            .in_current_span(),
        );

        let notifier = self.outputs.notifier.clone();
        self.side_effects.spawn(
            async move {
                match tokio::time::timeout(limit, notifier.send(&notification)).await {
                    Ok(Ok(())) => tracing::debug!("Alert notification sent"),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Failed to send alert notification")
                    }
                    Err(_) => {
                        tracing::warn!(timeout = ?limit, "Timed out sending alert notification")
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn status(&self) -> WorkerStatus {
        let FrameStats {
            capture_failures,
            inference_failures,
            ..
        } = self.stats;
        if capture_failures == 0 && inference_failures == 0 {
            return WorkerStatus::Ok;
        }
        WorkerStatus::Degraded(format!(
            "{capture_failures} capture failures, {inference_failures} inference failures"
        ))
    }

    fn log_summary(&self) {
        let now = Instant::now().into_std();
        tracing::debug!(
            captured = self.stats.captured,
            processed = self.stats.processed,
            dropped = self.stats.dropped,
            queued = self.dispatch.queued(),
            tracked = self.engine.tracked().len(),
            suppressed = ?self.engine.suppressed_cells(now),
            "Camera summary"
        );
        for track_id in self.engine.tracked() {
            tracing::trace!(
                track_id,
                status = ?self.engine.status(track_id, now),
                "Track alert status"
            );
        }
    }
}
