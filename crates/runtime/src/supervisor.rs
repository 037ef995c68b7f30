//! The supervisor.
//!
//! Owns every worker task and all lifecycle state. Workers only ever talk
//! to it through heartbeats; it never shares its handles with them.
//!
//! Startup spawns the GPU worker first and waits for its model to load,
//! then spawns one camera worker per enabled camera. A periodic tick
//! restarts workers whose task has ended or whose heartbeat has lapsed,
//! subject to the restart budget. Shutdown broadcasts cancellation, waits
//! out the grace period, then aborts whatever is still running.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use ppewatch_common::config::PipelineConfig;
use ppewatch_common::error::PpewatchError;
use ppewatch_model::EquipmentSpec;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::camera::{AlertOutputs, CameraSettings, CameraWorker};
use crate::collaborators::{AlertSink, CameraFactory, DetectorFactory, Notifier};
use crate::dispatch::{self, Dispatcher, RequestQueue};
use crate::error::{SupervisorError, WorkerError};
use crate::gpu::{GpuWorker, GpuWorkerSettings};
use crate::heartbeat::{Heartbeat, HeartbeatMonitor, HeartbeatSender, WorkerId};
use crate::lifecycle::{LifecycleEvent, WorkerState};
use crate::restart::{RestartPolicy, RestartWindow};
use crate::shutdown::ShutdownTrigger;

type WorkerTask = JoinHandle<Result<(), WorkerError>>;

/// External collaborators the workers are built from.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn DetectorFactory>,
    pub cameras: Arc<dyn CameraFactory>,
    pub sink: Arc<dyn AlertSink>,
    pub notifier: Arc<dyn Notifier>,
    pub equipment: Option<Arc<EquipmentSpec>>,
}

/// Supervisor-owned record of one worker.
struct WorkerHandle {
    task: Option<WorkerTask>,
    state: WorkerState,
    restarts: u32,
    window: RestartWindow,
}

impl WorkerHandle {
    fn new() -> Self {
        Self {
            task: None,
            state: WorkerState::Spawning,
            restarts: 0,
            window: RestartWindow::new(),
        }
    }

    fn is_alive(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub state: WorkerState,
    pub restarts: u32,
    pub last_heartbeat: Option<Instant>,
    pub alive: bool,
}

pub struct Supervisor {
    config: PipelineConfig,
    collaborators: Collaborators,
    workers: BTreeMap<WorkerId, WorkerHandle>,
    monitor: HeartbeatMonitor,
    policy: RestartPolicy,
    heartbeat_tx: mpsc::UnboundedSender<Heartbeat>,
    heartbeat_rx: mpsc::UnboundedReceiver<Heartbeat>,
    shutdown: ShutdownTrigger,
    dispatcher: Dispatcher,
    requests: RequestQueue,
    lease: Arc<Semaphore>,
    started: bool,
    last_stopped_warning: Option<Instant>,
}

/// Current time on the runtime clock.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl Supervisor {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        let (heartbeat_tx, heartbeat_rx) = mpsc::unbounded_channel();
        let (dispatcher, requests) = dispatch::channel(&config.dispatch);
        Self {
            monitor: HeartbeatMonitor::new(config.supervisor.heartbeat_timeout),
            policy: RestartPolicy::from_config(&config.supervisor),
            config,
            collaborators,
            workers: BTreeMap::new(),
            heartbeat_tx,
            heartbeat_rx,
            shutdown: ShutdownTrigger::new(),
            dispatcher,
            requests,
            lease: Arc::new(Semaphore::new(1)),
            started: false,
            last_stopped_warning: None,
        }
    }

    /// Spawn the GPU worker, wait for its model, then spawn the cameras.
    ///
    /// Fails only if the GPU worker cannot load its model. Camera spawn
    /// failures leave the camera in `Restarting` for the next tick.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.started {
            return Err(SupervisorError::AlreadyStarted);
        }
        let cameras: Vec<String> = self
            .config
            .enabled_cameras()
            .map(|camera| camera.id.clone())
            .collect();
        if cameras.is_empty() {
            return Err(SupervisorError::NoCameras);
        }
        self.started = true;

        tracing::info!(
            cameras = cameras.len(),
            heartbeat_timeout = ?self.config.supervisor.heartbeat_timeout,
            max_restarts = self.policy.max_restarts,
            restart_window = ?self.policy.window,
            "Starting supervisor"
        );

        self.workers.insert(WorkerId::Gpu, WorkerHandle::new());
        let task = match self.start_gpu(0).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(worker = %WorkerId::Gpu, error = %e, "GPU worker failed to start");
                self.set_state(&WorkerId::Gpu, LifecycleEvent::Shutdown);
                return Err(SupervisorError::GpuStartup(e));
            }
        };
        if let Some(handle) = self.workers.get_mut(&WorkerId::Gpu) {
            handle.task = Some(task);
        }
        self.monitor.record(&WorkerId::Gpu, now());
        self.set_state(&WorkerId::Gpu, LifecycleEvent::Spawned);

        for camera_id in cameras {
            let id = WorkerId::Camera(camera_id.clone());
            self.workers.insert(id.clone(), WorkerHandle::new());
            match self.spawn_camera(&camera_id, 0).await {
                Ok(task) => {
                    if let Some(handle) = self.workers.get_mut(&id) {
                        handle.task = Some(task);
                    }
                    self.monitor.record(&id, now());
                    self.set_state(&id, LifecycleEvent::Spawned);
                }
                Err(e) => {
                    tracing::warn!(worker = %id, error = %e, "Camera worker failed to spawn");
                    self.set_state(&id, LifecycleEvent::SpawnFailed);
                }
            }
        }
        Ok(())
    }

    /// Start, supervise until `signal` resolves, then shut down.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;

        let mut ticker = tokio::time::interval(self.config.supervisor.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                _ = &mut signal => {
                    tracing::info!("Shutdown requested");
                    break;
                }

                Some(heartbeat) = self.heartbeat_rx.recv() => {
                    self.on_heartbeat(heartbeat, now());
                }

                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Process pending heartbeats, then restart or park every worker whose
    /// task has ended or whose heartbeat has lapsed.
    pub async fn tick(&mut self) {
        while let Ok(heartbeat) = self.heartbeat_rx.try_recv() {
            self.on_heartbeat(heartbeat, now());
        }

        let tick_at = now();
        let ids: Vec<WorkerId> = self.workers.keys().cloned().collect();
        for id in ids {
            let Some(handle) = self.workers.get_mut(&id) else {
                continue;
            };
            if handle.state.is_terminal() {
                continue;
            }
            let finished = handle.task.as_ref().map(JoinHandle::is_finished);
            let reason = match (handle.state, finished) {
                (WorkerState::Restarting, _) => "previous restart attempt failed".to_string(),
                (_, None) => "no running task".to_string(),
                (_, Some(true)) => match handle.task.take() {
                    Some(task) => exit_reason(task).await,
                    None => continue,
                },
                (_, Some(false)) if self.monitor.is_lapsed(&id, tick_at) => format!(
                    "no heartbeat for more than {:?}",
                    self.monitor.timeout()
                ),
                (_, Some(false)) => continue,
            };
            self.restart(&id, &reason).await;
        }

        self.warn_stopped(tick_at);
    }

    async fn restart(&mut self, id: &WorkerId, reason: &str) {
        let at = now();
        let policy = self.policy;
        let Some(handle) = self.workers.get_mut(id) else {
            return;
        };

        if let Some(task) = handle.task.take() {
            task.abort();
        }
        if let Some(next) = handle.state.next(&LifecycleEvent::Lapsed) {
            handle.state = next;
        }

        if !handle.window.try_acquire(&policy, at) {
            handle.state = handle
                .state
                .next(&LifecycleEvent::BudgetExhausted)
                .unwrap_or(WorkerState::Stopped);
            self.monitor.forget(id);
            tracing::error!(
                worker = %id,
                reason,
                restarts = handle.restarts,
                max_restarts = policy.max_restarts,
                window = ?policy.window,
                "Restart budget exhausted, worker stopped"
            );
            return;
        }
        handle.restarts += 1;
        let incarnation = handle.restarts;
        tracing::warn!(worker = %id, reason, restart = incarnation, "Restarting worker");

        let spawned = match id {
            WorkerId::Gpu => self.start_gpu(incarnation).await,
            WorkerId::Camera(camera_id) => self.spawn_camera(camera_id, incarnation).await,
        };
        match spawned {
            Ok(task) => {
                if let Some(handle) = self.workers.get_mut(id) {
                    handle.task = Some(task);
                }
                self.monitor.record(id, now());
                self.set_state(id, LifecycleEvent::Spawned);
                tracing::info!(worker = %id, restart = incarnation, "Worker restarted");
            }
            Err(e) => {
                self.monitor.forget(id);
                self.set_state(id, LifecycleEvent::SpawnFailed);
                tracing::warn!(worker = %id, error = %e, "Worker failed to respawn");
            }
        }
    }

    /// Broadcast cancellation, wait out the grace period, then abort
    /// stragglers. No worker task is running when this returns.
    pub async fn shutdown(&mut self) {
        if self.shutdown.is_triggered() {
            return;
        }
        let grace = self.config.supervisor.shutdown_grace;
        tracing::info!(grace = ?grace, "Shutting down workers");
        self.shutdown.trigger();

        let deadline = tokio::time::Instant::now() + grace;
        let ids: Vec<WorkerId> = self.workers.keys().cloned().collect();
        for id in ids {
            let task = self.workers.get_mut(&id).and_then(|handle| handle.task.take());
            if let Some(mut task) = task {
                match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(Ok(Ok(()))) => tracing::info!(worker = %id, "Worker stopped"),
                    Ok(Ok(Err(e))) => {
                        tracing::warn!(worker = %id, error = %e, "Worker exited with error")
                    }
                    Ok(Err(e)) => tracing::warn!(worker = %id, error = %e, "Worker task failed"),
                    Err(_) => {
                        tracing::warn!(worker = %id, "Worker ignored shutdown, aborting");
                        task.abort();
                        let _ = task.await;
                    }
                }
            }
            self.monitor.forget(&id);
            self.set_state(&id, LifecycleEvent::Shutdown);
        }
        tracing::info!("All workers stopped");
    }

    fn on_heartbeat(&mut self, heartbeat: Heartbeat, at: Instant) {
        let Some(handle) = self.workers.get(&heartbeat.worker) else {
            return;
        };
        if heartbeat.incarnation != handle.restarts || !handle.state.is_live() {
            tracing::trace!(worker = %heartbeat.worker, "Ignoring stale heartbeat");
            return;
        }
        self.monitor.record(&heartbeat.worker, at);
        self.set_state(&heartbeat.worker, LifecycleEvent::Heartbeat(heartbeat.status));
    }

    fn set_state(&mut self, id: &WorkerId, event: LifecycleEvent) {
        let Some(handle) = self.workers.get_mut(id) else {
            return;
        };
        let Some(next) = handle.state.next(&event) else {
            return;
        };
        if next == handle.state {
            return;
        }
        match &event {
            LifecycleEvent::Heartbeat(crate::heartbeat::WorkerStatus::Degraded(reason)) => {
                tracing::warn!(
                    worker = %id,
                    from = %handle.state,
                    to = %next,
                    reason = %reason,
                    "Worker degraded"
                );
            }
            _ => tracing::info!(
                worker = %id,
                from = %handle.state,
                to = %next,
                "Worker state changed"
            ),
        }
        handle.state = next;
    }

    fn warn_stopped(&mut self, at: Instant) {
        let stopped: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.state == WorkerState::Stopped)
            .map(|(id, _)| id.to_string())
            .collect();
        if stopped.is_empty() {
            return;
        }
        let due = self.last_stopped_warning.map_or(true, |last| {
            at.saturating_duration_since(last) >= self.config.supervisor.heartbeat_timeout
        });
        if due {
            tracing::warn!(
                workers = ?stopped,
                "Workers stopped after exhausting their restart budget"
            );
            self.last_stopped_warning = Some(at);
        }
    }

    fn spawn_gpu(&self, incarnation: u32) -> (WorkerTask, oneshot::Receiver<()>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = GpuWorker::new(
            GpuWorkerSettings {
                heartbeat_interval: self.config.supervisor.heartbeat_interval,
                max_consecutive_failures: self.config.dispatch.max_consecutive_failures,
            },
            self.collaborators.detector.clone(),
            self.lease.clone(),
            self.requests.clone(),
            HeartbeatSender::new(WorkerId::Gpu, incarnation, self.heartbeat_tx.clone()),
            self.shutdown.subscribe(),
        );
        tracing::info!(worker = %WorkerId::Gpu, incarnation, "Spawning GPU worker");
        (tokio::spawn(worker.run(ready_tx)), ready_rx)
    }

    /// Spawn the GPU worker and wait until its model is loaded.
    ///
    /// A detector call that never returns keeps holding the accelerator, so
    /// a replacement cannot load until it does. Such a replacement is
    /// aborted at the deadline and the worker is left for the next tick.
    async fn start_gpu(&self, incarnation: u32) -> Result<WorkerTask, WorkerError> {
        let (mut task, ready) = self.spawn_gpu(incarnation);
        let load_timeout = self.config.supervisor.heartbeat_timeout;
        match tokio::time::timeout(load_timeout, ready).await {
            Ok(Ok(())) => Ok(task),
            Ok(Err(_)) => Err(match (&mut task).await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => {
                    PpewatchError::worker("GPU worker exited before loading a model").into()
                }
                Err(_) => WorkerError::DetectorPanicked,
            }),
            Err(_) => {
                task.abort();
                if self.lease.available_permits() == 0 {
                    tracing::warn!(
                        worker = %WorkerId::Gpu,
                        incarnation,
                        "Accelerator still held by an abandoned inference call"
                    );
                }
                Err(WorkerError::SpawnTimeout(load_timeout))
            }
        }
    }

    async fn spawn_camera(
        &self,
        camera_id: &str,
        incarnation: u32,
    ) -> Result<WorkerTask, WorkerError> {
        let camera = self
            .config
            .cameras
            .iter()
            .find(|camera| camera.id == camera_id)
            .ok_or_else(|| PpewatchError::config(format!("unknown camera {camera_id}")))?;
        let id = WorkerId::Camera(camera_id.to_string());
        tracing::info!(worker = %id, incarnation, "Spawning camera worker");

        let settings = CameraSettings {
            heartbeat_interval: self.config.supervisor.heartbeat_interval,
            drain_timeout: self.config.supervisor.shutdown_grace / 2,
            alerts: self.config.alerts.clone(),
            equipment: self.collaborators.equipment.clone(),
        };
        let outputs = AlertOutputs {
            sink: self.collaborators.sink.clone(),
            notifier: self.collaborators.notifier.clone(),
        };
        let open_timeout = self.config.supervisor.heartbeat_timeout;
        let worker = tokio::time::timeout(
            open_timeout,
            CameraWorker::open(
                camera.clone(),
                self.config.required_ppe_for(camera).to_vec(),
                settings,
                self.collaborators.cameras.as_ref(),
                self.dispatcher.clone(),
                outputs,
                HeartbeatSender::new(id, incarnation, self.heartbeat_tx.clone()),
                self.shutdown.subscribe(),
            ),
        )
        .await
        .map_err(|_| WorkerError::SpawnTimeout(open_timeout))??;
        Ok(tokio::spawn(worker.run()))
    }

    pub fn state(&self, id: &WorkerId) -> Option<WorkerState> {
        self.workers.get(id).map(|handle| handle.state)
    }

    /// State of every worker, sorted by id.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .iter()
            .map(|(id, handle)| WorkerSnapshot {
                id: id.clone(),
                state: handle.state,
                restarts: handle.restarts,
                last_heartbeat: self.monitor.last_seen(id),
                alive: handle.is_alive(),
            })
            .collect()
    }

    /// Worker tasks that have not finished.
    pub fn alive_workers(&self) -> usize {
        self.workers.values().filter(|handle| handle.is_alive()).count()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for handle in self.workers.values() {
            if let Some(task) = &handle.task {
                task.abort();
            }
        }
    }
}

/// Describe why a finished worker task ended.
async fn exit_reason(task: WorkerTask) -> String {
    match task.await {
        Ok(Ok(())) => "worker exited".to_string(),
        Ok(Err(e)) => format!("worker failed: {e}"),
        Err(e) if e.is_panic() => "worker panicked".to_string(),
        Err(e) => format!("worker task failed: {e}"),
    }
}
