//! Worker liveness.
//!
//! Workers send [`Heartbeat`]s to the supervisor over an unbounded channel.
//! The [`HeartbeatMonitor`] keeps, per worker, the time the last one
//! arrived. A worker is lapsed when `now - last > timeout`; the monitor
//! cannot tell a hang from a crash or slow I/O and does not try to.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

/// Identity of a supervised worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerId {
    /// The single inference worker.
    Gpu,
    /// One worker per camera.
    Camera(String),
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Gpu => write!(f, "gpu"),
            WorkerId::Camera(id) => write!(f, "camera:{id}"),
        }
    }
}

/// Self-reported health carried by a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Ok,
    Degraded(String),
}

/// Liveness signal from a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub worker: WorkerId,
    /// Restart count of the sending incarnation.
    pub incarnation: u32,
    pub status: WorkerStatus,
}

/// Sending side handed to each worker.
#[derive(Debug, Clone)]
pub struct HeartbeatSender {
    worker: WorkerId,
    incarnation: u32,
    tx: mpsc::UnboundedSender<Heartbeat>,
}

impl HeartbeatSender {
    pub fn new(
        worker: WorkerId,
        incarnation: u32,
        tx: mpsc::UnboundedSender<Heartbeat>,
    ) -> Self {
        Self {
            worker,
            incarnation,
            tx,
        }
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Send a heartbeat. A closed channel means the supervisor is gone,
    /// which only happens during teardown, so the error is ignored.
    pub fn beat(&self, status: WorkerStatus) {
        let _ = self.tx.send(Heartbeat {
            worker: self.worker.clone(),
            incarnation: self.incarnation,
            status,
        });
    }
}

/// Last heartbeat arrival per worker.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last: HashMap<WorkerId, Instant>,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a heartbeat (or a fresh spawn) for `worker` at `at`.
    pub fn record(&mut self, worker: &WorkerId, at: Instant) {
        self.last.insert(worker.clone(), at);
    }

    /// Stop watching `worker`.
    pub fn forget(&mut self, worker: &WorkerId) {
        self.last.remove(worker);
    }

    pub fn last_seen(&self, worker: &WorkerId) -> Option<Instant> {
        self.last.get(worker).copied()
    }

    /// Whether `worker` is watched and its last heartbeat is too old.
    pub fn is_lapsed(&self, worker: &WorkerId, now: Instant) -> bool {
        self.last
            .get(worker)
            .is_some_and(|last| now.saturating_duration_since(*last) > self.timeout)
    }
}
