//! Worker lifecycle state machine.
//!
//! ```text
//! Spawning -> Running -> (Healthy <-> Degraded) -> Restarting -> Running
//!                                                            \-> Stopped
//! any non-terminal state (and Stopped) -> Shutdown
//! ```

use std::fmt;

use crate::heartbeat::WorkerStatus;

/// Lifecycle state of one worker, owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Running,
    Healthy,
    Degraded,
    Restarting,
    /// Restart budget exhausted; no further recovery.
    Stopped,
    Shutdown,
}

/// Inputs that move a worker between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Spawned,
    SpawnFailed,
    Heartbeat(WorkerStatus),
    Lapsed,
    BudgetExhausted,
    Shutdown,
}

impl WorkerState {
    /// State after `event`, or `None` if the event does not apply.
    pub fn next(self, event: &LifecycleEvent) -> Option<WorkerState> {
        use LifecycleEvent as E;
        use WorkerState as S;

        match (self, event) {
            (S::Shutdown, _) => None,
            (_, E::Shutdown) => Some(S::Shutdown),

            (S::Spawning | S::Restarting, E::Spawned) => Some(S::Running),
            (S::Spawning | S::Restarting, E::SpawnFailed) => Some(S::Restarting),

            (S::Running | S::Healthy | S::Degraded, E::Heartbeat(WorkerStatus::Ok)) => {
                Some(S::Healthy)
            }
            (S::Running | S::Healthy | S::Degraded, E::Heartbeat(WorkerStatus::Degraded(_))) => {
                Some(S::Degraded)
            }

            (S::Running | S::Healthy | S::Degraded | S::Restarting, E::Lapsed) => {
                Some(S::Restarting)
            }
            (S::Restarting, E::BudgetExhausted) => Some(S::Stopped),

            _ => None,
        }
    }

    /// Whether the worker should have a live task.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            WorkerState::Running | WorkerState::Healthy | WorkerState::Degraded
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Shutdown)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Spawning => "SPAWNING",
            WorkerState::Running => "RUNNING",
            WorkerState::Healthy => "HEALTHY",
            WorkerState::Degraded => "DEGRADED",
            WorkerState::Restarting => "RESTARTING",
            WorkerState::Stopped => "STOPPED",
            WorkerState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleEvent as E;
    use WorkerState as S;

    #[test]
    fn test_happy_path() {
        let s = S::Spawning.next(&E::Spawned).unwrap();
        assert_eq!(s, S::Running);
        let s = s.next(&E::Heartbeat(WorkerStatus::Ok)).unwrap();
        assert_eq!(s, S::Healthy);
        let s = s
            .next(&E::Heartbeat(WorkerStatus::Degraded("slow".to_string())))
            .unwrap();
        assert_eq!(s, S::Degraded);
        assert_eq!(s.next(&E::Heartbeat(WorkerStatus::Ok)), Some(S::Healthy));
    }

    #[test]
    fn test_restart_paths() {
        let s = S::Healthy.next(&E::Lapsed).unwrap();
        assert_eq!(s, S::Restarting);
        assert_eq!(s.next(&E::Spawned), Some(S::Running));
        assert_eq!(s.next(&E::SpawnFailed), Some(S::Restarting));
        assert_eq!(s.next(&E::BudgetExhausted), Some(S::Stopped));
    }

    #[test]
    fn test_terminal_states() {
        assert_eq!(S::Stopped.next(&E::Lapsed), None);
        assert_eq!(S::Stopped.next(&E::Heartbeat(WorkerStatus::Ok)), None);
        assert_eq!(S::Stopped.next(&E::Shutdown), Some(S::Shutdown));
        assert_eq!(S::Shutdown.next(&E::Spawned), None);
        assert_eq!(S::Shutdown.next(&E::Shutdown), None);
    }

    #[test]
    fn test_heartbeat_ignored_while_restarting() {
        assert_eq!(S::Restarting.next(&E::Heartbeat(WorkerStatus::Ok)), None);
        assert_eq!(S::Spawning.next(&E::Heartbeat(WorkerStatus::Ok)), None);
    }
}
