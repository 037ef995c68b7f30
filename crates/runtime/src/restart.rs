//! Sliding-window restart limiter.
//!
//! A restart is allowed iff fewer than `max_restarts` restarts happened
//! within the last `window`. Every attempt that is allowed takes a slot,
//! whether or not the replacement comes up.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ppewatch_common::config::SupervisorConfig;

/// Restart budget shared by all workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.max_restarts, config.restart_window)
    }
}

/// Restart timestamps of one worker, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RestartWindow {
    restarts: VecDeque<Instant>,
}

impl RestartWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a restart slot at `now` if the policy allows it.
    pub fn try_acquire(&mut self, policy: &RestartPolicy, now: Instant) -> bool {
        self.prune(policy, now);
        if self.restarts.len() >= policy.max_restarts as usize {
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    /// Restarts still inside the window at `now`.
    pub fn count(&self, policy: &RestartPolicy, now: Instant) -> usize {
        self.restarts
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < policy.window)
            .count()
    }

    fn prune(&mut self, policy: &RestartPolicy, now: Instant) {
        while let Some(oldest) = self.restarts.front() {
            if now.saturating_duration_since(*oldest) >= policy.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
    }
}
