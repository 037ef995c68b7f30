//! Time-limited duplicate suppression.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Identity of a violation for deduplication: who, and what they were missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViolationKey {
    pub track_id: u64,
    pub missing: BTreeSet<String>,
}

impl ViolationKey {
    pub fn new(track_id: u64, missing: BTreeSet<String>) -> Self {
        Self { track_id, missing }
    }
}

/// Keys that fired recently, each remembered for a fixed TTL from firing.
#[derive(Debug, Clone)]
pub struct ViolationHashes {
    ttl: Duration,
    fired: HashMap<ViolationKey, Instant>,
}

impl ViolationHashes {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            fired: HashMap::new(),
        }
    }

    /// Whether `key` fired within the last TTL.
    pub fn contains(&self, key: &ViolationKey, now: Instant) -> bool {
        self.fired
            .get(key)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.ttl)
    }

    pub fn mark(&mut self, key: ViolationKey, now: Instant) {
        self.fired.insert(key, now);
    }

    pub fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.fired
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}
