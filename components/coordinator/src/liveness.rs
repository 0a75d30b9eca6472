use std::{collections::HashMap, time::Duration};

use model::ReplicaId;
use tokio::time::Instant;

#[cfg(test)]
use mockall::automock;

/// Out-of-band knowledge about replica health, e.g. a closed connection or a failed heartbeat.
///
/// The coordinator consults it on every liveness check, in addition to its own request timeout.
#[cfg_attr(test, automock)]
pub trait HealthSignal: Send {
    /// `false` once the replica is known to be gone.
    fn is_alive(&self, replica: ReplicaId) -> bool;
}

/// Health signal for deployments relying on request timeouts alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeoutOnly;

impl HealthSignal for TimeoutOnly {
    fn is_alive(&self, _replica: ReplicaId) -> bool {
        true
    }
}

/// Tracks when each replica was last heard of.
#[derive(Debug)]
pub(crate) struct LivenessTracker {
    timeout: Duration,

    last_seen: HashMap<ReplicaId, Instant>,

    /// Last time any replica talked to the coordinator, or its creation.
    last_activity: Instant,
}

impl LivenessTracker {
    pub(crate) fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_seen: HashMap::new(),
            last_activity: now,
        }
    }

    pub(crate) fn on_request(&mut self, replica: ReplicaId, now: Instant) {
        self.last_seen.insert(replica, now);
        self.last_activity = now;
    }

    /// Record activity that is not a request, such as the start of reading.
    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub(crate) fn forget(&mut self, replica: ReplicaId) {
        self.last_seen.remove(&replica);
    }

    /// Whether `replica` has been silent for longer than the timeout.
    pub(crate) fn is_expired(&self, replica: ReplicaId, now: Instant) -> bool {
        match self.last_seen.get(&replica) {
            Some(last) => now.saturating_duration_since(*last) > self.timeout,
            None => true,
        }
    }

    /// Whether no replica at all has been heard of for longer than the timeout.
    pub(crate) fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > self.timeout
    }

    pub(crate) fn silence(&self, replica: ReplicaId, now: Instant) -> Option<Duration> {
        self.last_seen
            .get(&replica)
            .map(|last| now.saturating_duration_since(*last))
    }
}
