//! Per-role consecutive-failure tracking. Unlike the router's circuit
//! breaker (which skips a model once its circuit opens), agent roles are
//! never skipped — MAKER's candidate/vote fault tolerance already absorbs
//! missing candidates — so this tracker only logs a degraded warning and
//! exposes counts for `/healthz`-style introspection.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use super::AgentRole;

pub struct DegradationTracker {
    consecutive_failures: Mutex<HashMap<AgentRole, u32>>,
    warn_threshold: u32,
}

impl DegradationTracker {
    pub fn new(warn_threshold: u32) -> Self {
        Self { consecutive_failures: Mutex::new(HashMap::new()), warn_threshold }
    }

    pub fn record_success(&self, role: AgentRole) {
        if let Ok(mut map) = self.consecutive_failures.lock() {
            map.insert(role, 0);
        }
    }

    pub fn record_failure(&self, role: AgentRole) {
        if let Ok(mut map) = self.consecutive_failures.lock() {
            let count = map.entry(role).or_insert(0);
            *count += 1;
            if *count >= self.warn_threshold {
                warn!(?role, consecutive_failures = *count, "agent role degraded");
            }
        }
    }

    pub fn consecutive_failures(&self, role: AgentRole) -> u32 {
        self.consecutive_failures
            .lock()
            .ok()
            .and_then(|m| m.get(&role).copied())
            .unwrap_or(0)
    }

    pub fn is_degraded(&self, role: AgentRole) -> bool {
        self.consecutive_failures(role) >= self.warn_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_degraded_after_threshold() {
        let tracker = DegradationTracker::new(2);
        tracker.record_failure(AgentRole::Coder);
        assert!(!tracker.is_degraded(AgentRole::Coder));
        tracker.record_failure(AgentRole::Coder);
        assert!(tracker.is_degraded(AgentRole::Coder));
        tracker.record_success(AgentRole::Coder);
        assert!(!tracker.is_degraded(AgentRole::Coder));
    }
}
