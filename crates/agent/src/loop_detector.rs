//! Emergent-loop detection
//!
//! An emergent loop is the same `(from_state, to_state)` pair observed
//! three or more times within five minutes for one session. The
//! historical defect (a second writer resurrecting stale state) produced
//! exactly this signature; whatever the cause, the session is forcibly
//! cancelled rather than allowed to spin.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use concierge_core::ContractState;

const DEFAULT_WINDOW: Duration = Duration::from_secs(300);
const DEFAULT_THRESHOLD: usize = 3;

struct Observation {
    from: ContractState,
    to: ContractState,
    at: Instant,
}

/// Sliding-window transition counter per session.
pub struct LoopDetector {
    window: Duration,
    threshold: usize,
    observations: DashMap<String, Vec<Observation>>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_WINDOW, DEFAULT_THRESHOLD)
    }

    pub fn with_limits(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            observations: DashMap::new(),
        }
    }

    /// Record a transition; returns true when this session has now seen
    /// this `(from, to)` pair `threshold` times within the window.
    pub fn observe(&self, session_id: &str, from: ContractState, to: ContractState) -> bool {
        let now = Instant::now();
        let mut entries = self.observations.entry(session_id.to_string()).or_default();

        entries.retain(|o| now.duration_since(o.at) <= self.window);
        entries.push(Observation { from, to, at: now });

        let count = entries
            .iter()
            .filter(|o| o.from == from && o.to == to)
            .count();

        if count >= self.threshold {
            tracing::error!(
                session_id = %session_id,
                from = %from,
                to = %to,
                count,
                "emergent loop detected, session will be cancelled"
            );
            return true;
        }
        false
    }

    /// Forget a session (after terminal transition or eviction).
    pub fn clear(&self, session_id: &str) {
        self.observations.remove(session_id);
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_on_third_repeat() {
        let detector = LoopDetector::new();
        let (from, to) = (ContractState::Search, ContractState::RefineConstraints);

        assert!(!detector.observe("s1", from, to));
        assert!(!detector.observe("s1", from, to));
        assert!(detector.observe("s1", from, to));
    }

    #[test]
    fn test_distinct_pairs_do_not_accumulate() {
        let detector = LoopDetector::new();

        assert!(!detector.observe("s1", ContractState::Start, ContractState::Search));
        assert!(!detector.observe("s1", ContractState::Search, ContractState::MatchPreferences));
        assert!(!detector.observe(
            "s1",
            ContractState::MatchPreferences,
            ContractState::PresentOptions
        ));
    }

    #[test]
    fn test_sessions_are_independent() {
        let detector = LoopDetector::new();
        let (from, to) = (ContractState::Search, ContractState::RefineConstraints);

        detector.observe("s1", from, to);
        detector.observe("s1", from, to);
        assert!(!detector.observe("s2", from, to));
    }

    #[test]
    fn test_window_expires_observations() {
        let detector = LoopDetector::with_limits(Duration::from_millis(10), 3);
        let (from, to) = (ContractState::Search, ContractState::RefineConstraints);

        detector.observe("s1", from, to);
        detector.observe("s1", from, to);
        std::thread::sleep(Duration::from_millis(30));
        // The earlier observations aged out.
        assert!(!detector.observe("s1", from, to));
    }

    #[test]
    fn test_clear() {
        let detector = LoopDetector::new();
        let (from, to) = (ContractState::Search, ContractState::RefineConstraints);

        detector.observe("s1", from, to);
        detector.observe("s1", from, to);
        detector.clear("s1");
        assert!(!detector.observe("s1", from, to));
    }
}
