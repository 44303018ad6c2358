//! Bounded per-target ping history.
//!
//! A [`HealthHistory`] keeps the most recent probe results for one target
//! in insertion order. Inserting into a full window evicts the
//! least-recently inserted record first. Timestamps are caller-supplied and
//! never used for ordering, so a clock jump cannot reshuffle the window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::warn;

use pingguard_core::TargetId;

use crate::types::{PingRecord, ProbeOutcome};

/// Number of records a history retains (four kept plus the newest).
pub const HISTORY_CAPACITY: usize = 5;

/// Ordered, bounded collection of probe results for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthHistory {
    target: TargetId,
    #[serde(default)]
    records: VecDeque<PingRecord>,
}

impl HealthHistory {
    /// An empty history for `target`.
    pub fn new(target: TargetId) -> Self {
        Self {
            target,
            records: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    /// Records from oldest to newest.
    pub fn records(&self) -> impl ExactSizeIterator<Item = &PingRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Build a record for a probe result and append it.
    pub fn record_probe(&mut self, outcome: ProbeOutcome, timestamp: u64) {
        self.insert(PingRecord::new(outcome, timestamp));
    }

    /// Append `record`, evicting the oldest entries to stay within
    /// [`HISTORY_CAPACITY`].
    ///
    /// Returns `false` and leaves the history untouched when a record with
    /// the same id is already present.
    pub fn insert(&mut self, record: PingRecord) -> bool {
        if self.records.iter().any(|r| r.id() == record.id()) {
            warn!(
                target_ip = %self.target,
                id = record.id(),
                "ping record already present, not adding"
            );
            return false;
        }

        while self.records.len() >= HISTORY_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
        true
    }

    /// Fraction of retained records that succeeded, in `[0, 1]`.
    ///
    /// An empty history counts as fully healthy.
    pub fn valid_percentage(&self) -> f64 {
        if self.records.is_empty() {
            return 1.0;
        }
        let valid = self.records.iter().filter(|r| !r.failed()).count();
        valid as f64 / self.records.len() as f64
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Enforce the window on data that did not pass through [`insert`](Self::insert).
    pub(crate) fn truncate_to_capacity(&mut self) {
        while self.records.len() > HISTORY_CAPACITY {
            self.records.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetId {
        "10.0.0.1".parse().unwrap()
    }

    fn ids(history: &HealthHistory) -> Vec<String> {
        history.records().map(|r| r.id().to_string()).collect()
    }

    #[test]
    fn empty_history_is_fully_valid() {
        let history = HealthHistory::new(target());
        assert!(history.is_empty());
        assert_eq!(history.valid_percentage(), 1.0);
    }

    #[test]
    fn valid_percentage_counts_successes() {
        let mut history = HealthHistory::new(target());
        for failed in [false, true, false, true, false] {
            let outcome = if failed {
                ProbeOutcome::Failure
            } else {
                ProbeOutcome::success(10.0)
            };
            history.record_probe(outcome, 1000);
        }
        assert_eq!(history.len(), 5);
        assert!((history.valid_percentage() - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut history = HealthHistory::new(target());
        for i in 0..20 {
            history.record_probe(ProbeOutcome::Failure, i);
            assert!(history.len() <= HISTORY_CAPACITY);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn eviction_is_fifo_regardless_of_timestamp() {
        let mut history = HealthHistory::new(target());
        // Timestamps deliberately out of order.
        for (i, ts) in [500u64, 100, 900, 50, 700].iter().enumerate() {
            history.insert(PingRecord::with_id(format!("r{i}"), ProbeOutcome::Failure, *ts));
        }
        assert_eq!(ids(&history), ["r0", "r1", "r2", "r3", "r4"]);

        history.insert(PingRecord::with_id("r5", ProbeOutcome::Failure, 1));
        assert_eq!(ids(&history), ["r1", "r2", "r3", "r4", "r5"]);

        history.insert(PingRecord::with_id("r6", ProbeOutcome::Failure, 10_000));
        assert_eq!(ids(&history), ["r2", "r3", "r4", "r5", "r6"]);
    }

    #[test]
    fn duplicate_id_is_a_no_op() {
        let mut history = HealthHistory::new(target());
        assert!(history.insert(PingRecord::with_id("a", ProbeOutcome::success(1.0), 1)));
        assert!(history.insert(PingRecord::with_id("b", ProbeOutcome::Failure, 2)));
        let before = history.clone();

        assert!(!history.insert(PingRecord::with_id("a", ProbeOutcome::Failure, 3)));
        assert_eq!(history, before);
    }

    #[test]
    fn duplicate_in_full_window_does_not_evict() {
        let mut history = HealthHistory::new(target());
        for i in 0..HISTORY_CAPACITY {
            history.insert(PingRecord::with_id(format!("r{i}"), ProbeOutcome::Failure, 0));
        }
        let before = history.clone();
        assert!(!history.insert(PingRecord::with_id("r4", ProbeOutcome::Failure, 0)));
        assert_eq!(history, before);
    }

    #[test]
    fn recovery_pushes_out_old_failures() {
        let mut history = HealthHistory::new(target());
        for _ in 0..HISTORY_CAPACITY {
            history.record_probe(ProbeOutcome::Failure, 0);
        }
        assert_eq!(history.valid_percentage(), 0.0);

        for _ in 0..3 {
            history.record_probe(ProbeOutcome::success(5.0), 1);
        }
        assert!((history.valid_percentage() - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_empties_history() {
        let mut history = HealthHistory::new(target());
        history.record_probe(ProbeOutcome::Failure, 0);
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.valid_percentage(), 1.0);
    }

    #[test]
    fn truncate_drops_oldest() {
        let mut history = HealthHistory::new(target());
        for i in 0..8 {
            history
                .records
                .push_back(PingRecord::with_id(format!("r{i}"), ProbeOutcome::Failure, 0));
        }
        history.truncate_to_capacity();
        assert_eq!(ids(&history), ["r3", "r4", "r5", "r6", "r7"]);
    }
}
