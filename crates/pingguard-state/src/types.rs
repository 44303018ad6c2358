//! Domain types for the pingguard state store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The target answered within the timeout.
    Success { latency_ms: f64 },
    /// The target did not answer, or the probe itself failed.
    Failure,
}

impl ProbeOutcome {
    /// A successful probe. Negative or NaN latencies are clamped to zero.
    pub fn success(latency_ms: f64) -> Self {
        ProbeOutcome::Success {
            latency_ms: latency_ms.max(0.0),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ProbeOutcome::Failure)
    }

    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            ProbeOutcome::Success { latency_ms } => Some(*latency_ms),
            ProbeOutcome::Failure => None,
        }
    }
}

/// One probe result. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRecord {
    id: String,
    /// Unix timestamp (seconds) when the probe completed.
    timestamp: u64,
    outcome: ProbeOutcome,
}

impl PingRecord {
    /// Create a record with a freshly generated id.
    pub fn new(outcome: ProbeOutcome, timestamp: u64) -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string(), outcome, timestamp)
    }

    /// Create a record with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, outcome: ProbeOutcome, timestamp: u64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            outcome,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn outcome(&self) -> ProbeOutcome {
        self.outcome
    }

    pub fn failed(&self) -> bool {
        self.outcome.is_failure()
    }
}

/// Persisted remediation cooldown state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationState {
    /// Unix timestamp (seconds) of the last successful remediation.
    /// `None` means remediation never ran.
    pub last_triggered_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = PingRecord::new(ProbeOutcome::Failure, 1000);
        let b = PingRecord::new(ProbeOutcome::Failure, 1000);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn success_clamps_negative_latency() {
        assert_eq!(ProbeOutcome::success(-3.0).latency_ms(), Some(0.0));
        assert_eq!(ProbeOutcome::success(12.5).latency_ms(), Some(12.5));
        assert_eq!(ProbeOutcome::Failure.latency_ms(), None);
    }

    #[test]
    fn outcome_json_is_tagged() {
        let json = serde_json::to_string(&ProbeOutcome::success(4.0)).unwrap();
        assert_eq!(json, r#"{"status":"success","latency_ms":4.0}"#);
        let json = serde_json::to_string(&ProbeOutcome::Failure).unwrap();
        assert_eq!(json, r#"{"status":"failure"}"#);
    }
}
