//! Escalation evaluator — decides from target histories whether to remediate.
//!
//! Pure: the result depends only on the target lists, the histories, and
//! the thresholds passed in.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::Serialize;

use pingguard_core::Thresholds;
use pingguard_state::HealthHistory;

/// Which escalation rule requested remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationRule {
    /// At least one local and one global target are failing.
    LocalAndGlobal,
    /// More than the quorum of global targets are failing.
    GlobalMajority,
    /// More than the quorum of local targets are failing.
    LocalMajority,
}

impl EscalationRule {
    pub fn describe(&self) -> &'static str {
        match self {
            EscalationRule::LocalAndGlobal => "at least one global and one local target failed",
            EscalationRule::GlobalMajority => "more than the quorum of global targets failed",
            EscalationRule::LocalMajority => "more than the quorum of local targets failed",
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EscalationDecision {
    /// Failing local targets, in configuration order.
    pub failed_local: Vec<IpAddr>,
    /// Failing global targets, in configuration order.
    pub failed_global: Vec<IpAddr>,
    /// First rule that fired, if any.
    pub rule: Option<EscalationRule>,
}

impl EscalationDecision {
    pub fn should_remediate(&self) -> bool {
        self.rule.is_some()
    }
}

/// Whether a target's history classifies it as failing.
pub fn is_failing(history: &HealthHistory, thresholds: &Thresholds) -> bool {
    history.valid_percentage() < thresholds.failure_rate
}

/// Classify every target and apply the escalation rules in order.
///
/// Targets without an entry in `histories` count as healthy.
pub fn evaluate(
    local: &[IpAddr],
    global: &[IpAddr],
    histories: &HashMap<IpAddr, HealthHistory>,
    thresholds: &Thresholds,
) -> EscalationDecision {
    let failing = |targets: &[IpAddr]| -> Vec<IpAddr> {
        targets
            .iter()
            .filter(|ip| {
                histories
                    .get(ip)
                    .is_some_and(|history| is_failing(history, thresholds))
            })
            .copied()
            .collect()
    };
    let failed_local = failing(local);
    let failed_global = failing(global);

    let over_quorum =
        |failed: usize, total: usize| failed as f64 > thresholds.group_quorum * total as f64;

    let rule = if !failed_local.is_empty() && !failed_global.is_empty() {
        Some(EscalationRule::LocalAndGlobal)
    } else if over_quorum(failed_global.len(), global.len()) {
        Some(EscalationRule::GlobalMajority)
    } else if over_quorum(failed_local.len(), local.len()) {
        Some(EscalationRule::LocalMajority)
    } else {
        None
    };

    EscalationDecision {
        failed_local,
        failed_global,
        rule,
    }
}
