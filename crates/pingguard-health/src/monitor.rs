//! Health monitor — probes targets and records results in the state store.
//!
//! Each target is probed in its own tokio task. Every probe is bounded by
//! the configured timeout, and any probe error is recorded as a failed
//! ping rather than propagated.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use pingguard_core::epoch_secs;
use pingguard_state::{HealthHistory, ProbeOutcome, StateStore};

use crate::checker::{ProbeError, Prober};

/// Extra time granted to a prober before the monitor cuts it off.
const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Result of probing one target in a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub target: IpAddr,
    pub outcome: ProbeOutcome,
    /// Valid percentage of the target's history after recording.
    pub valid_percentage: f64,
}

/// Probes configured targets and maintains their histories.
pub struct HealthMonitor<P> {
    state: StateStore,
    prober: Arc<P>,
    timeout: Duration,
}

impl<P: Prober> HealthMonitor<P> {
    /// Create a monitor that bounds each probe by `timeout`.
    pub fn new(state: StateStore, prober: P, timeout: Duration) -> Self {
        Self {
            state,
            prober: Arc::new(prober),
            timeout,
        }
    }

    /// Probe one target and turn the result into an outcome.
    pub async fn check_target(&self, target: IpAddr) -> ProbeOutcome {
        probe_once(self.prober.as_ref(), target, self.timeout).await
    }

    /// Probe every target concurrently and append each result to its
    /// stored history. Reports come back in the order of `targets`.
    pub async fn probe_all(&self, targets: &[IpAddr]) -> Vec<ProbeReport> {
        let mut tasks = JoinSet::new();
        for &target in targets {
            let prober = self.prober.clone();
            let state = self.state.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = probe_once(prober.as_ref(), target, timeout).await;
                record(&state, target, outcome)
            });
        }

        let mut reports = HashMap::with_capacity(targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    reports.insert(report.target, report);
                }
                Err(e) => error!(error = %e, "probe task failed"),
            }
        }

        targets
            .iter()
            .filter_map(|target| reports.remove(target))
            .collect()
    }

    /// Load the stored history of every target.
    ///
    /// A target whose history cannot be read is reported as empty.
    pub fn load_histories(&self, targets: &[IpAddr]) -> HashMap<IpAddr, HealthHistory> {
        targets
            .iter()
            .map(|&target| {
                let history = self.state.load_history(target).unwrap_or_else(|e| {
                    error!(target_ip = %target, error = %e, "failed to load history, treating as empty");
                    HealthHistory::new(target)
                });
                (target, history)
            })
            .collect()
    }
}

async fn probe_once<P: Prober>(prober: &P, target: IpAddr, timeout: Duration) -> ProbeOutcome {
    let result = match tokio::time::timeout(timeout + PROBE_GRACE, prober.probe(target, timeout)).await
    {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };

    match result {
        Ok(latency_ms) => {
            debug!(target_ip = %target, latency_ms, "ping succeeded");
            ProbeOutcome::success(latency_ms)
        }
        Err(e) => {
            warn!(target_ip = %target, error = %e, "ping failed");
            ProbeOutcome::Failure
        }
    }
}

fn record(state: &StateStore, target: IpAddr, outcome: ProbeOutcome) -> ProbeReport {
    let valid_percentage = match state.record_probe(target, outcome, epoch_secs()) {
        Ok(history) => history.valid_percentage(),
        Err(e) => {
            error!(target_ip = %target, error = %e, "failed to record probe");
            f64::NAN
        }
    };
    ProbeReport {
        target,
        outcome,
        valid_percentage,
    }
}
