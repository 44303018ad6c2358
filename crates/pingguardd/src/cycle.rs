//! One pingguard check cycle, plus the status and reset operations.

use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pingguard_core::{epoch_secs, ConfigError, PingguardConfig, TargetGroup};
use pingguard_health::{evaluate, is_failing, EscalationDecision, HealthMonitor, ProbeReport, Prober};
use pingguard_remediate::{Actuator, CooldownStatus, RemediationGate, RemediationOutcome, RemediationPolicy};
use pingguard_state::StateStore;

/// What one cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub probes: Vec<ProbeReport>,
    pub decision: EscalationDecision,
    pub outcome: RemediationOutcome,
}

/// Current state of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target: IpAddr,
    pub group: TargetGroup,
    pub records: usize,
    pub valid_percentage: f64,
    pub failing: bool,
}

/// Snapshot printed by `pingguardd status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub targets: Vec<TargetStatus>,
    pub decision: EscalationDecision,
    pub cooldown: CooldownStatus,
    pub last_triggered_at: Option<u64>,
    pub remediation_enabled: bool,
}

/// The assembled monitor: config, probes, gate, and actuator.
pub struct Pingguard<P, A> {
    config: PingguardConfig,
    state: StateStore,
    monitor: HealthMonitor<P>,
    gate: RemediationGate,
    actuator: Option<A>,
}

impl<P: Prober, A: Actuator> Pingguard<P, A> {
    pub fn new(
        config: PingguardConfig,
        state: StateStore,
        prober: P,
        actuator: Option<A>,
    ) -> Result<Self, ConfigError> {
        let monitor = HealthMonitor::new(state.clone(), prober, config.probe_timeout()?);
        let gate = RemediationGate::new(state.clone(), RemediationPolicy::from_config(&config)?);
        Ok(Self {
            config,
            state,
            monitor,
            gate,
            actuator,
        })
    }

    pub fn config(&self) -> &PingguardConfig {
        &self.config
    }

    /// Probe every target, evaluate, and remediate if warranted.
    ///
    /// Never fails: probe and actuator errors end up in the report.
    pub async fn run_cycle(&self) -> CycleReport {
        let targets = self.config.all_targets();
        let probes = self.monitor.probe_all(&targets).await;
        let decision = self.decide(&targets);

        match decision.rule {
            Some(rule) => error!(
                failed_local = ?decision.failed_local,
                failed_global = ?decision.failed_global,
                "{}, restarting network device",
                rule.describe()
            ),
            None if decision.failed_local.is_empty() && decision.failed_global.is_empty() => {
                info!(targets = targets.len(), "check finished, no targets failing")
            }
            None => info!(
                failed_local = ?decision.failed_local,
                failed_global = ?decision.failed_global,
                "check finished, failures below escalation thresholds"
            ),
        }

        let outcome = self
            .gate
            .maybe_remediate(&decision, self.actuator.as_ref(), &targets)
            .await;

        CycleReport {
            probes,
            decision,
            outcome,
        }
    }

    /// Run cycles every `interval` until `shutdown` turns true.
    ///
    /// If the shutdown sender goes away without signalling, monitoring
    /// carries on and only the process exit stops it.
    pub async fn watch(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "pingguard watching");
        let mut listening = true;

        loop {
            let report = self.run_cycle().await;
            if let RemediationOutcome::Failed { reason } = &report.outcome {
                error!(%reason, "remediation failed, retrying next cycle");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed(), if listening => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        info!("pingguard shutting down");
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => {
                        warn!("shutdown channel closed, watching until the process exits");
                        listening = false;
                    }
                },
            }
        }
    }

    /// Current histories, classification, and cooldown, without probing.
    pub fn status(&self) -> StatusReport {
        let targets = self.config.all_targets();
        let histories = self.monitor.load_histories(&targets);
        let thresholds = &self.config.thresholds;

        let statuses = self
            .config
            .grouped_targets()
            .into_iter()
            .filter_map(|(target, group)| {
                let history = histories.get(&target)?;
                Some(TargetStatus {
                    target,
                    group,
                    records: history.len(),
                    valid_percentage: history.valid_percentage(),
                    failing: is_failing(history, thresholds),
                })
            })
            .collect();

        // Read the cooldown first: it may pull a future stamp back to now.
        let cooldown = self.gate.cooldown_status(epoch_secs());
        let last_triggered_at = self
            .state
            .load_remediation_state()
            .ok()
            .and_then(|s| s.last_triggered_at);

        StatusReport {
            targets: statuses,
            decision: self.decide(&targets),
            cooldown,
            last_triggered_at,
            remediation_enabled: self.gate.policy().enabled
                && (self.actuator.is_some() || self.config.actuator.is_some()),
        }
    }

    /// Clear every target's history. Returns how many were cleared.
    pub fn reset(&self) -> usize {
        self.config
            .all_targets()
            .into_iter()
            .filter(|&target| match self.state.clear_history(target) {
                Ok(_) => true,
                Err(e) => {
                    error!(target_ip = %target, error = %e, "failed to clear history");
                    false
                }
            })
            .count()
    }

    fn decide(&self, targets: &[IpAddr]) -> EscalationDecision {
        let histories = self.monitor.load_histories(targets);
        evaluate(
            &self.config.targets.local,
            &self.config.targets.global,
            &histories,
            &self.config.thresholds,
        )
    }
}
