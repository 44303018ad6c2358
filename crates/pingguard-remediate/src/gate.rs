//! Remediation gate — at most one restart per cooldown window.

use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use pingguard_core::{epoch_secs, ConfigError, PingguardConfig};
use pingguard_health::EscalationDecision;
use pingguard_state::{RemediationState, StateStore};

use crate::actuator::Actuator;

/// Whether a new remediation is currently permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CooldownStatus {
    CooledDown,
    InCooldown { remaining: Duration },
}

/// Why the gate did not call the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The evaluator did not ask for remediation.
    NoEscalation,
    /// Remediation is switched off (`no_restart`, or no actuator configured).
    Disabled,
    /// A previous remediation is too recent.
    CooldownActive { remaining: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemediationOutcome {
    Skipped(SkipReason),
    /// The device was restarted at `at` (epoch seconds).
    ///
    /// `cooldown_recorded` is false when the restart time could not be
    /// persisted, so the next escalation will not be held back.
    Remediated {
        at: u64,
        cleared: usize,
        cooldown_recorded: bool,
    },
    Failed { reason: String },
}

/// Gate settings taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationPolicy {
    pub cooldown: Duration,
    pub enabled: bool,
}

impl RemediationPolicy {
    pub fn from_config(config: &PingguardConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            cooldown: config.cooldown()?,
            enabled: !config.no_restart,
        })
    }
}

/// Owns the remediation state and guards the actuator with a cooldown.
pub struct RemediationGate {
    state: StateStore,
    policy: RemediationPolicy,
    /// Serializes the remediation-state read-modify-write.
    lock: Mutex<()>,
}

impl RemediationGate {
    pub fn new(state: StateStore, policy: RemediationPolicy) -> Self {
        Self {
            state,
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> RemediationPolicy {
        self.policy
    }

    /// Cooldown state at `now` (epoch seconds).
    ///
    /// Missing or unreadable remediation state counts as cooled down.
    pub fn cooldown_status(&self, now: u64) -> CooldownStatus {
        cooldown_status(self.load_state(now), self.policy.cooldown, now)
    }

    /// Load the remediation state as seen at `now`.
    ///
    /// A restart stamped after `now` means the clock was stepped back; the
    /// stamp is pulled back to `now` and stored, so the cooldown runs out
    /// one window from here instead of waiting for the clock to catch up.
    fn load_state(&self, now: u64) -> RemediationState {
        let state = self.state.load_remediation_state().unwrap_or_else(|e| {
            error!(error = %e, "failed to load remediation state, assuming cooldown elapsed");
            RemediationState::default()
        });

        match state.last_triggered_at {
            Some(last) if last > now => {
                warn!(
                    last_triggered_at = last,
                    now, "last restart is stamped in the future, clamping to now"
                );
                let clamped = RemediationState {
                    last_triggered_at: Some(now),
                };
                if let Err(e) = self.state.save_remediation_state(&clamped) {
                    error!(error = %e, "failed to store clamped remediation time");
                }
                clamped
            }
            _ => state,
        }
    }

    /// Restart the device if `decision` asks for it and the cooldown allows.
    pub async fn maybe_remediate<A: Actuator>(
        &self,
        decision: &EscalationDecision,
        actuator: Option<&A>,
        targets: &[IpAddr],
    ) -> RemediationOutcome {
        self.maybe_remediate_at(decision, actuator, targets, epoch_secs())
            .await
    }

    /// [`maybe_remediate`](Self::maybe_remediate) with an explicit clock.
    pub async fn maybe_remediate_at<A: Actuator>(
        &self,
        decision: &EscalationDecision,
        actuator: Option<&A>,
        targets: &[IpAddr],
        now: u64,
    ) -> RemediationOutcome {
        let Some(rule) = decision.rule else {
            return RemediationOutcome::Skipped(SkipReason::NoEscalation);
        };

        let actuator = match actuator {
            Some(actuator) if self.policy.enabled => actuator,
            Some(_) => {
                warn!("no_restart is set, not restarting");
                return RemediationOutcome::Skipped(SkipReason::Disabled);
            }
            None => {
                warn!("no actuator configured, not restarting");
                return RemediationOutcome::Skipped(SkipReason::Disabled);
            }
        };

        let _guard = self.lock.lock().await;

        if let CooldownStatus::InCooldown { remaining } = self.cooldown_status(now) {
            info!(
                remaining_secs = remaining.as_secs(),
                cooldown_secs = self.policy.cooldown.as_secs(),
                "last restart too recent, skipping"
            );
            return RemediationOutcome::Skipped(SkipReason::CooldownActive { remaining });
        }

        info!(rule = rule.describe(), "restarting network device");
        match actuator.restart().await {
            Ok(ack) => {
                debug!(status = ack.status, "actuator acknowledged restart");
                let (cleared, cooldown_recorded) = self.record_restart(now, targets);
                info!(cleared, at = now, cooldown_recorded, "network device restarted");
                RemediationOutcome::Remediated {
                    at: now,
                    cleared,
                    cooldown_recorded,
                }
            }
            Err(e) => {
                error!(error = %e, "could not restart network device");
                RemediationOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Persist the restart time and clear every history.
    ///
    /// The stamp always goes first: if the combined write fails, the stamp
    /// is retried on its own before the histories are cleared one by one.
    /// Returns how many histories were cleared and whether the stamp landed.
    fn record_restart(&self, now: u64, targets: &[IpAddr]) -> (usize, bool) {
        let e = match self.state.commit_remediation(now, targets) {
            Ok(cleared) => return (cleared, true),
            Err(e) => e,
        };
        error!(error = %e, "failed to commit restart, storing restart time alone");

        let state = RemediationState {
            last_triggered_at: Some(now),
        };
        let recorded = match self.state.save_remediation_state(&state) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    error = %e,
                    "failed to persist restart time, next escalation will not be held back"
                );
                false
            }
        };
        (self.clear_all(targets), recorded)
    }

    /// Clear the history of every target. Returns how many were cleared.
    fn clear_all(&self, targets: &[IpAddr]) -> usize {
        targets
            .iter()
            .filter(|&&target| match self.state.clear_history(target) {
                Ok(_) => true,
                Err(e) => {
                    error!(target_ip = %target, error = %e, "failed to clear history");
                    false
                }
            })
            .count()
    }
}

fn cooldown_status(state: RemediationState, cooldown: Duration, now: u64) -> CooldownStatus {
    let Some(last) = state.last_triggered_at else {
        return CooldownStatus::CooledDown;
    };
    // A stamp in the future counts as "just now"; the gate clamps it when loading.
    let elapsed = Duration::from_secs(now.saturating_sub(last));
    if elapsed < cooldown {
        CooldownStatus::InCooldown {
            remaining: cooldown - elapsed,
        }
    } else {
        CooldownStatus::CooledDown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use redb::StorageBackend;
    use redb::backends::InMemoryBackend;

    use pingguard_health::EscalationRule;
    use pingguard_state::{HealthHistory, ProbeOutcome};

    use crate::actuator::{Ack, ActuatorError};

    const NOW: u64 = 1_700_000_000;
    const MINUTE: u64 = 60;

    struct MockActuator {
        result: Result<Ack, ActuatorError>,
        calls: AtomicUsize,
        /// Flipped on restart, to break storage right after the device goes down.
        on_restart: Option<Arc<AtomicBool>>,
    }

    impl MockActuator {
        fn ok() -> Self {
            Self {
                result: Ok(Ack { status: 204 }),
                calls: AtomicUsize::new(0),
                on_restart: None,
            }
        }

        fn failing() -> Self {
            Self {
                result: Err(ActuatorError::Rejected {
                    status: 500,
                    body: "controller busy".to_string(),
                }),
                calls: AtomicUsize::new(0),
                on_restart: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Actuator for MockActuator {
        async fn restart(&self) -> Result<Ack, ActuatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(flag) = &self.on_restart {
                flag.store(true, Ordering::SeqCst);
            }
            self.result.clone()
        }
    }

    /// In-memory storage whose writes start failing once `broken` is set.
    #[derive(Debug)]
    struct BreakableBackend {
        inner: InMemoryBackend,
        broken: Arc<AtomicBool>,
    }

    impl BreakableBackend {
        fn check(&self) -> Result<(), io::Error> {
            if self.broken.load(Ordering::SeqCst) {
                Err(io::Error::other("disk gone"))
            } else {
                Ok(())
            }
        }
    }

    impl StorageBackend for BreakableBackend {
        fn len(&self) -> Result<u64, io::Error> {
            StorageBackend::len(&self.inner)
        }

        fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), io::Error> {
            StorageBackend::read(&self.inner, offset, out)
        }

        fn set_len(&self, len: u64) -> Result<(), io::Error> {
            self.check()?;
            StorageBackend::set_len(&self.inner, len)
        }

        fn sync_data(&self) -> Result<(), io::Error> {
            self.check()?;
            StorageBackend::sync_data(&self.inner)
        }

        fn write(&self, offset: u64, data: &[u8]) -> Result<(), io::Error> {
            self.check()?;
            StorageBackend::write(&self.inner, offset, data)
        }
    }

    fn policy() -> RemediationPolicy {
        RemediationPolicy {
            cooldown: Duration::from_secs(30 * MINUTE),
            enabled: true,
        }
    }

    fn escalating() -> EscalationDecision {
        EscalationDecision {
            rule: Some(EscalationRule::GlobalMajority),
            ..Default::default()
        }
    }

    fn targets() -> Vec<IpAddr> {
        vec!["10.0.0.1".parse().unwrap(), "1.1.1.1".parse().unwrap()]
    }

    fn seeded_store() -> StateStore {
        seed(StateStore::open_in_memory().unwrap())
    }

    fn seed(store: StateStore) -> StateStore {
        for target in targets() {
            store.record_probe(target, ProbeOutcome::Failure, NOW).unwrap();
            store.record_probe(target, ProbeOutcome::Failure, NOW).unwrap();
        }
        store
    }

    fn triggered_at(store: &StateStore, at: u64) {
        store
            .save_remediation_state(&RemediationState {
                last_triggered_at: Some(at),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn no_escalation_skips() {
        let gate = RemediationGate::new(seeded_store(), policy());
        let actuator = MockActuator::ok();

        let outcome = gate
            .maybe_remediate_at(&EscalationDecision::default(), Some(&actuator), &targets(), NOW)
            .await;

        assert_eq!(outcome, RemediationOutcome::Skipped(SkipReason::NoEscalation));
        assert_eq!(actuator.calls(), 0);
    }

    #[tokio::test]
    async fn disabled_policy_skips() {
        let gate = RemediationGate::new(
            seeded_store(),
            RemediationPolicy {
                enabled: false,
                ..policy()
            },
        );
        let actuator = MockActuator::ok();

        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;

        assert_eq!(outcome, RemediationOutcome::Skipped(SkipReason::Disabled));
        assert_eq!(actuator.calls(), 0);
    }

    #[tokio::test]
    async fn missing_actuator_skips() {
        let gate = RemediationGate::new(seeded_store(), policy());

        let outcome = gate
            .maybe_remediate_at::<MockActuator>(&escalating(), None, &targets(), NOW)
            .await;

        assert_eq!(outcome, RemediationOutcome::Skipped(SkipReason::Disabled));
    }

    #[tokio::test]
    async fn recent_restart_suppresses_actuator() {
        let store = seeded_store();
        triggered_at(&store, NOW - 5 * MINUTE);
        let gate = RemediationGate::new(store.clone(), policy());
        let actuator = MockActuator::ok();

        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;

        assert_eq!(
            outcome,
            RemediationOutcome::Skipped(SkipReason::CooldownActive {
                remaining: Duration::from_secs(25 * MINUTE)
            })
        );
        assert_eq!(actuator.calls(), 0);
        // Histories untouched.
        for target in targets() {
            assert_eq!(store.load_history(target).unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn first_run_remediates_and_resets() {
        let store = seeded_store();
        let gate = RemediationGate::new(store.clone(), policy());
        let actuator = MockActuator::ok();

        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;

        assert_eq!(
            outcome,
            RemediationOutcome::Remediated {
                at: NOW,
                cleared: 2,
                cooldown_recorded: true
            }
        );
        assert_eq!(actuator.calls(), 1);
        for target in targets() {
            assert!(store.load_history(target).unwrap().is_empty());
            let backups = store.list_backups(&target.to_string()).unwrap();
            assert_eq!(backups.len(), 1);
            let raw = store.get_backup(&backups[0]).unwrap().unwrap();
            let before: HealthHistory = serde_json::from_slice(&raw).unwrap();
            assert_eq!(before.len(), 2);
        }
        assert_eq!(
            store.load_remediation_state().unwrap().last_triggered_at,
            Some(NOW)
        );
    }

    #[tokio::test]
    async fn future_stamp_is_pulled_back_to_now() {
        let store = seeded_store();
        triggered_at(&store, NOW + 365 * 24 * 60 * MINUTE);
        let gate = RemediationGate::new(store.clone(), policy());
        let actuator = MockActuator::ok();

        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;
        assert_eq!(
            outcome,
            RemediationOutcome::Skipped(SkipReason::CooldownActive {
                remaining: Duration::from_secs(30 * MINUTE)
            })
        );
        assert_eq!(
            store.load_remediation_state().unwrap().last_triggered_at,
            Some(NOW)
        );

        // The wait shrinks as the clock moves on.
        assert_eq!(
            gate.cooldown_status(NOW + 10 * MINUTE),
            CooldownStatus::InCooldown {
                remaining: Duration::from_secs(20 * MINUTE)
            }
        );

        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW + 31 * MINUTE)
            .await;
        assert!(matches!(outcome, RemediationOutcome::Remediated { .. }));
        assert_eq!(actuator.calls(), 1);
    }

    #[tokio::test]
    async fn restart_stamp_lands_with_cleared_histories() {
        let store = seeded_store();
        let gate = RemediationGate::new(store.clone(), policy());
        let actuator = MockActuator::ok();

        gate.maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;

        // The stamp and the clears are one write; a later escalation sees both.
        assert_eq!(
            store.load_remediation_state().unwrap().last_triggered_at,
            Some(NOW)
        );
        assert!(
            targets()
                .into_iter()
                .all(|t| store.load_history(t).unwrap().is_empty())
        );
        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW + 60)
            .await;
        assert!(matches!(
            outcome,
            RemediationOutcome::Skipped(SkipReason::CooldownActive { .. })
        ));
    }

    #[tokio::test]
    async fn unrecorded_restart_is_reported() {
        let broken = Arc::new(AtomicBool::new(false));
        let store = seed(
            StateStore::open_with_backend(BreakableBackend {
                inner: InMemoryBackend::new(),
                broken: broken.clone(),
            })
            .unwrap(),
        );
        let gate = RemediationGate::new(store, policy());
        let actuator = MockActuator {
            on_restart: Some(broken),
            ..MockActuator::ok()
        };

        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;

        assert_eq!(
            outcome,
            RemediationOutcome::Remediated {
                at: NOW,
                cleared: 0,
                cooldown_recorded: false
            }
        );
        assert_eq!(actuator.calls(), 1);
    }

    #[tokio::test]
    async fn expired_cooldown_remediates() {
        let store = seeded_store();
        triggered_at(&store, NOW - 31 * MINUTE);
        let gate = RemediationGate::new(store.clone(), policy());
        let actuator = MockActuator::ok();

        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;

        assert!(matches!(outcome, RemediationOutcome::Remediated { .. }));
        assert_eq!(actuator.calls(), 1);
    }

    #[tokio::test]
    async fn actuator_failure_changes_nothing() {
        let store = seeded_store();
        triggered_at(&store, NOW - 60 * MINUTE);
        let gate = RemediationGate::new(store.clone(), policy());
        let actuator = MockActuator::failing();
        let before: Vec<_> = targets()
            .into_iter()
            .map(|t| store.load_history(t).unwrap())
            .collect();

        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;

        assert!(
            matches!(&outcome, RemediationOutcome::Failed { reason } if reason.contains("controller busy"))
        );
        assert_eq!(
            store.load_remediation_state().unwrap().last_triggered_at,
            Some(NOW - 60 * MINUTE)
        );
        let after: Vec<_> = targets()
            .into_iter()
            .map(|t| store.load_history(t).unwrap())
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn failed_restart_retries_next_cycle() {
        let store = seeded_store();
        let gate = RemediationGate::new(store, policy());

        let failing = MockActuator::failing();
        gate.maybe_remediate_at(&escalating(), Some(&failing), &targets(), NOW)
            .await;

        let working = MockActuator::ok();
        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&working), &targets(), NOW + 60)
            .await;
        assert!(matches!(outcome, RemediationOutcome::Remediated { .. }));
    }

    #[tokio::test]
    async fn second_escalation_within_window_is_debounced() {
        let gate = RemediationGate::new(seeded_store(), policy());
        let actuator = MockActuator::ok();

        gate.maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW)
            .await;
        let outcome = gate
            .maybe_remediate_at(&escalating(), Some(&actuator), &targets(), NOW + 10 * MINUTE)
            .await;

        assert!(matches!(
            outcome,
            RemediationOutcome::Skipped(SkipReason::CooldownActive { .. })
        ));
        assert_eq!(actuator.calls(), 1);
    }

    #[test]
    fn cooldown_status_transitions() {
        let cooldown = Duration::from_secs(30 * MINUTE);
        let never = RemediationState::default();
        assert_eq!(cooldown_status(never, cooldown, NOW), CooldownStatus::CooledDown);

        let recent = RemediationState {
            last_triggered_at: Some(NOW - 10 * MINUTE),
        };
        assert_eq!(
            cooldown_status(recent, cooldown, NOW),
            CooldownStatus::InCooldown {
                remaining: Duration::from_secs(20 * MINUTE)
            }
        );

        let boundary = RemediationState {
            last_triggered_at: Some(NOW - 30 * MINUTE),
        };
        assert_eq!(cooldown_status(boundary, cooldown, NOW), CooldownStatus::CooledDown);

        let future = RemediationState {
            last_triggered_at: Some(NOW + MINUTE),
        };
        assert_eq!(
            cooldown_status(future, cooldown, NOW),
            CooldownStatus::InCooldown { remaining: cooldown }
        );
    }

    #[test]
    fn policy_from_config() {
        let config = PingguardConfig::parse(
            r#"
no_restart = true
cooldown = "45m"
[targets]
local = ["10.0.0.1"]
"#,
        )
        .unwrap();
        let policy = RemediationPolicy::from_config(&config).unwrap();
        assert_eq!(policy.cooldown, Duration::from_secs(45 * MINUTE));
        assert!(!policy.enabled);
    }
}
