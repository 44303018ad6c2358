//! pingguard-health — probing and escalation for pingguard.
//!
//! Probes every configured target, appends the result to the target's
//! bounded history in the state store, and decides from those histories
//! whether the network device needs a restart.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   ├── One tokio task per target
//!   │   ├── Prober::probe() bounded by the probe timeout
//!   │   └── StateStore::record_probe() → HealthHistory
//!   └── load_histories() → evaluate() → EscalationDecision
//! ```
//!
//! # Escalation
//!
//! A target is failing when fewer than `failure_rate` of its retained
//! probes succeeded. Remediation is requested when, checked in order:
//!
//! 1. at least one local and at least one global target are failing,
//! 2. more than `group_quorum` of the global targets are failing,
//! 3. more than `group_quorum` of the local targets are failing.

pub mod checker;
pub mod evaluator;
pub mod monitor;

pub use checker::{ProbeError, Prober, SystemPingProber};
pub use evaluator::{evaluate, is_failing, EscalationDecision, EscalationRule};
pub use monitor::{HealthMonitor, ProbeReport};
