//! pingguard-remediate — cooldown-gated remediation.
//!
//! When the escalation evaluator asks for remediation, the
//! [`RemediationGate`] decides whether the [`Actuator`] may actually run.
//!
//! # Cooldown
//!
//! ```text
//! elapsed = now - last_triggered_at
//!
//! last_triggered_at absent  → COOLED_DOWN
//! elapsed >= cooldown       → COOLED_DOWN
//! otherwise                 → IN_COOLDOWN (remaining = cooldown - elapsed)
//! ```
//!
//! Only a successful restart starts a new cooldown window and clears the
//! target histories. A failed restart leaves everything untouched, so the
//! next cycle retries straight away.

pub mod actuator;
pub mod gate;

pub use actuator::{Ack, Actuator, ActuatorError, RedfishActuator};
pub use gate::{CooldownStatus, RemediationGate, RemediationOutcome, RemediationPolicy, SkipReason};
