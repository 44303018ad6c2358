//! pingguardd — the pingguard daemon.
//!
//! Wires the health monitor, escalation evaluator, and remediation gate
//! into one check cycle:
//!
//! ```text
//! probe_all(targets) → load_histories → evaluate → maybe_remediate
//! ```

pub mod cycle;

pub use cycle::{CycleReport, Pingguard, StatusReport, TargetStatus};
