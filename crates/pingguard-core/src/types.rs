//! Shared types used across pingguard crates.

use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Identity of a probed target.
pub type TargetId = IpAddr;

/// The group a target belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetGroup {
    /// Targets inside the managed network (gateway, switches).
    Local,
    /// Targets on the public internet.
    Global,
}

impl TargetGroup {
    pub fn label(&self) -> &'static str {
        match self {
            TargetGroup::Local => "local",
            TargetGroup::Global => "global",
        }
    }
}

/// Failure-rate thresholds used by the escalation evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// A target is failing when its valid percentage drops below this.
    pub failure_rate: f64,
    /// A group escalates when more than this fraction of it is failing.
    pub group_quorum: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            group_quorum: 0.5,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Parse a duration string like "5s", "500ms", "30m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()?
            .checked_mul(60)
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()?
            .checked_mul(3600)
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
