//! Reachability probes.
//!
//! The [`Prober`] trait is the seam to whatever actually checks a target.
//! [`SystemPingProber`] runs the platform `ping` binary for one echo
//! request and reads the round-trip time from its output.

use std::future::Future;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Why a probe produced no latency.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("failed to run probe: {0}")]
    Spawn(String),

    #[error("unparseable probe output: {0}")]
    Malformed(String),
}

/// Checks whether one target is reachable.
pub trait Prober: Send + Sync + 'static {
    /// Probe `target`, giving up after `timeout`. Returns the latency in
    /// milliseconds.
    fn probe(
        &self,
        target: IpAddr,
        timeout: Duration,
    ) -> impl Future<Output = Result<f64, ProbeError>> + Send;
}

/// Probes by running `ping -c 1 -W <secs> <target>`.
#[derive(Debug, Clone)]
pub struct SystemPingProber {
    program: String,
}

impl Default for SystemPingProber {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
        }
    }
}

impl SystemPingProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different ping binary (e.g., an absolute path).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Prober for SystemPingProber {
    async fn probe(&self, target: IpAddr, timeout: Duration) -> Result<f64, ProbeError> {
        let deadline_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
        let child = tokio::process::Command::new(&self.program)
            .arg("-n")
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(deadline_secs.to_string())
            .arg(target.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProbeError::Spawn(format!("{}: {e}", self.program))),
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .chain(stdout.lines())
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no reply")
                .trim()
                .to_string();
            debug!(%target, status = ?output.status.code(), %reason, "ping failed");
            return Err(ProbeError::Unreachable(reason));
        }

        parse_ping_latency(&stdout)
            .ok_or_else(|| ProbeError::Malformed(stdout.lines().next().unwrap_or("").to_string()))
    }
}

/// Extract the round-trip time in milliseconds from `ping` output.
///
/// Accepts both `time=12.3 ms` and `time<1 ms` forms.
pub fn parse_ping_latency(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let idx = line.find("time=").or_else(|| line.find("time<"))?;
        let rest = &line[idx + 5..];
        let number: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        number.parse::<f64>().ok()
    })
}
