//! pingguard.toml configuration parser.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{parse_duration, TargetGroup, Thresholds};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("threshold `{field}` must be within 0..=1, got {value}")]
    Threshold { field: &'static str, value: f64 },

    #[error("target {0} is listed as both local and global")]
    DuplicateTarget(IpAddr),

    #[error("unsupported actuator protocol: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingguardConfig {
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
    /// Never call the actuator, even when escalation fires.
    #[serde(default)]
    pub no_restart: bool,
    /// Minimum time between two remediations (e.g., "30m").
    #[serde(default = "default_cooldown")]
    pub cooldown: String,
    pub targets: TargetsConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub probe: ProbeConfig,
    pub actuator: Option<ActuatorConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsConfig {
    #[serde(default)]
    pub local: Vec<IpAddr>,
    #[serde(default)]
    pub global: Vec<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: default_probe_timeout(),
        }
    }
}

/// Management controller used to restart the network device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    #[serde(default = "default_reset_type")]
    pub reset_type: String,
    /// TOML file holding `user` and `password`.
    pub credentials_file: Option<PathBuf>,
    /// Accept self-signed controller certificates.
    #[serde(default)]
    pub insecure_tls: bool,
    #[serde(default = "default_actuator_timeout")]
    pub timeout: String,
}

impl ActuatorConfig {
    /// Port to connect to, falling back to the protocol default.
    pub fn effective_port(&self) -> u16 {
        match (self.port, self.protocol.as_str()) {
            (Some(port), _) => port,
            (None, "http") => 80,
            (None, _) => 443,
        }
    }
}

/// Basic-auth credentials for the management controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }
}

fn default_loglevel() -> String {
    "info".to_string()
}

fn default_cooldown() -> String {
    "30m".to_string()
}

fn default_probe_timeout() -> String {
    "2s".to_string()
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_reset_type() -> String {
    "ForceRestart".to_string()
}

fn default_actuator_timeout() -> String {
    "10s".to_string()
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

impl PingguardConfig {
    /// Read, parse, and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate config from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: PingguardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cooldown()?;
        self.probe_timeout()?;
        for (field, value) in [
            ("failure_rate", self.thresholds.failure_rate),
            ("group_quorum", self.thresholds.group_quorum),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Threshold { field, value });
            }
        }
        if let Some(ip) = self
            .targets
            .local
            .iter()
            .find(|ip| self.targets.global.contains(ip))
        {
            return Err(ConfigError::DuplicateTarget(*ip));
        }
        if let Some(actuator) = &self.actuator {
            if !matches!(actuator.protocol.as_str(), "http" | "https") {
                return Err(ConfigError::Protocol(actuator.protocol.clone()));
            }
            duration_field("actuator.timeout", &actuator.timeout)?;
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Result<Duration, ConfigError> {
        duration_field("cooldown", &self.cooldown)
    }

    pub fn probe_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("probe.timeout", &self.probe.timeout)
    }

    /// Every configured target, local group first.
    pub fn all_targets(&self) -> Vec<IpAddr> {
        self.targets
            .local
            .iter()
            .chain(self.targets.global.iter())
            .copied()
            .collect()
    }

    /// Every configured target tagged with its group.
    pub fn grouped_targets(&self) -> Vec<(IpAddr, TargetGroup)> {
        self.targets
            .local
            .iter()
            .map(|ip| (*ip, TargetGroup::Local))
            .chain(self.targets.global.iter().map(|ip| (*ip, TargetGroup::Global)))
            .collect()
    }

    /// Scaffold a starter pingguard.toml.
    pub fn scaffold(actuator_host: &str) -> Self {
        PingguardConfig {
            loglevel: default_loglevel(),
            no_restart: true,
            cooldown: default_cooldown(),
            targets: TargetsConfig {
                local: vec![IpAddr::from([192, 168, 1, 1])],
                global: vec![
                    IpAddr::from([1, 1, 1, 1]),
                    IpAddr::from([8, 8, 8, 8]),
                    IpAddr::from([9, 9, 9, 9]),
                ],
            },
            thresholds: Thresholds::default(),
            probe: ProbeConfig::default(),
            actuator: Some(ActuatorConfig {
                protocol: default_protocol(),
                host: actuator_host.to_string(),
                port: None,
                reset_type: default_reset_type(),
                credentials_file: Some(PathBuf::from("login.toml")),
                insecure_tls: true,
                timeout: default_actuator_timeout(),
            }),
        }
    }
}
