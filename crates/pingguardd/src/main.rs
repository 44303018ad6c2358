//! pingguardd — the pingguard daemon.
//!
//! Pings local and global targets, keeps a short history per target, and
//! restarts the network device through its management controller when
//! enough targets look dead.
//!
//! # Usage
//!
//! ```text
//! pingguardd --config pingguard.toml --data-dir /var/lib/pingguard check
//! pingguardd watch --interval 60s
//! pingguardd status
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pingguard_core::{parse_duration, PingguardConfig};
use pingguard_health::SystemPingProber;
use pingguard_remediate::RedfishActuator;
use pingguard_state::StateStore;
use pingguardd::Pingguard;

#[derive(Parser)]
#[command(name = "pingguardd", about = "pingguard network health monitor", version)]
struct Cli {
    /// Path to pingguard.toml.
    #[arg(long, short, global = true, default_value = "pingguard.toml")]
    config: PathBuf,

    /// Data directory for persistent state.
    #[arg(long, global = true, default_value = "/var/lib/pingguard")]
    data_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one probe, evaluate, remediate cycle.
    Check,

    /// Run cycles on an interval until interrupted.
    Watch {
        /// Time between cycles (e.g. "60s", "5m").
        #[arg(long, default_value = "60s")]
        interval: String,
    },

    /// Print target histories and cooldown state as JSON.
    Status,

    /// Clear every target's history.
    Reset,

    /// Write a starter config file.
    Init {
        /// Address of the device's management controller.
        #[arg(long, default_value = "192.168.1.2")]
        actuator_host: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

type Daemon = Pingguard<SystemPingProber, RedfishActuator>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Init {
        actuator_host,
        force,
    } = &cli.command
    {
        init_tracing("info", cli.json_logs);
        return init_config(&cli.config, actuator_host, *force);
    }

    let config = PingguardConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(&config.loglevel, cli.json_logs);

    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("creating {}", cli.data_dir.display()))?;
    let db_path = cli.data_dir.join("pingguard.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    match cli.command {
        Command::Check => {
            let daemon = build(config, state)?;
            let report = daemon.run_cycle().await;
            debug!(outcome = ?report.outcome, probes = report.probes.len(), "check complete");
            Ok(())
        }
        Command::Watch { interval } => {
            let interval = parse_duration(&interval)
                .with_context(|| format!("invalid interval {interval:?}"))?;
            let daemon = build(config, state)?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("shutdown signal received");
                        let _ = shutdown_tx.send(true);
                    }
                    Err(e) => error!(error = %e, "failed to listen for Ctrl-C"),
                }
            });

            daemon.watch(interval, shutdown_rx).await;
            info!("pingguard stopped");
            Ok(())
        }
        Command::Status => {
            let daemon: Daemon = Pingguard::new(config, state, SystemPingProber::new(), None)?;
            println!("{}", serde_json::to_string_pretty(&daemon.status())?);
            Ok(())
        }
        Command::Reset => {
            let daemon: Daemon = Pingguard::new(config, state, SystemPingProber::new(), None)?;
            let cleared = daemon.reset();
            info!(cleared, "histories cleared");
            Ok(())
        }
        Command::Init { .. } => Ok(()),
    }
}

fn build(config: PingguardConfig, state: StateStore) -> anyhow::Result<Daemon> {
    let actuator = match &config.actuator {
        Some(actuator) => Some(
            RedfishActuator::from_config(actuator).context("configuring restart actuator")?,
        ),
        None => {
            warn!("no actuator configured, restarts disabled");
            None
        }
    };
    if config.no_restart {
        warn!("no_restart is set, escalations will only be logged");
    }
    Ok(Pingguard::new(config, state, SystemPingProber::new(), actuator)?)
}

fn init_config(path: &Path, actuator_host: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let content = PingguardConfig::scaffold(actuator_host).to_toml_string()?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "config written");
    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
