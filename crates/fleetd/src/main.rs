//! fleetd — the FleetGrid scheduler daemon.
//!
//! Opens the fleet record store, reaches compute agents over HTTP, and runs
//! one scheduler operation per invocation:
//! - `validate` — check a live migration and mark the instance migrating
//! - `hosts` — list hosts whose service for a topic is up
//! - `place` — pick a host for a new workload (round-robin)
//!
//! # Usage
//!
//! ```text
//! fleetd validate --config /etc/fleetgrid/scheduler.toml --instance 42 --dest host-b
//! fleetd hosts --topic compute
//! ```
//!
//! Only `validate` requires the configuration file; the read-only commands
//! fall back to defaults when it is absent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleetgrid_scheduler::{
    FleetDirectory, HttpTransport, LiveMigrationValidator, PlacementRequest, RoundRobinScheduler,
    Scheduler, SchedulerConfig,
};
use fleetgrid_state::StateStore;

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid scheduler daemon")]
struct Cli {
    /// Data directory holding the fleet record store.
    #[arg(long, global = true, default_value = "/var/lib/fleetgrid")]
    data_dir: PathBuf,

    /// Scheduler configuration file (TOML).
    #[arg(long, global = true, default_value = "/etc/fleetgrid/scheduler.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a live migration and mark the instance as migrating.
    Validate {
        /// Instance to migrate.
        #[arg(long)]
        instance: String,

        /// Destination host.
        #[arg(long)]
        dest: String,
    },
    /// List hosts with a live service for a topic.
    Hosts {
        #[arg(long, default_value = "compute")]
        topic: String,
    },
    /// Choose a host for a new workload.
    Place {
        #[arg(long, default_value = "compute")]
        topic: String,

        /// Memory the workload needs, in MB.
        #[arg(long)]
        memory_mb: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let state = open_state(&cli.data_dir)?;

    match cli.command {
        Command::Validate { instance, dest } => {
            let config = SchedulerConfig::from_file(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            validate(state, &config, &instance, &dest).await
        }
        Command::Hosts { topic } => {
            let config = query_config(&cli.config)?;
            let directory = FleetDirectory::new(Arc::new(state), &config);
            let mut hosts = directory.live_hosts(&topic)?;
            hosts.sort();
            for host in hosts {
                println!("{host}");
            }
            Ok(())
        }
        Command::Place { topic, memory_mb } => {
            let config = query_config(&cli.config)?;
            let directory = FleetDirectory::new(Arc::new(state), &config);
            let scheduler = RoundRobinScheduler::new(directory);
            let placement = scheduler.schedule(&topic, &PlacementRequest { memory_mb })?;
            println!("{}", serde_json::to_string(&placement)?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetd=debug,fleetgrid=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// `hosts` and `place` only read the record store, so they run without a
/// configuration file or an `rpc_timeout`.
fn query_config(path: &Path) -> anyhow::Result<SchedulerConfig> {
    SchedulerConfig::from_file_without_agents(path)
        .with_context(|| format!("loading {}", path.display()))
}

fn open_state(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let db_path = data_dir.join("fleetgrid.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

async fn validate(
    state: StateStore,
    config: &SchedulerConfig,
    instance: &str,
    dest: &str,
) -> anyhow::Result<()> {
    let transport = Arc::new(HttpTransport::new(config.agents.clone()));
    let validator = LiveMigrationValidator::new(Arc::new(state), transport, config);

    match validator.validate(instance, dest).await {
        Ok(source) => {
            info!(%instance, %source, %dest, "send live migration to source host");
            println!("{source}");
            Ok(())
        }
        Err(e) => {
            error!(%instance, %dest, error = %e, "live migration rejected");
            Err(e.into())
        }
    }
}
