//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "binary"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Binary entrypoint for the cooling-control supervisor daemon."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use ccs_api::{spawn_api_server, ApiState};
use ccs_common::config::{AdapterBackend, SupervisorConfig};
use ccs_common::logging::init_tracing;
use ccs_control::TemperaturePredictor;
use ccs_core::scheduler::{shutdown_channel, spawn_predictor_loader, writer_shutdown, Supervisor};
use ccs_core::state::ControlStateStore;
use ccs_core::{new_registry, EventSink, SupervisorMetrics};
use ccs_telemetry::adapter::TelemetryAdapter;
use ccs_telemetry::sim::SimAdapter;
use clap::{Parser, ValueEnum};
use parking_lot::RwLock;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ship cooling-control supervisor daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the telemetry backend")]
    backend: Option<CliBackend>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliBackend {
    Plc,
    Simulation,
}

impl From<CliBackend> for AdapterBackend {
    fn from(value: CliBackend) -> Self {
        match value {
            CliBackend::Plc => AdapterBackend::Plc,
            CliBackend::Simulation => AdapterBackend::Simulation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/ccs.toml"));
    candidates.push(PathBuf::from("configs/ccs.example.toml"));

    let loaded = SupervisorConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(backend) = cli.backend {
        config.adapter.backend = backend.into();
    }
    init_tracing("ccsd", &config.logging)?;
    info!(config_path = %loaded.source.display(), backend = ?config.adapter.backend, "configuration loaded");

    run_daemon(Arc::new(config)).await
}

async fn run_daemon(config: Arc<SupervisorConfig>) -> Result<()> {
    let adapter: Arc<dyn TelemetryAdapter> = match config.adapter.backend {
        AdapterBackend::Simulation => Arc::new(SimAdapter::new(
            config.adapter.sim_seed,
            config.control.tick_period,
        )),
        AdapterBackend::Plc => {
            // The register transport is bound by the site integration; this
            // build ships only the simulation backend end-to-end.
            bail!("no register transport bound for the plc backend; run with --backend simulation")
        }
    };

    let registry = new_registry();
    let metrics = SupervisorMetrics::new(registry.clone())?;
    let store = Arc::new(ControlStateStore::new(&config.groups));
    let sink = EventSink::new(config.events.buffer);

    let writer_stop = writer_shutdown();
    let writer_task = sink
        .clone()
        .spawn_writer(config.events.path.clone(), writer_stop.clone());

    let predictor = Arc::new(RwLock::new(TemperaturePredictor::null()));
    let loader = spawn_predictor_loader(
        config.predictor.artefact_path.clone(),
        predictor.clone(),
        sink.clone(),
    );

    let api_server = if config.api.enabled {
        let state = Arc::new(ApiState::new(
            store.clone(),
            sink.clone(),
            Some(registry.clone()),
        ));
        match spawn_api_server(state, config.api.listen).await {
            Ok(server) => Some(server),
            Err(err) => {
                warn!(error = %err, "failed to start operator api");
                None
            }
        }
    } else {
        info!("operator api disabled by configuration");
        None
    };

    let supervisor = Supervisor::new(
        config.clone(),
        adapter,
        predictor,
        store,
        sink.clone(),
        Some(metrics),
    );
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let loop_task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    let _ = shutdown_tx.send(());
    loop_task.await??;
    loader.await.ok();

    writer_stop.notify_one();
    writer_task.await.ok();

    if let Some(server) = api_server {
        server.shutdown().await?;
    }

    info!("shutdown complete");
    Ok(())
}
