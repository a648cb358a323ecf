//! servegridd: the ServeGrid daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Resource backend (Docker container pool or Kubernetes reconciler)
//! - Task queue + scaler loop
//! - Detector loop (Prometheus metrics, remote advisor)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! servegridd run --config /etc/servegrid/servegrid.toml
//! servegridd print-config --config /etc/servegrid/servegrid.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use servegrid_core::config::{LogFormat, LoggingConfig};
use servegrid_core::{ResourceBackendKind, ServegridConfig};
use servegrid_detector::{Detector, RecommendClient};
use servegrid_perf::{PerformanceClient, PrometheusClient};
use servegrid_scheduler::{
    ClusterContext, ClusterReconciler, ContainerPoolScheduler, DockerEngine, KubeClusterApi,
    ResourceBackend, Scaler,
};
use servegrid_state::StateStore;

const DEFAULT_LOG_FILTER: &str = "info,servegrid=debug";

#[derive(Parser)]
#[command(name = "servegridd", about = "ServeGrid autoscaling control plane")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, short, global = true, default_value = "servegrid.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Run,
    /// Print the effective configuration (file plus environment) as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServegridConfig::load(&cli.config)?;

    match cli.command {
        Command::PrintConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Run => {
            init_tracing(&config.logging);
            run(config).await
        }
    }
}

/// `RUST_LOG` wins over the configured level, which wins over the default.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn build_backend(
    config: &ServegridConfig,
    store: &StateStore,
) -> anyhow::Result<Arc<dyn ResourceBackend>> {
    match config.resource_backend.kind {
        ResourceBackendKind::Docker => {
            let engine = DockerEngine::connect(config.docker.stop_timeout_secs)?;
            let gpus = match &config.docker.gpu_indices {
                Some(indices) => indices.clone(),
                None => match servegrid_scheduler::container::discover_gpus().await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(error = %e, "gpu discovery failed, starting with an empty pool");
                        Vec::new()
                    }
                },
            };
            info!(gpus = ?gpus, "docker backend initialized");
            Ok(Arc::new(ContainerPoolScheduler::new(
                Arc::new(engine),
                store.clone(),
                config.serving.clone(),
                gpus,
            )))
        }
        ResourceBackendKind::K8s => {
            let api = KubeClusterApi::connect(&config.k8s).await?;
            let ctx = ClusterContext::from_config(&config.serving, &config.k8s);
            info!("kubernetes backend initialized");
            Ok(Arc::new(ClusterReconciler::new(Arc::new(api), ctx)))
        }
    }
}

async fn run(config: ServegridConfig) -> anyhow::Result<()> {
    info!("ServeGrid daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    if let Some(dir) = config.state.path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }
    let store = StateStore::open(&config.state.path)?;
    info!(path = ?config.state.path, "state store opened");

    // Resource backend, chosen once.
    let backend = build_backend(&config, &store).await?;

    // Task queue.
    let (queue_tx, queue_rx) = servegrid_queue::task_queue(config.queue.capacity);

    // Detector.
    let perf = PerformanceClient::new(
        PrometheusClient::new(config.prometheus.url.clone()),
        Duration::from_secs(config.detector.lookback_secs),
        config.detector.step.clone(),
    );
    let advisor = RecommendClient::new(&config.advisor);
    let detector = Arc::new(Detector::new(
        backend.clone(),
        queue_tx,
        perf,
        advisor,
        store.clone(),
    ));
    info!(
        interval_secs = config.detector.detect_interval_secs,
        "detector initialized"
    );

    let scaler = Scaler::new(backend, queue_rx);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let detector_handle = tokio::spawn(detector.clone().run(
        Duration::from_secs(config.detector.detect_interval_secs),
        shutdown_rx.clone(),
    ));
    let scaler_handle = tokio::spawn(scaler.run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let state = servegrid_api::ApiState {
        detector,
        serving: config.serving.clone(),
        version: config.api.version.clone(),
    };
    let router = servegrid_api::build_router(state, &config.api.url_prefix);

    let listener = tokio::net::TcpListener::bind(config.api.listen).await?;
    info!(addr = %config.api.listen, prefix = %config.api.url_prefix, "API server starting");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for background tasks.
    let _ = detector_handle.await;
    let _ = scaler_handle.await;

    info!("ServeGrid daemon stopped");
    Ok(())
}
