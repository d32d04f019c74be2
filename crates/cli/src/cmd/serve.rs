use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Instrument};

use uptime_admission::{
    refresh_loop, refresh_once, AdmissionGate, AttemptCounter, FileWhitelistSource,
    WhitelistCell, WhitelistSource, RATE_WINDOW,
};
use uptime_config::{AppConfig, WhitelistConfig};
use uptime_metrics::{Metrics, SharedRegistry};
use uptime_server::{serve, serve_metrics, AppState};
use uptime_storage::Backend;

use crate::logging;

#[derive(Parser, Clone, Debug)]
pub struct ServeCmd {
    /// Service configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
}

impl ServeCmd {
    pub async fn run(self) -> Result<()> {
        let config = AppConfig::load(&self.config).wrap_err_with(|| {
            format!("Failed to load configuration from {}", self.config.display())
        })?;

        logging::init(config.logging);

        let span = tracing::error_span!("service", network = %config.network_name);
        run(config).instrument(span).await
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!(storage = config.storage.name(), "Service is starting...");

    let registry = SharedRegistry::global();
    let metrics = Metrics::register(registry);

    if config.metrics.enabled {
        let listen_addr = config.metrics.listen_addr;
        let registry = registry.clone();

        tokio::spawn(
            async move {
                if let Err(e) = serve_metrics(listen_addr, registry).await {
                    error!("Metrics server stopped: {e}");
                }
            }
            .in_current_span(),
        );
    }

    let backend = Backend::connect(&config.storage, &config.network_name, config.max_block_size)
        .await
        .wrap_err("Failed to set up the storage backend")?;

    let whitelist = if config.whitelist.enabled {
        Some(start_whitelist(&config.whitelist).await?)
    } else {
        info!("Whitelisting disabled");
        None
    };

    let gate = Arc::new(AdmissionGate::new(
        whitelist,
        AttemptCounter::new(config.rate_limit.requests_per_pk_hourly),
    ));

    tokio::spawn(prune_counter(Arc::clone(&gate)).in_current_span());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .wrap_err_with(|| format!("Failed to listen on {}", config.listen_addr))?;

    let state = AppState {
        backend: Arc::new(backend),
        gate,
        metrics,
    };

    serve(listener, state, shutdown_signal()).await?;

    info!("Service stopped");
    Ok(())
}

/// Loads the first snapshot and keeps it fresh in the background.
///
/// A failed first load leaves the service unavailable until a refresh succeeds.
async fn start_whitelist(config: &WhitelistConfig) -> Result<Arc<WhitelistCell>> {
    let path = config
        .path
        .clone()
        .ok_or_else(|| eyre!("`whitelist.path` is required when whitelisting is enabled"))?;

    let cell = Arc::new(WhitelistCell::new());
    let source: Arc<dyn WhitelistSource> =
        Arc::new(FileWhitelistSource::new(path, config.column.clone()));

    match refresh_once(&cell, source.as_ref()).await {
        Ok(entries) => info!(entries, "Whitelist loaded"),
        Err(e) => warn!("Failed to load the whitelist, rejecting all submissions until it loads: {e}"),
    }

    tokio::spawn(
        refresh_loop(Arc::clone(&cell), source, config.refresh_interval).in_current_span(),
    );

    Ok(cell)
}

async fn prune_counter(gate: Arc<AdmissionGate>) {
    let mut ticker = tokio::time::interval(RATE_WINDOW);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        gate.counter().prune(Instant::now());
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => {
            error!("Failed to listen for the shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}
