// # d2nd - Docker to Notion daemon
//
// Thin integration layer: reads configuration, wires the Docker event source,
// the Notion record store and the mapping cache into a `Reconciler`, then runs
// it until SIGTERM/SIGINT. Reconciliation logic lives in d2n-core.
//
// ## Configuration
//
// ### Required
// - `DOCKER_API_URL`: Engine API endpoint (`unix:///var/run/docker.sock`,
//   `tcp://host:2375`, `http://...`)
// - `NOTION_API_KEY`: Notion integration token
//
// ### Optional
// - `ENV_FILE_PATH`: `.env` file filling in unset variables (default `config/.env`)
// - `TZ`: IANA timezone for last-seen timestamps (default `Asia/Seoul`)
// - `CONFIG_FILE_PATH`: YAML file with the `targets` mapping
//   (default `config/config.yaml`)
// - `D2N_CACHE_TYPE`: Mapping cache backend (file, memory)
// - `D2N_CACHE_PATH`: Cache file for the file backend (default `data/cache.json`)
// - `D2N_CACHE_TTL_SECS`: Cache entry lifetime (default 300)
// - `D2N_LOG_LEVEL` / `LOG_LEVEL`: trace, debug, info, warn (warning),
//   error (critical); anything else means info
// - `D2N_LOG_DIR`: Also write `YYYY-MM-DD.log` files into this directory
//
// ## Example
//
// ```bash
// export DOCKER_API_URL=unix:///var/run/docker.sock
// export NOTION_API_KEY=secret_xxx
// export CONFIG_FILE_PATH=/etc/d2n/config.yaml
// export D2N_LOG_DIR=/var/log/d2n
//
// d2nd
// ```

mod config;
mod logging;

use anyhow::{Context, Result};
use d2n_core::config::{CacheKind, resolve_timezone};
use d2n_core::{
    D2nConfig, FileMappingCache, MappingCache, MemoryMappingCache, ReconcileEvent, ReconcileOutcome,
    Reconciler,
};
use d2n_docker::DockerEventSource;
use d2n_notion::NotionRecordStore;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::config::Config;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum D2nExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<D2nExitCode> for ExitCode {
    fn from(code: D2nExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return D2nExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return D2nExitCode::ConfigError.into();
    }

    if let Err(e) = logging::init(
        &config.log_level,
        config.log_dir.as_deref(),
        resolve_timezone(&config.timezone),
    ) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return D2nExitCode::ConfigError.into();
    }

    info!("Starting d2nd daemon");

    let d2n_config = match config.to_d2n_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return D2nExitCode::ConfigError.into();
        }
    };

    info!(
        "Configuration loaded: {} database target(s), default '{}'",
        d2n_config.targets.databases.len(),
        d2n_config.targets.default
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return D2nExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let (reconciler, events) = match start(&d2n_config).await {
            Ok(started) => started,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return D2nExitCode::ConfigError;
            }
        };

        tokio::spawn(log_events(events));

        let cancel = CancellationToken::new();
        let watcher = cancel.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(signal) => info!("Received shutdown signal: {}", signal),
                Err(e) => error!("Signal handling failed, shutting down: {}", e),
            }
            watcher.cancel();
        });

        info!("Daemon initialized successfully");

        match reconciler.run(cancel).await {
            Ok(()) => {
                info!("Shutdown complete");
                D2nExitCode::CleanShutdown
            }
            Err(e) => {
                error!("Daemon error: {}", e);
                D2nExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Connect every adapter and build the reconciler
///
/// Any failure here is a startup failure: bad credentials, an unreachable
/// Docker daemon or an invalid targets mapping.
async fn start(config: &D2nConfig) -> Result<(Reconciler, mpsc::Receiver<ReconcileEvent>)> {
    let timezone = config.resolved_timezone();

    let cache: Box<dyn MappingCache> = match config.cache.kind {
        CacheKind::File => {
            Box::new(FileMappingCache::open(&config.cache.path, config.cache.ttl()).await)
        }
        CacheKind::Memory => {
            info!("Using in-memory mapping cache (TTL {}s)", config.cache.ttl_secs);
            Box::new(MemoryMappingCache::new(config.cache.ttl()))
        }
    };

    let store = NotionRecordStore::new(&config.notion).context("Failed to create Notion client")?;
    store.verify().await?;
    info!("Notion API connection verified");

    for target in &config.targets.databases {
        match store.check_database(&target.database_id).await {
            Ok(()) => debug!("Database '{}' is accessible", target.name),
            Err(e) => warn!("Database '{}' is not accessible: {}", target.name, e),
        }
    }

    let source = DockerEventSource::connect(&config.docker, timezone)
        .await
        .context("Failed to connect to Docker")?;
    info!("Docker API connection verified");

    let started = Reconciler::new(Box::new(source), Box::new(store), cache, config)?;
    Ok(started)
}

/// Forward reconciler events to the log
async fn log_events(mut events: mpsc::Receiver<ReconcileEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ReconcileEvent::Started { inventory_count } => {
                info!("Inventory pass: {} container(s)", inventory_count)
            }
            ReconcileEvent::Reconciled { name, outcome }
                if outcome.is_current() || outcome == ReconcileOutcome::Skipped =>
            {
                debug!("{}: {:?}", name, outcome)
            }
            ReconcileEvent::Reconciled { name, outcome } => {
                warn!("{} is out of date in Notion: {:?}", name, outcome)
            }
            ReconcileEvent::Evicted { name } => debug!("Evicted cache entry for {}", name),
            ReconcileEvent::EventSkipped { id, reason } => {
                debug!("Skipped event for {}: {}", id, reason)
            }
            ReconcileEvent::Stopped { reason } => debug!("Reconciler stopped: {}", reason),
        }
    }
}

/// Wait for SIGTERM or SIGINT
///
/// # Returns
///
/// The name of the signal received, or an error if the handlers could not be
/// installed.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
