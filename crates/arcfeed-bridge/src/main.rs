//! ArcGIS feed bridge service binary.
//!
//! Polls the configured ArcGIS feature services and publishes every
//! feature as a CoT event over NATS, with removal events for features
//! that disappear.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`ARCFEED_CONFIG`, default `arcfeed-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to NATS
//! 4. Register every valid feed with the feed service
//! 5. Reload the configuration on SIGHUP, stop on Ctrl-C

mod error;
mod nats;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcfeed_core::config::LoggingConfig;
use arcfeed_core::{ArcGisClient, FeedService, ServiceConfig};
use arcfeed_types::ReconcileReport;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::BridgeError;
use crate::nats::NatsPublisher;

/// Environment variable naming the configuration file.
const CONFIG_PATH_ENV: &str = "ARCFEED_CONFIG";

/// Configuration file used when `ARCFEED_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "arcfeed-config.yaml";

type Service = FeedService<ArcGisClient, NatsPublisher>;

/// Application entry point for the bridge.
///
/// # Errors
///
/// Returns an error if configuration, the NATS connection or signal
/// handling fails during start-up.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    let config = load_config(&path)?;

    init_logging(&config.logging);
    info!(
        path = %path.display(),
        feeds = config.feeds.len(),
        enabled = config.enabled,
        request_timeout_secs = config.request_timeout_secs,
        "arcfeed-bridge starting"
    );

    let publisher = NatsPublisher::connect(&config.bus).await?;
    let (service, report) = FeedService::start(config, ArcGisClient::new(), publisher)
        .await
        .map_err(BridgeError::from)?;
    log_report(&report);
    let service = Arc::new(service);

    #[cfg(unix)]
    let reload = tokio::spawn(reload_on_hangup(Arc::clone(&service), path));

    tokio::signal::ctrl_c()
        .await
        .map_err(|source| BridgeError::Signal { source })?;
    info!("shutdown requested");

    #[cfg(unix)]
    reload.abort();
    service.shutdown().await;
    info!("arcfeed-bridge stopped");
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load the configuration file, or defaults when it does not exist.
fn load_config(path: &Path) -> Result<ServiceConfig, BridgeError> {
    if path.exists() {
        Ok(ServiceConfig::from_file(path)?)
    } else {
        let mut config = ServiceConfig::default();
        config.bus.apply_env_overrides();
        Ok(config)
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn log_report(report: &ReconcileReport) {
    for rejected in &report.rejected {
        warn!(feed = %rejected.name, reason = %rejected.reason, "feed not scheduled");
    }
    info!(
        added = report.added.len(),
        updated = report.updated.len(),
        unchanged = report.unchanged.len(),
        removed = report.removed.len(),
        rejected = report.rejected.len(),
        "feeds reconciled"
    );
}

/// Re-read the configuration file on every SIGHUP and apply it.
///
/// A file that fails to load or validate leaves the running configuration
/// in place.
#[cfg(unix)]
async fn reload_on_hangup(service: Arc<Service>, path: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable, live reload disabled");
            return;
        }
    };

    while hangups.recv().await.is_some() {
        info!(path = %path.display(), "reloading configuration");
        let config = match ServiceConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "configuration reload failed, keeping current");
                continue;
            }
        };
        match service.set_config(config).await {
            Ok(report) => log_report(&report),
            Err(e) => warn!(error = %e, "configuration rejected, keeping current"),
        }
    }
}
