//! Management operations.
//!
//! [`FeedService`] is the surface an operator-facing layer (HTTP API,
//! signal handler, CLI) drives. It keeps the current [`ServiceConfig`] and
//! reconciles the registry against every new one: feeds are added, updated
//! in place (keeping their markers), left alone, or removed, and invalid
//! definitions are rejected one by one without affecting the rest.

use std::collections::BTreeSet;

use arcfeed_types::{CycleReport, FeedConfig, ReconcileReport, RejectedFeed};
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{ConfigError, ServiceConfig, validate_feeds};
use crate::processor::{CycleResult, CycleSettings};
use crate::publish::Publisher;
use crate::registry::FeedRegistry;
use crate::source::FeatureSource;

/// Errors returned by management operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No feed with that name is registered.
    #[error("feed '{feed}' not found")]
    NotFound {
        /// The requested name.
        feed: String,
    },

    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The running feed service.
pub struct FeedService<S, P> {
    registry: FeedRegistry<S, P>,
    config: RwLock<ServiceConfig>,
}

impl<S: FeatureSource, P: Publisher> FeedService<S, P> {
    /// Build the registry and register every valid feed of `config` once.
    ///
    /// # Errors
    ///
    /// Fails only when the service-wide settings are invalid. Invalid
    /// feeds are listed in the returned report and skipped.
    pub async fn start(
        config: ServiceConfig,
        source: S,
        publisher: P,
    ) -> Result<(Self, ReconcileReport), ConfigError> {
        config.validate_settings()?;
        let registry = FeedRegistry::new(
            source,
            publisher,
            CycleSettings::from_config(&config),
            config.enabled,
        );
        let report = reconcile(&registry, &config.feeds).await;
        info!(
            feeds = report.added.len(),
            rejected = report.rejected.len(),
            enabled = config.enabled,
            "feed service started"
        );

        let service = Self {
            registry,
            config: RwLock::new(config),
        };
        Ok((service, report))
    }

    /// The registry behind this service.
    pub const fn registry(&self) -> &FeedRegistry<S, P> {
        &self.registry
    }

    /// The configuration last applied.
    pub async fn get_config(&self) -> ServiceConfig {
        self.config.read().await.clone()
    }

    /// Apply a new configuration.
    ///
    /// Settings take effect for cycles starting afterwards; running cycles
    /// finish with the old ones.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] when the service-wide settings are
    /// invalid; nothing is changed in that case.
    pub async fn set_config(&self, new: ServiceConfig) -> Result<ReconcileReport, ServiceError> {
        new.validate_settings()?;

        let mut current = self.config.write().await;
        self.registry
            .update_settings(CycleSettings::from_config(&new))
            .await;
        self.registry.set_enabled(new.enabled);
        let report = reconcile(&self.registry, &new.feeds).await;
        *current = new;
        drop(current);

        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            rejected = report.rejected.len(),
            "configuration applied"
        );
        Ok(report)
    }

    /// Run one cycle of every feed now.
    pub async fn fetch_all(&self) -> Vec<CycleReport> {
        self.registry
            .trigger_all()
            .await
            .iter()
            .map(CycleResult::report)
            .collect()
    }

    /// Run one cycle of `name` now.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] for an unknown feed. Cycle
    /// failures are reported inside the [`CycleReport`].
    pub async fn fetch_one(&self, name: &str) -> Result<CycleReport, ServiceError> {
        self.registry
            .trigger_now(name)
            .await
            .map(|result| result.report())
            .ok_or_else(|| ServiceError::NotFound {
                feed: name.to_owned(),
            })
    }

    /// Remove every marker of `name` from consumers and reset its state.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] for an unknown feed.
    pub async fn clear_feed(&self, name: &str) -> Result<CycleReport, ServiceError> {
        self.registry
            .clear(name)
            .await
            .map(|result| result.report())
            .ok_or_else(|| ServiceError::NotFound {
                feed: name.to_owned(),
            })
    }

    /// Stop all timers and wait for running cycles.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

/// Bring the registry in line with `feeds`.
async fn reconcile<S: FeatureSource, P: Publisher>(
    registry: &FeedRegistry<S, P>,
    feeds: &[FeedConfig],
) -> ReconcileReport {
    let (valid, rejected) = validate_feeds(feeds);
    let mut report = ReconcileReport::default();
    for (name, error) in rejected {
        warn!(feed = %name, error = %error, "feed definition rejected");
        report.rejected.push(RejectedFeed {
            name,
            reason: error.to_string(),
        });
    }

    let wanted: BTreeSet<&str> = valid.iter().map(|feed| feed.name.as_str()).collect();
    let stale: Vec<String> = registry
        .feed_names()
        .await
        .into_iter()
        .filter(|name| !wanted.contains(name.as_str()))
        .collect();
    let removals = join_all(stale.iter().map(|name| registry.unregister(name))).await;
    report.removed = stale
        .into_iter()
        .zip(removals)
        .filter_map(|(name, removed)| removed.then_some(name))
        .collect();

    for feed in valid {
        let existing = registry.feed(&feed.name).await;
        if existing.as_ref() == Some(&feed) {
            report.unchanged.push(feed.name);
            continue;
        }
        let name = feed.name.clone();
        match registry.register(feed).await {
            Ok(()) if existing.is_some() => report.updated.push(name),
            Ok(()) => report.added.push(name),
            Err(error) => report.rejected.push(RejectedFeed {
                name,
                reason: error.to_string(),
            }),
        }
    }
    report
}
