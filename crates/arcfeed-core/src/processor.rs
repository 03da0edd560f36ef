//! One polling cycle of one feed.
//!
//! A cycle moves through four stages:
//!
//! 1. **Fetching**: query the source, bounded by the request timeout. On
//!    failure the cycle ends here and the feed state is left untouched, so
//!    an outage never turns into a mass deletion.
//! 2. **Diffing**: compare the fetched ids with the known ids.
//! 3. **Publishing**: one present event per fetched feature, then one
//!    removal event per vanished id. A failed publish is recorded and the
//!    remaining events still go out.
//! 4. **Committing**: the fetched ids become the known ids. Removal events
//!    that could not be delivered are kept and retried by the next cycle.
//!
//! The caller owns the [`FeedState`] and passes it in by `&mut`, which is
//! what serializes cycles of one feed.

use std::collections::BTreeSet;
use std::time::Duration;

use arcfeed_types::{CotEvent, CycleReport, FeatureId, FeedConfig};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::event::{build_present_event, build_removal_event};
use crate::publish::{PublishError, Publisher};
use crate::source::{FeatureSource, SourceError};
use crate::tracker::FeedState;

/// Service-wide settings every cycle needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSettings {
    /// Upper bound for one fetch.
    pub request_timeout: Duration,
    /// Upper bound for one publish attempt.
    pub publish_timeout: Duration,
    /// Extra publish attempts after a failure.
    pub publish_retries: u32,
    /// Wait before the first retry; doubles for each further retry.
    pub publish_backoff: Duration,
    /// Callsign attribute for feeds that do not name their own.
    pub default_callsign_field: String,
}

impl CycleSettings {
    /// Extract the cycle settings from a service configuration.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            publish_timeout: Duration::from_secs(config.publish.timeout_secs),
            publish_retries: config.publish.retries,
            publish_backoff: Duration::from_millis(config.publish.backoff_ms),
            default_callsign_field: config.callsign_field.clone(),
        }
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

/// Errors collected during a cycle.
///
/// None of them is fatal: they are reported to whoever triggered the cycle
/// and logged for scheduled ones.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    /// The source failed; nothing was published or committed.
    #[error("fetch failed: {0}")]
    Source(#[from] SourceError),

    /// The source did not answer in time; nothing was published or committed.
    #[error("fetch timed out after {after:?}")]
    FetchTimeout {
        /// The timeout that expired.
        after: Duration,
    },

    /// Publishing one event failed after all attempts.
    #[error("publish of {uid} failed: {source}")]
    Publish {
        /// Uid of the event.
        uid: String,
        /// Last publisher error.
        source: PublishError,
    },

    /// Publishing one event did not finish in time on the last attempt.
    #[error("publish of {uid} timed out after {after:?}")]
    PublishTimeout {
        /// Uid of the event.
        uid: String,
        /// The timeout that expired.
        after: Duration,
    },

    /// Another cycle of the same feed was in flight; this one did not run.
    #[error("a cycle of feed '{feed}' is already running")]
    Busy {
        /// Feed name.
        feed: String,
    },
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResult {
    /// Feed name.
    pub feed: String,
    /// Present events published.
    pub published: usize,
    /// Removal events published.
    pub removed: usize,
    /// Features in the response, including skipped ones.
    pub total_features: usize,
    /// Features skipped as unparseable or duplicate.
    pub skipped: usize,
    /// Everything that went wrong.
    pub errors: Vec<CycleError>,
}

impl CycleResult {
    /// An empty result for `feed`.
    pub fn new(feed: &str) -> Self {
        Self {
            feed: feed.to_owned(),
            ..Self::default()
        }
    }

    /// The result of a cycle that was refused because one was in flight.
    pub fn busy(feed: &str) -> Self {
        Self {
            errors: vec![CycleError::Busy {
                feed: feed.to_owned(),
            }],
            ..Self::new(feed)
        }
    }

    /// Whether the cycle finished without any error.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether the cycle was refused because another one was running.
    pub fn is_busy(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, CycleError::Busy { .. }))
    }

    /// Serializable summary for management callers.
    pub fn report(&self) -> CycleReport {
        CycleReport {
            feed: self.feed.clone(),
            success: self.is_success(),
            published: self.published,
            removed: self.removed,
            total_features: self.total_features,
            skipped: self.skipped,
            errors: self.errors.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Run one polling cycle of `config` against `state`.
pub async fn run_cycle<S: FeatureSource, P: Publisher>(
    config: &FeedConfig,
    settings: &CycleSettings,
    state: &mut FeedState,
    source: &S,
    publisher: &P,
) -> CycleResult {
    let now = Utc::now();
    let mut result = CycleResult::new(&config.name);

    // Fetching
    let fetched = match tokio::time::timeout(
        settings.request_timeout,
        source.fetch(&config.url, settings.request_timeout),
    )
    .await
    {
        Ok(Ok(fetched)) => fetched,
        Ok(Err(e)) => {
            warn!(feed = %config.name, error = %e, "fetch failed, keeping known markers");
            result.errors.push(CycleError::Source(e));
            return result;
        }
        Err(_) => {
            warn!(
                feed = %config.name,
                timeout_secs = settings.request_timeout.as_secs(),
                "fetch timed out, keeping known markers"
            );
            result.errors.push(CycleError::FetchTimeout {
                after: settings.request_timeout,
            });
            return result;
        }
    };
    result.total_features = fetched.total();
    result.skipped = fetched.skipped;

    // Diffing. The first occurrence of an id wins.
    let mut current = BTreeSet::new();
    let mut features = Vec::with_capacity(fetched.features.len());
    for feature in fetched.features {
        if current.insert(feature.id.clone()) {
            features.push(feature);
        } else {
            debug!(feed = %config.name, id = %feature.id, "duplicate feature id skipped");
            result.skipped = result.skipped.saturating_add(1);
        }
    }
    let diff = state.diff(&current);

    // Publishing
    for feature in &features {
        let event = build_present_event(feature, config, &settings.default_callsign_field, now);
        match publish_with_retry(publisher, &event, settings).await {
            Ok(()) => result.published = result.published.saturating_add(1),
            Err(e) => {
                warn!(feed = %config.name, error = %e, "present event not published");
                result.errors.push(e);
            }
        }
    }
    let undelivered = publish_removals(config, settings, diff.removed, publisher, &mut result).await;

    // Committing
    state.commit(current, undelivered);

    info!(
        feed = %config.name,
        published = result.published,
        removed = result.removed,
        total = result.total_features,
        skipped = result.skipped,
        errors = result.errors.len(),
        "cycle complete"
    );
    result
}

/// Emit a removal event for every id of `state` and empty it.
///
/// Removals that cannot be delivered stay pending and go out with the next
/// successful cycle.
pub async fn clear_feed<P: Publisher>(
    config: &FeedConfig,
    settings: &CycleSettings,
    state: &mut FeedState,
    publisher: &P,
) -> CycleResult {
    let mut result = CycleResult::new(&config.name);
    let targets = state.clear();
    let undelivered = publish_removals(config, settings, targets, publisher, &mut result).await;
    state.defer_removals(undelivered);

    info!(
        feed = %config.name,
        removed = result.removed,
        errors = result.errors.len(),
        "feed cleared"
    );
    result
}

/// Publish one removal per id; returns the ids whose event failed.
async fn publish_removals<P: Publisher>(
    config: &FeedConfig,
    settings: &CycleSettings,
    ids: BTreeSet<FeatureId>,
    publisher: &P,
    result: &mut CycleResult,
) -> BTreeSet<FeatureId> {
    let now = Utc::now();
    let mut undelivered = BTreeSet::new();
    for id in ids {
        let event = build_removal_event(&id, config, now);
        match publish_with_retry(publisher, &event, settings).await {
            Ok(()) => result.removed = result.removed.saturating_add(1),
            Err(e) => {
                warn!(feed = %config.name, error = %e, "removal event not published, will retry");
                result.errors.push(e);
                undelivered.insert(id);
            }
        }
    }
    undelivered
}

/// Publish `event`, retrying with exponential backoff.
async fn publish_with_retry<P: Publisher>(
    publisher: &P,
    event: &CotEvent,
    settings: &CycleSettings,
) -> Result<(), CycleError> {
    let mut attempt: u32 = 0;
    loop {
        let error = match tokio::time::timeout(
            settings.publish_timeout,
            publisher.publish(event, &event.group),
        )
        .await
        {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(source)) => CycleError::Publish {
                uid: event.uid.clone(),
                source,
            },
            Err(_) => CycleError::PublishTimeout {
                uid: event.uid.clone(),
                after: settings.publish_timeout,
            },
        };

        if attempt >= settings.publish_retries {
            return Err(error);
        }
        let backoff = settings
            .publish_backoff
            .saturating_mul(2_u32.saturating_pow(attempt));
        debug!(uid = %event.uid, attempt, error = %error, "publish failed, retrying");
        tokio::time::sleep(backoff).await;
        attempt = attempt.saturating_add(1);
    }
}
