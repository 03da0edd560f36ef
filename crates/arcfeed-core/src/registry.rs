//! Feed registry and per-feed timers.
//!
//! Every registered feed gets its own timer task that runs a cycle every
//! `interval_minutes`, starting one interval after registration. The
//! registry owns the [`FeedStateTable`]; timers, manual triggers and clears
//! all go through the per-feed lock in that table, so at most one cycle of
//! a feed runs at a time. A scheduled tick or manual trigger that finds
//! the lock taken does not run (skip, not queue).
//!
//! Replacing or removing a feed stops its timer from ticking again. A
//! cycle that is already running is never interrupted; it finishes and
//! commits normally. Removal waits for that cycle before dropping the
//! feed's state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arcfeed_types::{FeatureId, FeedConfig};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, validate_feed};
use crate::processor::{CycleResult, CycleSettings, clear_feed, run_cycle};
use crate::publish::Publisher;
use crate::source::FeatureSource;
use crate::tracker::{FeedHandle, FeedStateTable};

/// State shared between the registry and its timer tasks.
struct Shared<S, P> {
    source: S,
    publisher: P,
    settings: RwLock<CycleSettings>,
    enabled: AtomicBool,
    states: FeedStateTable,
}

/// A running timer task.
struct FeedTimer {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl FeedTimer {
    /// Ask the task to stop after its current cycle, if any.
    fn stop(self) -> JoinHandle<()> {
        let _ = self.stop.send(());
        self.handle
    }
}

struct RegisteredFeed {
    config: Arc<FeedConfig>,
    timer: FeedTimer,
}

/// The set of scheduled feeds.
pub struct FeedRegistry<S, P> {
    shared: Arc<Shared<S, P>>,
    feeds: Mutex<BTreeMap<String, RegisteredFeed>>,
}

impl<S: FeatureSource, P: Publisher> FeedRegistry<S, P> {
    /// Create an empty registry.
    ///
    /// When `enabled` is false, timers keep ticking but do not run cycles;
    /// manual triggers and clears still work.
    pub fn new(source: S, publisher: P, settings: CycleSettings, enabled: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                publisher,
                settings: RwLock::new(settings),
                enabled: AtomicBool::new(enabled),
                states: FeedStateTable::new(),
            }),
            feeds: Mutex::new(BTreeMap::new()),
        }
    }

    /// The feature source shared by all feeds.
    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// The publisher shared by all feeds.
    pub fn publisher(&self) -> &P {
        &self.shared.publisher
    }

    /// Schedule a feed, replacing any feed of the same name.
    ///
    /// Replacing keeps the feed's known ids, so a configuration change does
    /// not delete markers.
    ///
    /// # Errors
    ///
    /// Returns the validation error for an invalid definition; nothing is
    /// scheduled or replaced in that case.
    pub async fn register(&self, config: FeedConfig) -> Result<(), ConfigError> {
        validate_feed(&config)?;
        let config = Arc::new(config);

        let mut feeds = self.feeds.lock().await;
        let handle = self.shared.states.handle(&config.name).await;
        let timer = spawn_timer(Arc::clone(&self.shared), Arc::clone(&config), handle);
        let previous = feeds.insert(
            config.name.clone(),
            RegisteredFeed {
                config: Arc::clone(&config),
                timer,
            },
        );
        drop(feeds);

        if let Some(previous) = previous {
            drop(previous.timer.stop());
            info!(feed = %config.name, interval_minutes = config.interval_minutes, "feed replaced");
        } else {
            info!(feed = %config.name, interval_minutes = config.interval_minutes, "feed registered");
        }
        Ok(())
    }

    /// Stop a feed's timer and forget its state.
    ///
    /// Waits for an in-flight cycle of the feed to finish before the state
    /// goes away, so a feed registered again under the same name never runs
    /// alongside it. No removal events are sent; use [`clear`](Self::clear)
    /// first for that. Returns false if the feed was not registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut feeds = self.feeds.lock().await;
        let Some(feed) = feeds.remove(name) else {
            return false;
        };
        drop(feed.timer.stop());

        // The registry lock stays held until the state is gone: a
        // concurrent register must not pick up the outgoing handle.
        if let Some(handle) = self.shared.states.get(name).await {
            let _running = handle.lock().await;
            self.shared.states.remove(name).await;
        }
        drop(feeds);

        info!(feed = name, "feed unregistered");
        true
    }

    /// Run one cycle of `name` now, outside its schedule.
    ///
    /// Returns `None` for an unknown feed. If a cycle of the feed is in
    /// flight, nothing runs and the result is [`CycleResult::busy`].
    pub async fn trigger_now(&self, name: &str) -> Option<CycleResult> {
        let (config, handle) = self.lookup(name).await?;
        let Ok(mut state) = handle.try_lock() else {
            info!(feed = name, "manual trigger rejected, cycle in flight");
            return Some(CycleResult::busy(name));
        };
        let settings = self.shared.settings.read().await.clone();
        let result = run_cycle(
            &config,
            &settings,
            &mut state,
            &self.shared.source,
            &self.shared.publisher,
        )
        .await;
        Some(result)
    }

    /// Trigger every registered feed concurrently.
    pub async fn trigger_all(&self) -> Vec<CycleResult> {
        let names = self.feed_names().await;
        join_all(names.iter().map(|name| self.trigger_now(name)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Send removal events for every known id of `name` and empty its state.
    ///
    /// Waits for an in-flight cycle of the feed to finish first. Returns
    /// `None` for an unknown feed.
    pub async fn clear(&self, name: &str) -> Option<CycleResult> {
        let (config, handle) = self.lookup(name).await?;
        let mut state = handle.lock().await;
        let settings = self.shared.settings.read().await.clone();
        Some(clear_feed(&config, &settings, &mut state, &self.shared.publisher).await)
    }

    /// Definitions of all registered feeds, ordered by name.
    pub async fn list_feeds(&self) -> Vec<FeedConfig> {
        self.feeds
            .lock()
            .await
            .values()
            .map(|feed| FeedConfig::clone(&feed.config))
            .collect()
    }

    /// Names of all registered feeds, ordered.
    pub async fn feed_names(&self) -> Vec<String> {
        self.feeds.lock().await.keys().cloned().collect()
    }

    /// Definition of one feed.
    pub async fn feed(&self, name: &str) -> Option<FeedConfig> {
        self.feeds
            .lock()
            .await
            .get(name)
            .map(|feed| FeedConfig::clone(&feed.config))
    }

    /// Identifiers currently known for `name`.
    pub async fn known_ids(&self, name: &str) -> Option<BTreeSet<FeatureId>> {
        self.shared.states.known_ids(name).await
    }

    /// Turn scheduled cycles on or off.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.shared.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(enabled, "scheduled polling toggled");
        }
    }

    /// Whether scheduled cycles run.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Replace the settings used by cycles that start from now on.
    pub async fn update_settings(&self, settings: CycleSettings) {
        *self.shared.settings.write().await = settings;
    }

    /// The settings cycles currently use.
    pub async fn settings(&self) -> CycleSettings {
        self.shared.settings.read().await.clone()
    }

    /// Stop every timer and wait for running cycles to finish.
    pub async fn shutdown(&self) {
        let feeds = std::mem::take(&mut *self.feeds.lock().await);
        let handles: Vec<_> = feeds
            .into_values()
            .map(|feed| feed.timer.stop())
            .collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "feed timer ended abnormally");
            }
        }
        info!("registry shut down");
    }

    async fn lookup(&self, name: &str) -> Option<(Arc<FeedConfig>, FeedHandle)> {
        let feeds = self.feeds.lock().await;
        let config = Arc::clone(&feeds.get(name)?.config);
        let handle = self.shared.states.handle(name).await;
        Some((config, handle))
    }
}

fn spawn_timer<S: FeatureSource, P: Publisher>(
    shared: Arc<Shared<S, P>>,
    config: Arc<FeedConfig>,
    state: FeedHandle,
) -> FeedTimer {
    let (stop, stopped) = oneshot::channel();
    let handle = tokio::spawn(run_timer(shared, config, state, stopped));
    FeedTimer { stop, handle }
}

async fn run_timer<S: FeatureSource, P: Publisher>(
    shared: Arc<Shared<S, P>>,
    config: Arc<FeedConfig>,
    state: FeedHandle,
    mut stopped: oneshot::Receiver<()>,
) {
    let period = config.interval();
    let Some(first) = Instant::now().checked_add(period) else {
        warn!(feed = %config.name, "interval too large, feed will only run on demand");
        let _ = stopped.await;
        return;
    };
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut stopped => break,
            _ = ticker.tick() => {}
        }

        if !shared.enabled.load(Ordering::SeqCst) {
            debug!(feed = %config.name, "polling disabled, tick ignored");
            continue;
        }
        let Ok(mut guard) = state.try_lock() else {
            info!(feed = %config.name, "previous cycle still running, tick skipped");
            continue;
        };
        let settings = shared.settings.read().await.clone();
        run_cycle(&config, &settings, &mut guard, &shared.source, &shared.publisher).await;
    }
    debug!(feed = %config.name, "feed timer stopped");
}
