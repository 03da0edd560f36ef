//! In-memory collaborators for tests and dry runs.
//!
//! [`ScriptedSource`] answers fetches from per-URL scripted responses and
//! [`RecordingPublisher`] keeps every published event in memory. Both can
//! be told to fail so that error paths can be exercised without a network
//! or a message bus.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arcfeed_types::{CotEvent, Feature};
use tokio::sync::Semaphore;

use crate::publish::{PublishError, Publisher};
use crate::source::{FeatureSource, FetchedFeatures, SourceError};

/// A [`FeatureSource`] returning scripted responses.
///
/// A response stays in place until replaced, so every fetch of a URL sees
/// the same features until the test changes them. Fetching a URL with no
/// script is a network error.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    responses: Mutex<BTreeMap<String, Result<FetchedFeatures, SourceError>>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl ScriptedSource {
    /// A source with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose fetches each wait for one permit of the returned
    /// semaphore before answering.
    pub fn with_gate() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let source = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (source, gate)
    }

    /// A source whose fetches sleep for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Answer fetches of `url` with `features`.
    pub fn set_features(&self, url: &str, features: Vec<Feature>) {
        self.set_response(url, Ok(FetchedFeatures::new(features)));
    }

    /// Answer fetches of `url` with `error`.
    pub fn fail_with(&self, url: &str, error: SourceError) {
        self.set_response(url, Err(error));
    }

    /// Answer fetches of `url` with an arbitrary result.
    pub fn set_response(&self, url: &str, response: Result<FetchedFeatures, SourceError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_owned(), response);
    }

    /// Number of fetches started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that were in progress at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn scripted(&self, url: &str) -> Result<FetchedFeatures, SourceError> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(SourceError::Network {
                    message: format!("no scripted response for {url}"),
                })
            })
    }
}

impl FeatureSource for ScriptedSource {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedFeatures, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.scripted(url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// A [`Publisher`] that records events instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(CotEvent, String)>>,
    fail_all: AtomicBool,
    failing_uids: Mutex<BTreeSet<String>>,
    attempts: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingPublisher {
    /// A publisher that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose publishes each sleep for `delay` first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make every publish fail (or succeed again).
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make publishes of the event with `uid` fail.
    pub fn fail_uid(&self, uid: &str) {
        self.failing_uids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid.to_owned());
    }

    /// Stop failing publishes of `uid`.
    pub fn heal_uid(&self, uid: &str) {
        self.failing_uids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uid);
    }

    /// Every successfully published event with its group, in order.
    pub fn published(&self) -> Vec<(CotEvent, String)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every successfully published event, in order.
    pub fn events(&self) -> Vec<CotEvent> {
        self.published().into_iter().map(|(event, _)| event).collect()
    }

    /// Uids of published present events, in order.
    pub fn present(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| !event.is_removal())
            .map(|event| event.uid)
            .collect()
    }

    /// Uids of published removal events, in order.
    pub fn removals(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(CotEvent::is_removal)
            .map(|event| event.uid)
            .collect()
    }

    /// Number of publish calls, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn should_fail(&self, uid: &str) -> bool {
        self.fail_all.load(Ordering::SeqCst)
            || self
                .failing_uids
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(uid)
    }
}

impl Publisher for RecordingPublisher {
    async fn publish(&self, event: &CotEvent, group: &str) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail(&event.uid) {
            return Err(PublishError::Transport {
                subject: group.to_owned(),
                message: "recording publisher set to fail".to_owned(),
            });
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.clone(), group.to_owned()));
        Ok(())
    }
}
