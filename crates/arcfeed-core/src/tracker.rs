//! Per-feed marker state.
//!
//! Each feed owns one [`FeedState`]: the identifiers that were present at
//! the source as of the last completed cycle, plus the identifiers whose
//! removal event has not been delivered yet. The [`FeedStateTable`] maps
//! feed names to independently locked states. It is owned by the registry
//! and handed to each cycle explicitly; nothing reaches it through a global.
//!
//! The per-feed lock doubles as the cycle serialization point: a cycle
//! holds its feed's lock from fetch to commit, so two cycles of the same
//! feed never interleave their diff and commit steps.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arcfeed_types::FeatureId;
use tokio::sync::Mutex;

/// Shared handle to one feed's state.
pub type FeedHandle = Arc<Mutex<FeedState>>;

/// Identifiers to publish for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDiff {
    /// Identifiers present in the current fetch (all of them are re-sent).
    pub present: BTreeSet<FeatureId>,
    /// Identifiers that need a removal event.
    pub removed: BTreeSet<FeatureId>,
}

/// Marker state of one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedState {
    known_ids: BTreeSet<FeatureId>,
    pending_removals: BTreeSet<FeatureId>,
}

impl FeedState {
    /// An empty state, as after start-up.
    pub const fn new() -> Self {
        Self {
            known_ids: BTreeSet::new(),
            pending_removals: BTreeSet::new(),
        }
    }

    /// Identifiers present as of the last committed cycle.
    pub const fn known_ids(&self) -> &BTreeSet<FeatureId> {
        &self.known_ids
    }

    /// Identifiers whose removal event failed to publish and will be retried.
    pub const fn pending_removals(&self) -> &BTreeSet<FeatureId> {
        &self.pending_removals
    }

    /// Compare `current` against the known identifiers.
    ///
    /// `removed` is `known \ current`, plus any earlier undelivered removal
    /// whose feature is still absent. Does not mutate state.
    pub fn diff(&self, current: &BTreeSet<FeatureId>) -> FeedDiff {
        let removed = self
            .known_ids
            .union(&self.pending_removals)
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect();
        FeedDiff {
            present: current.clone(),
            removed,
        }
    }

    /// Record the outcome of a cycle.
    ///
    /// `current` becomes the known set. `undelivered` are removal targets
    /// whose event could not be published; they are retried on the next
    /// cycle unless the feature comes back first.
    pub fn commit(&mut self, current: BTreeSet<FeatureId>, undelivered: BTreeSet<FeatureId>) {
        self.pending_removals = undelivered
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();
        self.known_ids = current;
    }

    /// Forget every identifier and return all that need a removal event.
    pub fn clear(&mut self) -> BTreeSet<FeatureId> {
        let mut removed = std::mem::take(&mut self.known_ids);
        removed.append(&mut self.pending_removals);
        removed
    }

    /// Put back removal targets whose event could not be published during
    /// a clear.
    pub fn defer_removals(&mut self, undelivered: BTreeSet<FeatureId>) {
        self.pending_removals.extend(undelivered);
    }
}

/// Per-feed states keyed by feed name.
#[derive(Debug, Default)]
pub struct FeedStateTable {
    feeds: Mutex<BTreeMap<String, FeedHandle>>,
}

impl FeedStateTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The state of `feed`, created empty if the feed has none yet.
    pub async fn handle(&self, feed: &str) -> FeedHandle {
        let mut feeds = self.feeds.lock().await;
        Arc::clone(
            feeds
                .entry(feed.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(FeedState::new()))),
        )
    }

    /// The state of `feed`, if it exists.
    pub async fn get(&self, feed: &str) -> Option<FeedHandle> {
        self.feeds.lock().await.get(feed).map(Arc::clone)
    }

    /// Drop the state of `feed`.
    pub async fn remove(&self, feed: &str) -> Option<FeedHandle> {
        self.feeds.lock().await.remove(feed)
    }

    /// Snapshot of the known identifiers of `feed`.
    ///
    /// Waits for an in-flight cycle of that feed to finish.
    pub async fn known_ids(&self, feed: &str) -> Option<BTreeSet<FeatureId>> {
        let handle = self.get(feed).await?;
        let state = handle.lock().await;
        Some(state.known_ids().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[i64]) -> BTreeSet<FeatureId> {
        values.iter().copied().map(FeatureId::from).collect()
    }

    #[test]
    fn diff_is_set_difference() {
        let mut state = FeedState::new();
        state.commit(ids(&[1, 2, 3]), BTreeSet::new());

        let diff = state.diff(&ids(&[2, 3, 4]));
        assert_eq!(diff.present, ids(&[2, 3, 4]));
        assert_eq!(diff.removed, ids(&[1]));

        // diff alone never mutates
        assert_eq!(state.known_ids(), &ids(&[1, 2, 3]));
    }

    #[test]
    fn identical_fetch_removes_nothing() {
        let mut state = FeedState::new();
        state.commit(ids(&[1, 2]), BTreeSet::new());
        assert!(state.diff(&ids(&[1, 2])).removed.is_empty());
    }

    #[test]
    fn undelivered_removals_are_retried_until_sent() {
        let mut state = FeedState::new();
        state.commit(ids(&[1, 2]), BTreeSet::new());

        // removal of 1 failed to publish
        state.commit(ids(&[2]), ids(&[1]));
        assert_eq!(state.known_ids(), &ids(&[2]));
        assert_eq!(state.pending_removals(), &ids(&[1]));
        assert_eq!(state.diff(&ids(&[2])).removed, ids(&[1]));

        // delivered on the next cycle
        state.commit(ids(&[2]), BTreeSet::new());
        assert!(state.pending_removals().is_empty());
        assert!(state.diff(&ids(&[2])).removed.is_empty());
    }

    #[test]
    fn reappearing_feature_cancels_pending_removal() {
        let mut state = FeedState::new();
        state.commit(ids(&[2]), ids(&[1]));
        let diff = state.diff(&ids(&[1, 2]));
        assert!(diff.removed.is_empty());
        state.commit(ids(&[1, 2]), BTreeSet::new());
        assert!(state.pending_removals().is_empty());
    }

    #[test]
    fn clear_returns_everything_and_empties() {
        let mut state = FeedState::new();
        state.commit(ids(&[2, 3]), ids(&[1]));
        assert_eq!(state.clear(), ids(&[1, 2, 3]));
        assert!(state.known_ids().is_empty());
        assert!(state.pending_removals().is_empty());
    }

    #[test]
    fn deferred_clear_removals_stay_pending() {
        let mut state = FeedState::new();
        state.commit(ids(&[1, 2]), BTreeSet::new());
        let targets = state.clear();

        state.defer_removals(targets);
        assert!(state.known_ids().is_empty());
        assert_eq!(state.pending_removals(), &ids(&[1, 2]));
        assert_eq!(state.diff(&ids(&[2])).removed, ids(&[1]));
    }

    #[tokio::test]
    async fn table_keeps_feeds_independent() {
        let table = FeedStateTable::new();
        let a = table.handle("a").await;
        a.lock().await.commit(ids(&[1]), BTreeSet::new());

        let b = table.handle("b").await;
        assert!(b.lock().await.known_ids().is_empty());

        // same handle on second lookup
        let again = table.handle("a").await;
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(table.known_ids("a").await, Some(ids(&[1])));

        assert!(table.remove("a").await.is_some());
        assert_eq!(table.known_ids("a").await, None);
    }
}
