//! Serializable summaries returned by management operations.

use serde::{Deserialize, Serialize};

/// Outcome of one polling or clearing cycle for one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Feed name.
    pub feed: String,
    /// Whether the cycle finished without any error.
    pub success: bool,
    /// Present events published.
    pub published: usize,
    /// Removal events published.
    pub removed: usize,
    /// Features returned by the source, including skipped ones.
    pub total_features: usize,
    /// Features skipped because they could not be parsed or were duplicates.
    pub skipped: usize,
    /// Human-readable error messages.
    pub errors: Vec<String>,
}

/// A feed definition rejected during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedFeed {
    /// Feed name as given (may be empty).
    pub name: String,
    /// Why it was rejected.
    pub reason: String,
}

/// What changed when a configuration was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Feeds that were not registered before.
    pub added: Vec<String>,
    /// Feeds whose definition changed.
    pub updated: Vec<String>,
    /// Feeds whose definition was identical.
    pub unchanged: Vec<String>,
    /// Feeds no longer present in the configuration.
    pub removed: Vec<String>,
    /// Invalid feed definitions that were not scheduled.
    pub rejected: Vec<RejectedFeed>,
}
