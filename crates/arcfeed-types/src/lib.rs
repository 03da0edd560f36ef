//! Shared type definitions for the ArcGIS feed to CoT bridge.
//!
//! Every crate in the workspace speaks in these types: the source client
//! produces [`Feature`] records, the feed registry is configured with
//! [`FeedConfig`] values, and the event builder emits [`CotEvent`] values
//! that are handed to a publisher.
//!
//! # Modules
//!
//! - [`ids`] -- Feature identifiers
//! - [`attributes`] -- Loosely-typed attribute bags returned by feature services
//! - [`feature`] -- One record of a feature query
//! - [`feed`] -- Per-feed configuration
//! - [`cot`] -- Cursor-on-Target events
//! - [`report`] -- Serializable cycle reports for management surfaces

pub mod attributes;
pub mod cot;
pub mod feature;
pub mod feed;
pub mod ids;
pub mod report;

// Re-export all public types at crate root for convenience.
pub use attributes::{AttributeValue, Attributes, Lookup};
pub use cot::{CotEvent, CotPoint, REMOVAL_TYPE, UNKNOWN_POINT_VALUE};
pub use feature::Feature;
pub use feed::FeedConfig;
pub use ids::FeatureId;
pub use report::{CycleReport, ReconcileReport, RejectedFeed};
