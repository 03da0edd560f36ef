//! Feed polling engine for the ArcGIS to CoT bridge.
//!
//! Polls ArcGIS feature services on per-feed schedules, renders every
//! feature as a Cursor-on-Target event, and emits removal events for
//! features that disappeared since the previous poll.
//!
//! # Modules
//!
//! - [`config`]: YAML service configuration and feed validation
//! - [`source`]: feature source trait and the ArcGIS HTTP client
//! - [`event`]: feature to CoT event conversion
//! - [`wire`]: CoT XML rendering and the bus envelope
//! - [`publish`]: publisher trait
//! - [`tracker`]: per-feed known identifiers
//! - [`processor`]: one fetch, diff, publish, commit cycle
//! - [`registry`]: per-feed timers, manual triggers, clears
//! - [`service`]: management operations and config reconciliation
//! - [`stub`]: in-memory source and publisher

pub mod config;
pub mod event;
pub mod processor;
pub mod publish;
pub mod registry;
pub mod service;
pub mod source;
pub mod stub;
pub mod tracker;
pub mod wire;

pub use config::{ConfigError, ServiceConfig};
pub use processor::{CycleError, CycleResult, CycleSettings};
pub use publish::{PublishError, Publisher};
pub use registry::FeedRegistry;
pub use service::{FeedService, ServiceError};
pub use source::{ArcGisClient, FeatureSource, SourceError};
