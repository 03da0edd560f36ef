//! Per-feed configuration.
//!
//! A [`FeedConfig`] describes one feature service to poll and how its
//! features are rendered as CoT events. Values are read from the `feeds`
//! list of the service configuration file. Structural validation (non-empty
//! name, positive intervals, parseable URL) happens when a feed is
//! registered, not during deserialization, so one broken entry cannot
//! prevent the other feeds from loading.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default polling interval in minutes.
pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;

/// Default stale window advertised on present events, in minutes (one day).
pub const DEFAULT_STALE_MINUTES: u64 = 1440;

/// Default CoT type for features without a type override.
pub const DEFAULT_COT_TYPE: &str = "a-f-G-U-C";

/// Default routing group.
pub const DEFAULT_GROUP: &str = "__ANON__";

/// Settings of one polled feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    /// Unique feed name, also part of every event uid.
    #[serde(default)]
    pub name: String,

    /// Full query URL of the feature service layer.
    #[serde(default)]
    pub url: String,

    /// Polling interval in minutes.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Validity window advertised to consumers, in minutes.
    #[serde(default = "default_stale_minutes")]
    pub stale_minutes: u64,

    /// CoT type used when no per-feature override applies.
    #[serde(default = "default_cot_type")]
    pub cot_type: String,

    /// Routing group the events are published to.
    #[serde(default = "default_group")]
    pub group: String,

    /// Attribute whose value selects a CoT type from `cot_type_mapping`.
    #[serde(default)]
    pub cot_type_field: Option<String>,

    /// Attribute value to CoT type overrides.
    #[serde(default)]
    pub cot_type_mapping: BTreeMap<String, String>,

    /// Attribute used as callsign, overriding the service-wide default.
    #[serde(default)]
    pub callsign_field: Option<String>,
}

impl FeedConfig {
    /// Create a feed with default rendering settings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            stale_minutes: DEFAULT_STALE_MINUTES,
            cot_type: DEFAULT_COT_TYPE.to_owned(),
            group: DEFAULT_GROUP.to_owned(),
            cot_type_field: None,
            cot_type_mapping: BTreeMap::new(),
            callsign_field: None,
        }
    }

    /// Polling interval as a [`Duration`].
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

fn default_interval_minutes() -> u64 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_stale_minutes() -> u64 {
    DEFAULT_STALE_MINUTES
}

fn default_cot_type() -> String {
    DEFAULT_COT_TYPE.to_owned()
}

fn default_group() -> String {
    DEFAULT_GROUP.to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn minimal_entry_gets_defaults() {
        let feed: FeedConfig = serde_json::from_value(serde_json::json!({
            "name": "bases",
            "url": "https://example.test/FeatureServer/0/query"
        }))
        .unwrap();
        assert_eq!(feed.interval_minutes, 15);
        assert_eq!(feed.stale_minutes, 1440);
        assert_eq!(feed.cot_type, "a-f-G-U-C");
        assert_eq!(feed.group, "__ANON__");
        assert!(feed.cot_type_field.is_none());
        assert!(feed.cot_type_mapping.is_empty());
        assert_eq!(feed.interval(), Duration::from_secs(900));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<FeedConfig, _> = serde_json::from_value(serde_json::json!({
            "name": "bases",
            "url": "https://example.test",
            "intervall_minutes": 5
        }));
        assert!(result.is_err());
    }

    #[test]
    fn missing_name_deserializes_empty() {
        let feed: FeedConfig =
            serde_json::from_value(serde_json::json!({"url": "https://example.test"})).unwrap();
        assert!(feed.name.is_empty());
    }
}
