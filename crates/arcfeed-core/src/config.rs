//! Configuration loading and typed config structures.
//!
//! The service is configured from a single YAML file. This module defines
//! strongly-typed structs that mirror the file, a loader that reads it, and
//! per-feed validation. Validation runs per feed: an invalid
//! entry is rejected on its own and the remaining feeds are still
//! scheduled.
//!
//! ```yaml
//! enabled: true
//! request_timeout_secs: 30
//! callsign_field: InstallationName
//! publish:
//!   timeout_secs: 10
//!   retries: 1
//! bus:
//!   nats_url: nats://localhost:4222
//!   node_id: arcfeed
//! feeds:
//!   - name: installations
//!     url: https://services.example.test/arcgis/rest/services/x/FeatureServer/0/query?where=1%3D1&outFields=*&outSR=4326&f=json
//!     interval_minutes: 15
//!     cot_type_field: status
//!     cot_type_mapping:
//!       damaged: a-f-G-U-C-D
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use arcfeed_types::FeedConfig;
use serde::{Deserialize, Serialize};

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A feed definition has no name.
    #[error("feed definition is missing a name")]
    MissingName,

    /// A feed definition has no URL.
    #[error("feed '{feed}' is missing a url")]
    MissingUrl {
        /// The offending feed.
        feed: String,
    },

    /// A feed URL does not parse.
    #[error("feed '{feed}' has an invalid url: {reason}")]
    InvalidUrl {
        /// The offending feed.
        feed: String,
        /// Parser message.
        reason: String,
    },

    /// A feed has a zero polling interval.
    #[error("feed '{feed}' must have a positive interval_minutes")]
    NonPositiveInterval {
        /// The offending feed.
        feed: String,
    },

    /// A feed has a zero stale window.
    #[error("feed '{feed}' must have a positive stale_minutes")]
    NonPositiveStale {
        /// The offending feed.
        feed: String,
    },

    /// Two feed definitions share a name.
    #[error("feed '{feed}' is defined more than once")]
    DuplicateName {
        /// The duplicated name.
        feed: String,
    },

    /// A service-wide setting is out of range.
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting {
        /// Configuration key.
        key: &'static str,
        /// Why the value is invalid.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level service configuration.
///
/// Mirrors the structure of the YAML file. All fields have defaults, so an
/// empty document is a valid (feedless) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Global switch. When false, no scheduled cycle runs; manual triggers
    /// are still served.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Timeout for one feature service request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attribute used as callsign when a feed does not name its own.
    #[serde(default = "default_callsign_field")]
    pub callsign_field: String,

    /// Publication settings.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Message bus connection settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Feeds to poll.
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_timeout_secs: default_request_timeout_secs(),
            callsign_field: default_callsign_field(),
            publish: PublishConfig::default(),
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
            feeds: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override bus settings:
    /// - `NATS_URL` overrides `bus.nats_url`
    /// - `ARCFEED_NODE_ID` overrides `bus.node_id`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML for this
    /// schema.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML for
    /// this schema.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.bus.apply_env_overrides();
        Ok(config)
    }

    /// Check service-wide settings.
    ///
    /// Feed definitions are checked separately by [`validate_feeds`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] for a zero request or
    /// publish timeout.
    pub fn validate_settings(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "request_timeout_secs",
                reason: "must be positive".to_owned(),
            });
        }
        if self.publish.timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "publish.timeout_secs",
                reason: "must be positive".to_owned(),
            });
        }
        Ok(())
    }

    /// Request timeout as a [`Duration`].
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Publication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    /// Timeout for one publish call, in seconds.
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after a failed publish.
    #[serde(default = "default_publish_retries")]
    pub retries: u32,

    /// Initial backoff between attempts, in milliseconds. Doubles per retry.
    #[serde(default = "default_publish_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_publish_timeout_secs(),
            retries: default_publish_retries(),
            backoff_ms: default_publish_backoff_ms(),
        }
    }
}

/// Message bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Identifier of this node, carried in every message envelope.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Subject consumed by the CoT parser.
    #[serde(default = "default_parser_subject")]
    pub parser_subject: String,

    /// Prefix of per-group subjects (`{prefix}.{group}.OUT`).
    #[serde(default = "default_group_subject_prefix")]
    pub group_subject_prefix: String,

    /// Subject receiving every message.
    #[serde(default = "default_firehose_subject")]
    pub firehose_subject: String,
}

impl BusConfig {
    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = val;
        }
        if let Ok(val) = std::env::var("ARCFEED_NODE_ID") {
            self.node_id = val;
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            node_id: default_node_id(),
            parser_subject: default_parser_subject(),
            group_subject_prefix: default_group_subject_prefix(),
            firehose_subject: default_firehose_subject(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Check one feed definition.
///
/// # Errors
///
/// Returns the first problem found: missing name or url, an unparseable
/// url, or a zero interval or stale window.
pub fn validate_feed(feed: &FeedConfig) -> Result<(), ConfigError> {
    if feed.name.trim().is_empty() {
        return Err(ConfigError::MissingName);
    }
    if feed.url.trim().is_empty() {
        return Err(ConfigError::MissingUrl {
            feed: feed.name.clone(),
        });
    }
    reqwest::Url::parse(&feed.url).map_err(|e| ConfigError::InvalidUrl {
        feed: feed.name.clone(),
        reason: e.to_string(),
    })?;
    if feed.interval_minutes == 0 {
        return Err(ConfigError::NonPositiveInterval {
            feed: feed.name.clone(),
        });
    }
    if feed.stale_minutes == 0 {
        return Err(ConfigError::NonPositiveStale {
            feed: feed.name.clone(),
        });
    }
    Ok(())
}

/// Split feed definitions into valid ones and rejections.
///
/// The first definition of a name wins; later duplicates are rejected.
pub fn validate_feeds(feeds: &[FeedConfig]) -> (Vec<FeedConfig>, Vec<(String, ConfigError)>) {
    let mut seen = BTreeSet::new();
    let mut valid = Vec::with_capacity(feeds.len());
    let mut rejected = Vec::new();

    for feed in feeds {
        if let Err(e) = validate_feed(feed) {
            rejected.push((feed.name.clone(), e));
            continue;
        }
        if !seen.insert(feed.name.clone()) {
            rejected.push((
                feed.name.clone(),
                ConfigError::DuplicateName {
                    feed: feed.name.clone(),
                },
            ));
            continue;
        }
        valid.push(feed.clone());
    }

    (valid, rejected)
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

const fn default_request_timeout_secs() -> u64 {
    30
}

fn default_callsign_field() -> String {
    "InstallationName".to_owned()
}

const fn default_publish_timeout_secs() -> u64 {
    10
}

const fn default_publish_retries() -> u32 {
    1
}

const fn default_publish_backoff_ms() -> u64 {
    250
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_node_id() -> String {
    "arcfeed".to_owned()
}

fn default_parser_subject() -> String {
    "cot_parser".to_owned()
}

fn default_group_subject_prefix() -> String {
    "groups".to_owned()
}

fn default_firehose_subject() -> String {
    "firehose".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = ServiceConfig::parse("{}").unwrap();
        assert!(config.enabled);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.callsign_field, "InstallationName");
        assert_eq!(config.publish.retries, 1);
        assert_eq!(config.bus.parser_subject, "cot_parser");
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
enabled: false
request_timeout_secs: 12
callsign_field: Name
publish:
  timeout_secs: 3
  retries: 0
logging:
  level: debug
  json: true
feeds:
  - name: fires
    url: https://example.test/FeatureServer/0/query?f=json
    interval_minutes: 5
    stale_minutes: 60
    cot_type: a-h-G
    group: Fire
    cot_type_field: status
    cot_type_mapping:
      active: a-f-G-U-C
      damaged: a-f-G-U-C-D
    callsign_field: IncidentName
";
        let config = ServiceConfig::parse(yaml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.request_timeout(), Duration::from_secs(12));
        assert_eq!(config.publish.timeout_secs, 3);
        assert_eq!(config.publish.retries, 0);
        assert!(config.logging.json);

        let feed = config.feeds.first().unwrap();
        assert_eq!(feed.name, "fires");
        assert_eq!(feed.interval_minutes, 5);
        assert_eq!(feed.group, "Fire");
        assert_eq!(feed.cot_type_field.as_deref(), Some("status"));
        assert_eq!(
            feed.cot_type_mapping.get("damaged").map(String::as_str),
            Some("a-f-G-U-C-D")
        );
        assert_eq!(feed.callsign_field.as_deref(), Some("IncidentName"));
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let result = ServiceConfig::parse("enable: true\n");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let result = ServiceConfig::parse("request_timeout_secs: soon\n");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn validate_feed_reports_each_problem() {
        let ok = FeedConfig::new("a", "https://example.test/q");
        assert!(validate_feed(&ok).is_ok());

        let mut no_name = ok.clone();
        no_name.name = "  ".to_owned();
        assert!(matches!(validate_feed(&no_name), Err(ConfigError::MissingName)));

        let mut no_url = ok.clone();
        no_url.url = String::new();
        assert!(matches!(
            validate_feed(&no_url),
            Err(ConfigError::MissingUrl { .. })
        ));

        let mut bad_url = ok.clone();
        bad_url.url = "not a url".to_owned();
        assert!(matches!(
            validate_feed(&bad_url),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let mut zero_interval = ok.clone();
        zero_interval.interval_minutes = 0;
        assert!(matches!(
            validate_feed(&zero_interval),
            Err(ConfigError::NonPositiveInterval { .. })
        ));

        let mut zero_stale = ok;
        zero_stale.stale_minutes = 0;
        assert!(matches!(
            validate_feed(&zero_stale),
            Err(ConfigError::NonPositiveStale { .. })
        ));
    }

    #[test]
    fn validate_feeds_keeps_good_entries() {
        let mut bad = FeedConfig::new("b", "https://example.test/q");
        bad.interval_minutes = 0;
        let feeds = vec![
            FeedConfig::new("a", "https://example.test/q"),
            bad,
            FeedConfig::new("a", "https://example.test/other"),
            FeedConfig::new("c", "https://example.test/q"),
        ];
        let (valid, rejected) = validate_feeds(&feeds);
        let names: Vec<&str> = valid.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(rejected.len(), 2);
        assert!(matches!(
            rejected.get(1),
            Some((_, ConfigError::DuplicateName { .. }))
        ));
    }

    #[test]
    fn example_file_is_valid() {
        let yaml = include_str!("../../../arcfeed-config.example.yaml");
        let config = ServiceConfig::parse(yaml).unwrap();
        assert!(config.validate_settings().is_ok());
        let (valid, rejected) = validate_feeds(&config.feeds);
        assert_eq!(valid.len(), 2);
        assert!(rejected.is_empty());
    }

    #[test]
    fn settings_validation() {
        let mut config = ServiceConfig::default();
        assert!(config.validate_settings().is_ok());
        config.request_timeout_secs = 0;
        assert!(config.validate_settings().is_err());
    }
}
