//! Feature source abstraction and the ArcGIS feature service client.
//!
//! A [`FeatureSource`] turns a query URL into a list of [`Feature`]
//! records. The production implementation, [`ArcGisClient`], issues one
//! HTTP GET against a FeatureServer query endpoint and parses the JSON
//! feature collection:
//!
//! ```json
//! {"features": [{"geometry": {"x": -122.4, "y": 37.7},
//!                "attributes": {"OBJECTID": 1, "Name": "Depot"}}]}
//! ```
//!
//! Individual malformed features are skipped and counted; only a failure
//! of the request as a whole is reported as an error.

use std::future::Future;
use std::time::Duration;

use arcfeed_types::{AttributeValue, Attributes, Feature, FeatureId};
use tracing::debug;

/// Attributes probed, in order, for the stable feature identifier.
pub const ID_FIELDS: [&str; 4] = ["OBJECTID", "OBJECTID_1", "FID", "ObjectId"];

/// Maximum number of response body bytes kept in an error message.
const MAX_ERROR_BODY_LEN: usize = 512;

/// Errors returned by a feature source.
///
/// All variants are recoverable: the cycle that hit them publishes nothing
/// and leaves the feed's known identifiers untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Connection failure, timeout, or an unreadable response body.
    #[error("network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// The service answered with a non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        body: String,
    },

    /// The body is not a feature collection.
    #[error("parse error: {message}")]
    Parse {
        /// Description of the failure.
        message: String,
    },

    /// The service returned an ArcGIS error document.
    #[error("service error {code}: {message}")]
    Remote {
        /// ArcGIS error code (0 when absent).
        code: i64,
        /// ArcGIS error message.
        message: String,
    },
}

impl SourceError {
    /// Whether the failure is a transport problem rather than a bad payload.
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Status { .. })
    }
}

/// Why a single feature was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeatureRejection {
    /// The feature is not a JSON object.
    #[error("feature is not an object")]
    NotAnObject,

    /// `geometry.x` or `geometry.y` is missing or not a number.
    #[error("feature has no point geometry")]
    MissingGeometry,

    /// The coordinates are outside WGS84 bounds.
    #[error("coordinates ({x}, {y}) are not WGS84 degrees")]
    OutOfRange {
        /// Longitude as received.
        x: String,
        /// Latitude as received.
        y: String,
    },

    /// An attribute holds an array or object.
    #[error("attribute '{field}' is not a scalar")]
    NonScalarAttribute {
        /// The offending field.
        field: String,
    },

    /// None of the identifier fields carries a usable value.
    #[error("feature has no identifier")]
    MissingId,
}

/// Features parsed from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedFeatures {
    /// Features that parsed successfully, in response order.
    pub features: Vec<Feature>,
    /// Number of features that were skipped.
    pub skipped: usize,
}

impl FetchedFeatures {
    /// Wrap already-parsed features.
    pub const fn new(features: Vec<Feature>) -> Self {
        Self {
            features,
            skipped: 0,
        }
    }

    /// Total features in the response, including skipped ones.
    pub const fn total(&self) -> usize {
        self.features.len().saturating_add(self.skipped)
    }
}

/// A source of features for a feed.
///
/// Implementations must be shareable across feed workers; every feed's
/// timer task calls [`fetch`](Self::fetch) on the same instance.
pub trait FeatureSource: Send + Sync + 'static {
    /// Query `url` and parse the returned features.
    ///
    /// `timeout` bounds the whole request.
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<FetchedFeatures, SourceError>> + Send;
}

/// HTTP client for ArcGIS FeatureServer query endpoints.
#[derive(Debug, Clone, Default)]
pub struct ArcGisClient {
    client: reqwest::Client,
}

impl ArcGisClient {
    /// Create a client with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl FeatureSource for ArcGisClient {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedFeatures, SourceError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SourceError::Network {
                message: describe_request_error(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY_LEN),
            });
        }

        let body = response.text().await.map_err(|e| SourceError::Network {
            message: describe_request_error(&e),
        })?;

        let fetched = parse_feature_collection(&body)?;
        debug!(
            url = url,
            features = fetched.features.len(),
            skipped = fetched.skipped,
            "fetched features"
        );
        Ok(fetched)
    }
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    s.get(..end).unwrap_or_default().to_owned()
}

/// Parse a feature collection response body.
///
/// # Errors
///
/// Returns [`SourceError::Parse`] when the body is not JSON or has no
/// `features` array, and [`SourceError::Remote`] for an ArcGIS error
/// document.
pub fn parse_feature_collection(body: &str) -> Result<FetchedFeatures, SourceError> {
    let doc: serde_json::Value = serde_json::from_str(body).map_err(|e| SourceError::Parse {
        message: format!("response is not JSON: {e}"),
    })?;

    if let Some(error) = doc.get("error") {
        return Err(SourceError::Remote {
            code: error
                .get("code")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0),
            message: error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error")
                .to_owned(),
        });
    }

    let raw_features = doc
        .get("features")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| SourceError::Parse {
            message: "response has no features array".to_owned(),
        })?;

    let mut fetched = FetchedFeatures {
        features: Vec::with_capacity(raw_features.len()),
        skipped: 0,
    };
    for raw in raw_features {
        match parse_feature(raw) {
            Ok(feature) => fetched.features.push(feature),
            Err(reason) => {
                debug!(reason = %reason, "skipping feature");
                fetched.skipped = fetched.skipped.saturating_add(1);
            }
        }
    }
    Ok(fetched)
}

/// Parse one element of the `features` array.
///
/// # Errors
///
/// Returns the [`FeatureRejection`] explaining why the feature is unusable.
pub fn parse_feature(raw: &serde_json::Value) -> Result<Feature, FeatureRejection> {
    let object = raw.as_object().ok_or(FeatureRejection::NotAnObject)?;

    let geometry = object.get("geometry");
    let x = geometry
        .and_then(|g| g.get("x"))
        .and_then(serde_json::Value::as_f64)
        .ok_or(FeatureRejection::MissingGeometry)?;
    let y = geometry
        .and_then(|g| g.get("y"))
        .and_then(serde_json::Value::as_f64)
        .ok_or(FeatureRejection::MissingGeometry)?;
    if !(-180.0..=180.0).contains(&x) || !(-90.0..=90.0).contains(&y) {
        return Err(FeatureRejection::OutOfRange {
            x: x.to_string(),
            y: y.to_string(),
        });
    }

    let mut attributes = Attributes::new();
    if let Some(map) = object.get("attributes").and_then(serde_json::Value::as_object) {
        for (field, value) in map {
            let value = AttributeValue::from_json(value).ok_or_else(|| {
                FeatureRejection::NonScalarAttribute {
                    field: field.clone(),
                }
            })?;
            attributes.insert(field.clone(), value);
        }
    }

    let id = resolve_feature_id(&attributes).ok_or(FeatureRejection::MissingId)?;

    Ok(Feature {
        id,
        latitude: y,
        longitude: x,
        attributes,
    })
}

/// The first usable identifier among [`ID_FIELDS`].
pub fn resolve_feature_id(attributes: &Attributes) -> Option<FeatureId> {
    ID_FIELDS
        .iter()
        .filter_map(|field| attributes.lookup(field).value())
        .find_map(FeatureId::from_attribute)
}
