//! One record returned by a feature query.

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeValue, Attributes};
use crate::ids::FeatureId;

/// A feature with a WGS84 point position.
///
/// Features only live for the duration of one polling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Stable identifier, unique within one response.
    pub id: FeatureId,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Field values of the feature.
    pub attributes: Attributes,
}

impl Feature {
    /// Create a feature with an empty attribute bag.
    pub fn new(id: impl Into<FeatureId>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            attributes: Attributes::new(),
        }
    }

    /// Builder-style attribute insertion.
    #[must_use]
    pub fn with_attribute(
        mut self,
        field: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(field, value);
        self
    }
}
