//! Feature identifiers.
//!
//! Feature services expose a numeric object id, but some layers only carry
//! a textual key. Both are normalised into a [`FeatureId`] holding the
//! canonical string form, so ids compare the same way regardless of how
//! the source encoded them.

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeValue;

/// Stable identifier of a feature within one feed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    /// Create an identifier from its canonical string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an identifier from an attribute value.
    ///
    /// Integers, integral floats and non-blank text are usable. Nulls,
    /// booleans, fractional floats and blank text are not.
    pub fn from_attribute(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Integer(n) => Some(Self(n.to_string())),
            AttributeValue::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                Some(Self(value.render()?))
            }
            AttributeValue::Text(s) if !s.trim().is_empty() => Some(Self(s.trim().to_owned())),
            _ => None,
        }
    }
}

impl core::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for FeatureId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for FeatureId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}
