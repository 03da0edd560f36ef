//! Loosely-typed attribute bags.
//!
//! Feature services return an `attributes` object per feature whose field
//! set differs between layers. The bag is modelled as a map from field name
//! to a small tagged union of scalars. Lookups report a missing key and a
//! null value separately so callers can decide how to treat each.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Explicit JSON `null`.
    Null,
    /// A boolean flag.
    Bool(bool),
    /// A whole number.
    Integer(i64),
    /// A floating-point number.
    Float(f64),
    /// A text value.
    Text(String),
}

impl AttributeValue {
    /// Convert a JSON value into an attribute value.
    ///
    /// Returns `None` for arrays and objects, which feature services never
    /// use for attributes.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Canonical string form, or `None` for null.
    ///
    /// Integral floats render without a fractional part so that `3` and
    /// `3.0` map to the same key.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Integer(n) => Some(n.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Result of looking up one field in an [`Attributes`] bag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// The field is not present at all.
    Missing,
    /// The field is present with an explicit null.
    Null,
    /// The field carries a value.
    Value(&'a AttributeValue),
}

impl<'a> Lookup<'a> {
    /// The value, if the field carries one.
    pub const fn value(self) -> Option<&'a AttributeValue> {
        match self {
            Self::Value(v) => Some(v),
            Self::Missing | Self::Null => None,
        }
    }
}

/// Attribute bag of one feature, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    /// Create an empty bag.
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(field.into(), value.into());
    }

    /// Look up a field, distinguishing missing keys from nulls.
    pub fn lookup(&self, field: &str) -> Lookup<'_> {
        match self.0.get(field) {
            None => Lookup::Missing,
            Some(AttributeValue::Null) => Lookup::Null,
            Some(v) => Lookup::Value(v),
        }
    }

    /// The trimmed canonical string of a field, or `None` when the field is
    /// missing, null or blank.
    pub fn non_blank(&self, field: &str) -> Option<String> {
        self.lookup(field)
            .value()
            .and_then(AttributeValue::render)
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }

    /// Iterate over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_distinguishes_missing_and_null() {
        let mut attrs = Attributes::new();
        attrs.insert("a", AttributeValue::Null);
        attrs.insert("b", "x");
        assert_eq!(attrs.lookup("a"), Lookup::Null);
        assert_eq!(attrs.lookup("missing"), Lookup::Missing);
        assert_eq!(
            attrs.lookup("b"),
            Lookup::Value(&AttributeValue::Text("x".to_owned()))
        );
    }

    #[test]
    fn render_drops_fraction_for_integral_floats() {
        assert_eq!(AttributeValue::Float(3.0).render().as_deref(), Some("3"));
        assert_eq!(AttributeValue::Float(2.5).render().as_deref(), Some("2.5"));
        assert_eq!(AttributeValue::Integer(-7).render().as_deref(), Some("-7"));
        assert_eq!(AttributeValue::Null.render(), None);
    }

    #[test]
    fn non_blank_filters_whitespace() {
        let mut attrs = Attributes::new();
        attrs.insert("name", "   ");
        attrs.insert("other", " Depot ");
        assert_eq!(attrs.non_blank("name"), None);
        assert_eq!(attrs.non_blank("other").as_deref(), Some("Depot"));
    }

    #[test]
    fn from_json_rejects_nested_values() {
        assert_eq!(
            AttributeValue::from_json(&serde_json::json!(12)),
            Some(AttributeValue::Integer(12))
        );
        assert_eq!(
            AttributeValue::from_json(&serde_json::json!(1.25)),
            Some(AttributeValue::Float(1.25))
        );
        assert!(AttributeValue::from_json(&serde_json::json!([1, 2])).is_none());
        assert!(AttributeValue::from_json(&serde_json::json!({"k": 1})).is_none());
    }
}
