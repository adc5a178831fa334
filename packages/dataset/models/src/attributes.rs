//! Per-feature attribute values.

use std::cmp::Ordering;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeMap as _};

/// A single scalar attribute value.
///
/// Dates and date-times are carried as canonical ISO-8601 text so that
/// lexical ordering matches chronological ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    String(String),
    /// ISO-8601 date (`YYYY-MM-DD`) or date-time (`YYYY-MM-DDTHH:MM:SS`).
    Date(String),
}

impl AttributeValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            Self::Date(_) => None,
        }
    }

    const fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Date(s) => Some(s.as_str()),
            Self::Int(_) | Self::Float(_) => None,
        }
    }

    /// Compares two values, coercing numeric text when the other side is
    /// a number.
    ///
    /// Returns `None` when the values cannot be ordered against each other.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(_) | Self::Float(_), _) | (_, Self::Int(_) | Self::Float(_)) => {
                self.as_number()?.partial_cmp(&other.as_number()?)
            }
            _ => Some(self.as_text()?.cmp(other.as_text()?)),
        }
    }

    /// Whether this value equals the textual `expected` value once coerced
    /// to the same kind.
    #[must_use]
    pub fn matches_text(&self, expected: &str) -> bool {
        self.compare(&Self::String(expected.to_string())) == Some(Ordering::Equal)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Attribute values of one feature.
///
/// Keeps the declaration order of the source table for display, but
/// equality ignores order: two attribute sets are equal when they hold the
/// same keys with the same values.
#[derive(Debug, Clone, Default)]
pub struct Attributes(Vec<(String, AttributeValue)>);

impl Attributes {
    /// Creates an empty attribute set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets `key` to `value`, replacing any previous value for that key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether a value is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of stored values.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no values are stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Mutable access to the values, in insertion order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = (&str, &mut AttributeValue)> {
        self.0.iter_mut().map(|(k, v)| (k.as_str(), v))
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Self::new();
        for (k, v) in iter {
            attributes.insert(k, v);
        }
        attributes
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct AttributesVisitor;

impl<'de> Visitor<'de> for AttributesVisitor {
    type Value = Attributes;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map of attribute values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut attributes = Attributes(Vec::with_capacity(access.size_hint().unwrap_or(0)));
        while let Some((key, value)) = access.next_entry::<String, AttributeValue>()? {
            attributes.insert(key, value);
        }
        Ok(attributes)
    }
}

/// Entries keep the order they are read in.
impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AttributesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_int_and_float() {
        let a = AttributeValue::Int(3);
        let b = AttributeValue::Float(2.5);
        assert_eq!(a.compare(&b), Some(Ordering::Greater));
        assert_eq!(b.compare(&a), Some(Ordering::Less));
    }

    #[test]
    fn numeric_text_is_coerced_against_numbers() {
        let value = AttributeValue::Int(42);
        assert_eq!(value.compare(&"42".into()), Some(Ordering::Equal));
        assert!(value.matches_text("42"));
        assert!(!value.matches_text("forty-two"));
    }

    #[test]
    fn dates_compare_chronologically() {
        let a = AttributeValue::Date("2023-12-31".to_string());
        let b = AttributeValue::Date("2024-01-01".to_string());
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(a.compare(&AttributeValue::Int(1)), None);
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut attributes = Attributes::new();
        attributes.insert("name", "Metz");
        attributes.insert("name", "Nancy");
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes.get("name"), Some(&AttributeValue::from("Nancy")));
    }

    #[test]
    fn equality_ignores_order() {
        let a: Attributes = [("a", AttributeValue::Int(1)), ("b", AttributeValue::Int(2))]
            .into_iter()
            .collect();
        let b: Attributes = [("b", AttributeValue::Int(2)), ("a", AttributeValue::Int(1))]
            .into_iter()
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn serializes_as_flat_map() {
        let attributes: Attributes = [
            ("code", AttributeValue::Int(57)),
            ("name", AttributeValue::from("Moselle")),
            ("area", AttributeValue::Float(6216.5)),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_value(&attributes).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"code": 57, "name": "Moselle", "area": 6216.5})
        );
        let back: Attributes = serde_json::from_value(json).unwrap();
        assert_eq!(back, attributes);
    }

    #[test]
    fn deserializing_keeps_the_source_order() {
        let attributes: Attributes =
            serde_json::from_str(r#"{"zone": "B", "code": 57, "area": 6216.5}"#).unwrap();
        let keys: Vec<&str> = attributes.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["zone", "code", "area"]);

        let json = serde_json::to_string(&attributes).unwrap();
        assert_eq!(json, r#"{"zone":"B","code":57,"area":6216.5}"#);
    }
}
