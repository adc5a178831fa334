//! Attribute filters restricting which features a layer renders.

use std::cmp::Ordering;

use cartoforge_database_models::FilterRecord;
use cartoforge_dataset_models::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::serialize::type_tagged;
use crate::style::parse_tag;
use crate::{Validate, ValidationError};

/// Comparison applied between a feature attribute and a filter value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum Operator {
    #[serde(rename = "==")]
    #[strum(serialize = "==")]
    Eq,
    #[serde(rename = "!=")]
    #[strum(serialize = "!=")]
    Ne,
    #[serde(rename = ">")]
    #[strum(serialize = ">")]
    Gt,
    #[serde(rename = ">=")]
    #[strum(serialize = ">=")]
    Ge,
    #[serde(rename = "<")]
    #[strum(serialize = "<")]
    Lt,
    #[serde(rename = "<=")]
    #[strum(serialize = "<=")]
    Le,
}

impl Operator {
    /// Whether an attribute ordered `ordering` relative to the filter value
    /// passes. `None` means the two could not be compared, which only `!=`
    /// accepts.
    #[must_use]
    pub const fn accepts(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Ne, None) => true,
            (_, None) => false,
            (Self::Eq, Some(o)) => matches!(o, Ordering::Equal),
            (Self::Ne, Some(o)) => !matches!(o, Ordering::Equal),
            (Self::Gt, Some(o)) => matches!(o, Ordering::Greater),
            (Self::Ge, Some(o)) => !matches!(o, Ordering::Less),
            (Self::Lt, Some(o)) => matches!(o, Ordering::Less),
            (Self::Le, Some(o)) => !matches!(o, Ordering::Greater),
        }
    }
}

/// `key <operator> value`, evaluated against a feature's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self")]
pub struct Filter {
    pub key: String,
    pub operator: Operator,
    pub value: AttributeValue,
}

type_tagged!(Filter, "Filter");

impl Filter {
    /// Creates a filter.
    #[must_use]
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    /// Whether a feature with `attributes` passes the filter. A feature
    /// lacking the attribute never passes.
    #[must_use]
    pub fn matches(&self, attributes: &Attributes) -> bool {
        attributes
            .get(&self.key)
            .is_some_and(|actual| self.operator.accepts(actual.compare(&self.value)))
    }

    /// Hydrates and validates a persisted filter.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the operator is unknown or the key is
    /// empty.
    pub fn from_persisted(record: &FilterRecord) -> Result<Self, ValidationError> {
        let mut filter = Self {
            key: record.key.clone(),
            operator: parse_tag("operator", &record.operator)?,
            value: record.value.clone(),
        };
        filter.validate()?;
        Ok(filter)
    }

    /// Converts the filter to its persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> FilterRecord {
        FilterRecord {
            key: self.key.clone(),
            operator: self.operator.to_string(),
            value: self.value.clone(),
        }
    }
}

impl Validate for Filter {
    fn validate(&mut self) -> Result<(), ValidationError> {
        crate::validate_name("key", &self.key)
    }
}

/// Whether a feature passes every filter.
#[must_use]
pub fn matches_all(filters: &[Filter], attributes: &Attributes) -> bool {
    filters.iter().all(|filter| filter.matches(attributes))
}
