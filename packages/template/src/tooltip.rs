//! Hover tooltips listing feature attributes.

use cartoforge_database_models::TooltipRecord;
use cartoforge_dataset_models::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};

use crate::serialize::type_tagged;
use crate::{Validate, ValidationError};

/// Attributes shown when hovering a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(remote = "Self")]
pub struct Tooltip {
    /// Attribute names, in display order.
    pub fields: Vec<String>,
    /// Labels replacing the attribute names, one per field.
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    /// Whether the tooltip follows the cursor.
    #[serde(default = "sticky_default")]
    pub sticky: bool,
}

type_tagged!(Tooltip, "Tooltip");

const fn sticky_default() -> bool {
    true
}

impl Tooltip {
    /// Creates a sticky tooltip without aliases.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            aliases: None,
            sticky: true,
        }
    }

    /// `(label, value)` rows for one feature, skipping attributes it lacks.
    #[must_use]
    pub fn rows(&self, attributes: &Attributes) -> Vec<(String, String)> {
        self.fields
            .iter()
            .enumerate()
            .filter_map(|(i, field)| {
                let value = attributes.get(field)?;
                let label = self
                    .aliases
                    .as_ref()
                    .and_then(|aliases| aliases.get(i))
                    .unwrap_or(field);
                let text = match value {
                    AttributeValue::Int(v) => v.to_string(),
                    AttributeValue::Float(v) => v.to_string(),
                    AttributeValue::String(v) | AttributeValue::Date(v) => v.clone(),
                };
                Some((label.clone(), text))
            })
            .collect()
    }

    /// Hydrates and validates a persisted tooltip.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the aliases do not match the fields.
    pub fn from_persisted(record: &TooltipRecord) -> Result<Self, ValidationError> {
        let mut tooltip = Self {
            fields: record.fields.clone(),
            aliases: record.aliases.clone(),
            sticky: record.sticky,
        };
        tooltip.validate()?;
        Ok(tooltip)
    }

    /// Converts the tooltip to its persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> TooltipRecord {
        TooltipRecord {
            fields: self.fields.clone(),
            aliases: self.aliases.clone(),
            sticky: self.sticky,
        }
    }
}

impl Validate for Tooltip {
    fn validate(&mut self) -> Result<(), ValidationError> {
        if self.fields.is_empty() {
            return Err(ValidationError::new("fields", "must list at least one field"));
        }
        if let Some(aliases) = &self.aliases
            && aliases.len() != self.fields.len()
        {
            return Err(ValidationError::new(
                "aliases",
                format!(
                    "expected {} aliases, one per field, got {}",
                    self.fields.len(),
                    aliases.len()
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_must_match_fields() {
        let mut tooltip = Tooltip {
            aliases: Some(vec!["Name".to_string()]),
            ..Tooltip::new(["name", "kind"])
        };
        assert_eq!(tooltip.validate().unwrap_err().field, "aliases");

        tooltip.aliases = Some(vec!["Name".to_string(), "Kind".to_string()]);
        assert!(tooltip.validate().is_ok());
    }

    #[test]
    fn rows_use_aliases_and_skip_missing_attributes() {
        let tooltip = Tooltip {
            aliases: Some(vec!["Name".to_string(), "Lanes".to_string()]),
            ..Tooltip::new(["name", "lanes"])
        };
        let mut attributes = Attributes::new();
        attributes.insert("lanes", AttributeValue::Int(2));

        assert_eq!(
            tooltip.rows(&attributes),
            vec![("Lanes".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn sticky_defaults_to_true_in_json() {
        let tooltip: Tooltip =
            serde_json::from_str(r#"{"__type__": "Tooltip", "fields": ["name"]}"#).unwrap();
        assert!(tooltip.sticky);
        assert_eq!(tooltip.aliases, None);
    }
}
