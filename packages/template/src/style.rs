//! Layer styles and per-feature style overrides.

use std::sync::LazyLock;

use cartoforge_database_models::{PropertyStyleRecord, StyleRecord};
use cartoforge_dataset_models::Attributes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::color::{rgba, split_alpha, validate_opacity, validate_rgb, with_alpha};
use crate::pattern::FillPattern;
use crate::serialize::type_tagged;
use crate::{Validate, ValidationError};

static DASH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?%?$").expect("valid regex"));

/// Shape drawn at the end of open lines.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LineCap {
    Butt,
    #[default]
    Round,
    Square,
}

/// Shape drawn at the corners of lines.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LineJoin {
    Miter,
    #[default]
    Round,
    Bevel,
    Arcs,
    MiterClip,
}

/// Rule deciding which parts of a self-intersecting polygon are filled.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FillRule {
    Nonzero,
    #[default]
    Evenodd,
}

/// How a layer's features are drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", default)]
pub struct Style {
    /// Whether outlines are drawn.
    pub stroke: bool,
    /// Outline color, `#RRGGBB`.
    pub color: String,
    /// Outline width in pixels.
    pub weight: f64,
    pub opacity: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    /// Dash and gap lengths, e.g. `"5 3 2%"`.
    pub dash_array: Option<String>,
    pub dash_offset: Option<String>,
    /// Whether polygons are filled.
    pub fill: bool,
    /// Fill color, `#RRGGBB`.
    pub fill_color: String,
    pub fill_opacity: f64,
    pub fill_rule: FillRule,
    pub fill_pattern: Option<FillPattern>,
    /// Overrides for features matching a property value; the last match
    /// wins.
    pub property_styles: Vec<PropertyStyle>,
}

type_tagged!(Style, "Style");

impl Default for Style {
    fn default() -> Self {
        Self {
            stroke: true,
            color: "#3388ff".to_string(),
            weight: 3.0,
            opacity: 1.0,
            line_cap: LineCap::default(),
            line_join: LineJoin::default(),
            dash_array: None,
            dash_offset: None,
            fill: true,
            fill_color: "#3388ff".to_string(),
            fill_opacity: 0.2,
            fill_rule: FillRule::default(),
            fill_pattern: None,
            property_styles: vec![],
        }
    }
}

impl Validate for Style {
    fn validate(&mut self) -> Result<(), ValidationError> {
        if !self.stroke && !self.fill {
            return Err(ValidationError::new(
                "stroke",
                "a style must draw its stroke, its fill, or both",
            ));
        }
        validate_rgb("color", &self.color)?;
        if self.weight.is_nan() || self.weight < 0.0 {
            return Err(ValidationError::new(
                "weight",
                format!("must not be negative, got {}", self.weight),
            ));
        }
        validate_opacity("opacity", self.opacity)?;
        if let Some(dashes) = &self.dash_array {
            validate_dashes("dash_array", dashes)?;
        }
        if let Some(offset) = &self.dash_offset {
            validate_dashes("dash_offset", offset)?;
        }
        validate_rgb("fill_color", &self.fill_color)?;
        validate_opacity("fill_opacity", self.fill_opacity)?;
        if let Some(pattern) = &mut self.fill_pattern {
            pattern.validate().map_err(|e| e.within("fill_pattern"))?;
        }
        for (i, property_style) in self.property_styles.iter_mut().enumerate() {
            property_style
                .validate()
                .map_err(|e| e.within(&format!("property_styles.{i}")))?;
        }
        Ok(())
    }
}

/// Checks a list of comma and/or whitespace separated lengths and
/// percentages.
///
/// # Errors
///
/// Returns [`ValidationError`] naming `field` if any token is not a number
/// with an optional `%` suffix.
pub fn validate_dashes(field: &str, dashes: &str) -> Result<(), ValidationError> {
    if let Some(token) = dashes
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .find(|t| !DASH_TOKEN.is_match(t))
    {
        return Err(ValidationError::new(
            field,
            format!("{token:?} in {dashes:?} is not a length or percentage"),
        ));
    }
    Ok(())
}

impl Style {
    /// Resolves the style to draw one feature with: the base style, replaced
    /// by the last property style whose key and value match the feature's
    /// attributes.
    #[must_use]
    pub fn resolve(&self, attributes: &Attributes) -> &Self {
        self.property_styles
            .iter()
            .rev()
            .find(|p| p.matches(attributes))
            .map_or(self, |p| &p.style)
    }

    /// Leaflet path options for this style, as a JSON object.
    #[must_use]
    pub fn leaflet_options(&self) -> serde_json::Value {
        serde_json::json!({
            "stroke": self.stroke,
            "color": self.color,
            "weight": self.weight,
            "opacity": self.opacity,
            "lineCap": self.line_cap.as_ref(),
            "lineJoin": self.line_join.as_ref(),
            "dashArray": self.dash_array,
            "dashOffset": self.dash_offset,
            "fill": self.fill,
            "fillColor": self.fill_color,
            "fillOpacity": self.fill_opacity,
            "fillRule": self.fill_rule.as_ref(),
        })
    }

    /// Stroke color as CSS `rgba()`.
    #[must_use]
    pub fn stroke_rgba(&self) -> String {
        rgba(&self.color, self.opacity)
    }

    /// Fill color as CSS `rgba()`.
    #[must_use]
    pub fn fill_rgba(&self) -> String {
        rgba(&self.fill_color, self.fill_opacity)
    }

    /// Hydrates and validates a persisted style.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if an enumeration tag or color is
    /// malformed or the hydrated style is invalid.
    pub fn from_persisted(record: &StyleRecord) -> Result<Self, ValidationError> {
        let mut style = Self::hydrate(record)?;
        style.property_styles = record
            .property_styles
            .iter()
            .map(PropertyStyle::from_persisted)
            .collect::<Result<_, _>>()?;
        style.validate()?;
        Ok(style)
    }

    fn hydrate(record: &StyleRecord) -> Result<Self, ValidationError> {
        let (color, opacity) = split_alpha("color", &record.color)?;
        let (fill_color, fill_opacity) = split_alpha("fill_color", &record.fill_color)?;
        Ok(Self {
            stroke: record.stroke,
            color,
            weight: record.weight,
            opacity,
            line_cap: parse_tag("line_cap", &record.line_cap)?,
            line_join: parse_tag("line_join", &record.line_join)?,
            dash_array: record.dash_array.clone(),
            dash_offset: record.dash_offset.clone(),
            fill: record.fill,
            fill_color,
            fill_opacity,
            fill_rule: parse_tag("fill_rule", &record.fill_rule)?,
            fill_pattern: record
                .fill_pattern
                .as_ref()
                .map(FillPattern::from_persisted)
                .transpose()
                .map_err(|e| e.within("fill_pattern"))?,
            property_styles: vec![],
        })
    }

    /// Converts the style to its persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> StyleRecord {
        StyleRecord {
            stroke: self.stroke,
            color: with_alpha(&self.color, self.opacity),
            weight: self.weight,
            line_cap: self.line_cap.to_string(),
            line_join: self.line_join.to_string(),
            dash_array: self.dash_array.clone(),
            dash_offset: self.dash_offset.clone(),
            fill: self.fill,
            fill_color: with_alpha(&self.fill_color, self.fill_opacity),
            fill_rule: self.fill_rule.to_string(),
            fill_pattern: self.fill_pattern.as_ref().map(FillPattern::to_persisted),
            property_styles: self
                .property_styles
                .iter()
                .map(PropertyStyle::to_persisted)
                .collect(),
        }
    }
}

pub(crate) fn parse_tag<T: std::str::FromStr>(field: &str, tag: &str) -> Result<T, ValidationError> {
    tag.parse()
        .map_err(|_| ValidationError::new(field, format!("unknown value {tag:?}")))
}

/// A style used instead of its parent style for features whose `key`
/// attribute equals `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self")]
pub struct PropertyStyle {
    /// Attribute to look up.
    pub key: String,
    /// Expected value, compared after coercion to the attribute's kind.
    pub value: String,
    /// Replacement style; must not carry property styles of its own.
    pub style: Style,
}

type_tagged!(PropertyStyle, "PropertyStyle");

impl PropertyStyle {
    /// Creates an override applying `style` where `key` equals `value`.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, style: Style) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            style,
        }
    }

    /// Whether a feature with `attributes` gets this style.
    #[must_use]
    pub fn matches(&self, attributes: &Attributes) -> bool {
        attributes
            .get(&self.key)
            .is_some_and(|value| value.matches_text(&self.value))
    }

    /// Hydrates and validates a persisted property style.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the style is invalid.
    pub fn from_persisted(record: &PropertyStyleRecord) -> Result<Self, ValidationError> {
        let mut property_style = Self {
            key: record.key.clone(),
            value: record.value.clone(),
            style: Style::hydrate(&record.style)?,
        };
        if !record.style.property_styles.is_empty() {
            return Err(ValidationError::new(
                "style.property_styles",
                "property styles cannot be nested",
            ));
        }
        property_style.validate()?;
        Ok(property_style)
    }

    /// Converts the property style to its persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> PropertyStyleRecord {
        PropertyStyleRecord {
            key: self.key.clone(),
            value: self.value.clone(),
            style: self.style.to_persisted(),
        }
    }
}

impl Validate for PropertyStyle {
    fn validate(&mut self) -> Result<(), ValidationError> {
        crate::validate_name("key", &self.key)?;
        if !self.style.property_styles.is_empty() {
            return Err(ValidationError::new(
                "style.property_styles",
                "property styles cannot be nested",
            ));
        }
        self.style.validate().map_err(|e| e.within("style"))
    }
}

#[cfg(test)]
mod tests {
    use cartoforge_dataset_models::AttributeValue;

    use super::*;

    #[test]
    fn default_style_is_valid() {
        assert!(Style::default().validate().is_ok());
    }

    #[test]
    fn dash_array_accepts_lengths_and_percentages() {
        assert!(validate_dashes("dash_array", "5 3 2%").is_ok());
        assert!(validate_dashes("dash_array", "5, 3,2.5").is_ok());
        assert!(validate_dashes("dash_array", "").is_ok());
    }

    #[test]
    fn dash_array_rejects_non_numeric_tokens() {
        let mut style = Style {
            dash_array: Some("5,3,abc".to_string()),
            ..Style::default()
        };
        let err = style.validate().unwrap_err();
        assert_eq!(err.field, "dash_array");
        assert!(err.message.contains("abc"));
    }

    #[test]
    fn style_must_draw_something() {
        let mut style = Style {
            stroke: false,
            fill: false,
            ..Style::default()
        };
        assert_eq!(style.validate().unwrap_err().field, "stroke");
    }

    #[test]
    fn nested_errors_carry_their_path() {
        let mut style = Style {
            property_styles: vec![PropertyStyle::new(
                "kind",
                "road",
                Style {
                    color: "red".to_string(),
                    ..Style::default()
                },
            )],
            ..Style::default()
        };
        assert_eq!(
            style.validate().unwrap_err().field,
            "property_styles.0.style.color"
        );
    }

    #[test]
    fn last_matching_property_style_wins() {
        let red = Style {
            color: "#ff0000".to_string(),
            ..Style::default()
        };
        let green = Style {
            color: "#00ff00".to_string(),
            ..Style::default()
        };
        let style = Style {
            property_styles: vec![
                PropertyStyle::new("lanes", "2", red),
                PropertyStyle::new("kind", "road", green),
            ],
            ..Style::default()
        };

        let mut attributes = Attributes::new();
        attributes.insert("lanes", AttributeValue::Int(2));
        assert_eq!(style.resolve(&attributes).color, "#ff0000");

        attributes.insert("kind", "road");
        assert_eq!(style.resolve(&attributes).color, "#00ff00");

        assert_eq!(style.resolve(&Attributes::new()).color, "#3388ff");
    }

    #[test]
    fn persisted_colors_carry_opacity() {
        let record = Style::default().to_persisted();
        assert_eq!(record.color, "#3388ffff");
        assert_eq!(record.fill_color, "#3388ff33");
        assert_eq!(record.line_join, "round");
        assert_eq!(record.fill_rule, "evenodd");

        assert_eq!(Style::from_persisted(&record).unwrap(), Style::default());
    }

    #[test]
    fn persisted_tags_are_checked() {
        let mut record = Style::default().to_persisted();
        record.line_join = "miter-clip".to_string();
        assert_eq!(
            Style::from_persisted(&record).unwrap().line_join,
            LineJoin::MiterClip
        );

        record.line_cap = "pointy".to_string();
        assert_eq!(Style::from_persisted(&record).unwrap_err().field, "line_cap");
    }

    #[test]
    fn nested_property_styles_are_rejected() {
        let inner = PropertyStyle::new("a", "1", Style::default());
        let mut property_style = PropertyStyle::new(
            "b",
            "2",
            Style {
                property_styles: vec![inner],
                ..Style::default()
            },
        );
        assert!(property_style.validate().is_err());
    }

    #[test]
    fn json_carries_type_tags() {
        let style = Style {
            property_styles: vec![PropertyStyle::new("kind", "road", Style::default())],
            ..Style::default()
        };
        let json = serde_json::to_value(&style).unwrap();
        assert_eq!(json["__type__"], "Style");
        assert_eq!(json["property_styles"][0]["__type__"], "PropertyStyle");
        assert_eq!(json["property_styles"][0]["style"]["__type__"], "Style");
        assert_eq!(json["line_join"], "round");

        let back: Style = serde_json::from_value(json).unwrap();
        assert_eq!(back, style);
    }
}
