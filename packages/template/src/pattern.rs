//! Decorative fill patterns attachable to a style.

use cartoforge_database_models::PatternRecord;
use serde::{Deserialize, Serialize};

use crate::color::{self, split_alpha, validate_opacity, validate_rgb, with_alpha};
use crate::serialize::type_tagged;
use crate::{Validate, ValidationError};

/// Parallel stripes drawn over a polygon fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", default)]
pub struct StripePattern {
    pub color: String,
    pub opacity: f64,
    pub space_color: String,
    pub space_opacity: f64,
    /// Stripe width in pixels.
    pub weight: f64,
    /// Gap width in pixels.
    pub space_weight: f64,
    /// Rotation in degrees, within `[-360, 360]`.
    pub angle: f64,
}

type_tagged!(StripePattern, "StripePattern");

impl Default for StripePattern {
    fn default() -> Self {
        Self {
            color: "#000000".to_string(),
            opacity: 1.0,
            space_color: "#ffffff".to_string(),
            space_opacity: 1.0,
            weight: 4.0,
            space_weight: 4.0,
            angle: 0.5,
        }
    }
}

impl Validate for StripePattern {
    fn validate(&mut self) -> Result<(), ValidationError> {
        validate_rgb("color", &self.color)?;
        validate_opacity("opacity", self.opacity)?;
        validate_rgb("space_color", &self.space_color)?;
        validate_opacity("space_opacity", self.space_opacity)?;
        positive("weight", self.weight)?;
        positive("space_weight", self.space_weight)?;
        if !(-360.0..=360.0).contains(&self.angle) {
            return Err(ValidationError::new(
                "angle",
                format!("expected degrees within [-360, 360], got {}", self.angle),
            ));
        }
        Ok(())
    }
}

/// A grid of circles drawn over a polygon fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", default)]
pub struct CirclePattern {
    /// Circle outline color.
    pub color: String,
    pub opacity: f64,
    pub fill_color: String,
    pub fill_opacity: f64,
    /// Cell width in pixels.
    pub width: f64,
    /// Cell height in pixels.
    pub height: f64,
    pub radius: f64,
}

type_tagged!(CirclePattern, "CirclePattern");

impl Default for CirclePattern {
    fn default() -> Self {
        Self {
            color: "#000000".to_string(),
            opacity: 1.0,
            fill_color: "#3388ff".to_string(),
            fill_opacity: 0.2,
            width: 4.0,
            height: 4.0,
            radius: 12.0,
        }
    }
}

impl Validate for CirclePattern {
    fn validate(&mut self) -> Result<(), ValidationError> {
        validate_rgb("color", &self.color)?;
        validate_opacity("opacity", self.opacity)?;
        validate_rgb("fill_color", &self.fill_color)?;
        validate_opacity("fill_opacity", self.fill_opacity)?;
        positive("width", self.width)?;
        positive("height", self.height)?;
        positive("radius", self.radius)
    }
}

fn positive(field: &str, value: f64) -> Result<(), ValidationError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("must be greater than 0, got {value}"),
        ))
    }
}

/// Either kind of fill pattern.
///
/// Serializes as the tagged object of the pattern it holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FillPattern {
    Stripe(StripePattern),
    Circle(CirclePattern),
}

impl Serialize for FillPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Stripe(pattern) => pattern.serialize(serializer),
            Self::Circle(pattern) => pattern.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FillPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let value = serde_json::Value::deserialize(deserializer)?;
        let tag = value
            .get(crate::TYPE_KEY)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        match tag {
            "StripePattern" => serde_json::from_value(value)
                .map(Self::Stripe)
                .map_err(D::Error::custom),
            "CirclePattern" => serde_json::from_value(value)
                .map(Self::Circle)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "Expected a StripePattern or CirclePattern object, found {other:?}"
            ))),
        }
    }
}

impl Validate for FillPattern {
    fn validate(&mut self) -> Result<(), ValidationError> {
        match self {
            Self::Stripe(pattern) => pattern.validate(),
            Self::Circle(pattern) => pattern.validate(),
        }
    }
}

impl FillPattern {
    /// Hydrates and validates a persisted pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a color is malformed or a value is out
    /// of range.
    pub fn from_persisted(record: &PatternRecord) -> Result<Self, ValidationError> {
        let mut pattern = match record {
            PatternRecord::Stripe {
                color,
                space_color,
                weight,
                space_weight,
                angle,
            } => {
                let (color, opacity) = split_alpha("color", color)?;
                let (space_color, space_opacity) = split_alpha("space_color", space_color)?;
                Self::Stripe(StripePattern {
                    color,
                    opacity,
                    space_color,
                    space_opacity,
                    weight: *weight,
                    space_weight: *space_weight,
                    angle: *angle,
                })
            }
            PatternRecord::Circle {
                color,
                fill_color,
                width,
                height,
                radius,
            } => {
                let (color, opacity) = split_alpha("color", color)?;
                let (fill_color, fill_opacity) = split_alpha("fill_color", fill_color)?;
                Self::Circle(CirclePattern {
                    color,
                    opacity,
                    fill_color,
                    fill_opacity,
                    width: *width,
                    height: *height,
                    radius: *radius,
                })
            }
        };
        pattern.validate()?;
        Ok(pattern)
    }

    /// Converts the pattern to its persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> PatternRecord {
        match self {
            Self::Stripe(p) => PatternRecord::Stripe {
                color: with_alpha(&p.color, p.opacity),
                space_color: with_alpha(&p.space_color, p.space_opacity),
                weight: p.weight,
                space_weight: p.space_weight,
                angle: p.angle,
            },
            Self::Circle(p) => PatternRecord::Circle {
                color: with_alpha(&p.color, p.opacity),
                fill_color: with_alpha(&p.fill_color, p.fill_opacity),
                width: p.width,
                height: p.height,
                radius: p.radius,
            },
        }
    }

    /// Primary color of the pattern as CSS `rgba()`.
    #[must_use]
    pub fn css_color(&self) -> String {
        match self {
            Self::Stripe(p) => color::rgba(&p.color, p.opacity),
            Self::Circle(p) => color::rgba(&p.fill_color, p.fill_opacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StripePattern::default().validate().is_ok());
        assert!(CirclePattern::default().validate().is_ok());
    }

    #[test]
    fn angle_is_bounded() {
        let mut pattern = StripePattern {
            angle: 400.0,
            ..StripePattern::default()
        };
        assert_eq!(pattern.validate().unwrap_err().field, "angle");
    }

    #[test]
    fn sizes_must_be_positive() {
        let mut pattern = CirclePattern {
            radius: 0.0,
            ..CirclePattern::default()
        };
        assert_eq!(pattern.validate().unwrap_err().field, "radius");
    }

    #[test]
    fn persisted_defaults_match_stored_colors() {
        let record = FillPattern::Stripe(StripePattern::default()).to_persisted();
        let PatternRecord::Stripe {
            color, space_color, ..
        } = &record
        else {
            panic!("expected a stripe record");
        };
        assert_eq!(color, "#000000ff");
        assert_eq!(space_color, "#ffffffff");

        let hydrated = FillPattern::from_persisted(&record).unwrap();
        assert_eq!(hydrated, FillPattern::Stripe(StripePattern::default()));
    }

    #[test]
    fn tagged_json_dispatches_on_type() {
        let pattern = FillPattern::Circle(CirclePattern::default());
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["__type__"], "CirclePattern");

        let back: FillPattern = serde_json::from_value(json).unwrap();
        assert_eq!(back, pattern);

        let unknown = serde_json::json!({"__type__": "DotPattern"});
        assert!(serde_json::from_value::<FillPattern>(unknown).is_err());
    }
}
