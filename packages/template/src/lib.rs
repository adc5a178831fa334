#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Map template object model.
//!
//! A [`MapTemplate`] is a named set of base [`TileLayer`]s and a tree of
//! [`Feature`]s: styled, filtered references to dataset layers
//! ([`Layer`]) and named folders of them ([`FeatureGroup`]).
//!
//! Every type validates itself, converts to and from its persisted record in
//! `cartoforge_database_models`, and serializes to JSON objects carrying a
//! `__type__` tag so heterogeneous feature lists round-trip without outside
//! type hints.

pub mod color;
pub mod feature;
pub mod filter;
pub mod pattern;
pub mod serialize;
pub mod style;
pub mod template;
pub mod tiles;
pub mod tooltip;

pub use feature::{Feature, FeatureGroup, Layer};
pub use filter::{Filter, Operator};
pub use pattern::{CirclePattern, FillPattern, StripePattern};
pub use serialize::{TYPE_KEY, TypeTagged, from_json, to_json, to_json_pretty};
pub use style::{FillRule, LineCap, LineJoin, PropertyStyle, Style};
pub use template::{MAX_ZOOM, MIN_ZOOM, MapTemplate};
pub use tiles::{TileKind, TileLayer, TileProvider};
pub use tooltip::Tooltip;

/// A template object holds a value it must not.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `features.roads.style.color`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Creates an error for `field`.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefixes the field path with the name of the containing object.
    #[must_use]
    pub fn within(mut self, parent: &str) -> Self {
        self.field = format!("{parent}.{}", self.field);
        self
    }
}

/// Errors raised while converting template objects to or from JSON.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// The text is not valid JSON or does not have the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The object's `__type__` tag names a different type.
    #[error("Expected a {expected} object, found {found}")]
    TypeMismatch {
        /// Tag that was expected.
        expected: String,
        /// Tag that was found, or `nothing` when absent.
        found: String,
    },

    /// The decoded object failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Checks (and where documented, normalizes) a template object.
pub trait Validate {
    /// Validates the object and everything nested in it.
    ///
    /// The only normalizations are those of [`TileLayer::validate`]: builtin
    /// tiles drop their URL fields and XYZ URLs lose their whitespace.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    fn validate(&mut self) -> Result<(), ValidationError>;
}

/// Rejects an empty or blank name.
pub(crate) fn validate_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(())
}
