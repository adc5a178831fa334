//! Persisted shapes of map templates and renders.
//!
//! These mirror what the database stores: enumerations are kept as their
//! text tags and colors carry their alpha channel (`#RRGGBBAA`). The
//! template object model converts to and from these records, validating on
//! the way in.

use cartoforge_dataset_models::{AttributeValue, GenerationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A map template with its tiles and feature tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    /// Store-assigned identifier, `None` until persisted.
    pub id: Option<i64>,
    /// Unique template name.
    pub name: String,
    /// Initial zoom level.
    pub zoom_start: i64,
    /// Whether the layer control is shown.
    pub layer_control: bool,
    /// Whether the zoom control is shown.
    pub zoom_control: bool,
    /// Longitude of the initial map center.
    pub center_lon: f64,
    /// Latitude of the initial map center.
    pub center_lat: f64,
    /// Base tiles, in insertion order.
    pub tiles: Vec<TileLayerRecord>,
    /// Top-level features, in insertion order.
    pub features: Vec<FeatureRecord>,
    /// Generation state.
    pub generation_status: GenerationStatus,
    /// Identifier of the in-flight generation job, if any.
    pub task_id: Option<String>,
    /// Whether a regeneration was requested.
    pub regenerate: bool,
    /// Error captured by the last failed generation.
    pub last_error: Option<String>,
}

/// Generation bookkeeping of a template, without its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateState {
    /// Template identifier.
    pub id: i64,
    /// Template name.
    pub name: String,
    /// Generation state.
    pub generation_status: GenerationStatus,
    /// Identifier of the in-flight generation job, if any.
    pub task_id: Option<String>,
    /// Whether a regeneration was requested.
    pub regenerate: bool,
    /// Error captured by the last failed generation.
    pub last_error: Option<String>,
}

impl TemplateRecord {
    /// Extracts the generation bookkeeping of a persisted template.
    #[must_use]
    pub fn state(&self) -> Option<TemplateState> {
        Some(TemplateState {
            id: self.id?,
            name: self.name.clone(),
            generation_status: self.generation_status,
            task_id: self.task_id.clone(),
            regenerate: self.regenerate,
            last_error: self.last_error.clone(),
        })
    }
}

/// A base tile layer of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayerRecord {
    /// Tile name, unique within the template.
    pub name: String,
    /// Label shown in the layer control.
    pub display_name: Option<String>,
    /// `builtin` or `xyz`.
    pub kind: String,
    /// Whether the tiles are rendered transparent.
    pub transparent: bool,
    /// Whether the tiles are an overlay rather than a base layer.
    pub overlay: bool,
    /// Whether the tiles appear in the layer control.
    pub control: bool,
    /// XYZ URL template.
    pub url: Option<String>,
    /// Access token substituted into the URL.
    pub access_token: Option<String>,
    /// Attribution text.
    pub attribution: Option<String>,
}

/// One node of a template's feature tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeatureRecord {
    /// A styled reference to a dataset layer.
    Layer(LayerRecord),
    /// A named group of nested features.
    Group(FeatureGroupRecord),
}

impl FeatureRecord {
    /// Name of the feature.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Layer(layer) => &layer.name,
            Self::Group(group) => &group.name,
        }
    }
}

/// A template layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRecord {
    /// Layer name.
    pub name: String,
    /// Stacking order, lowest first.
    pub z_index: i32,
    /// Whether the layer is visible when the map opens.
    pub show_on_startup: bool,
    /// Dataset layer providing the features.
    pub dataset_layer_id: i64,
    /// Boundary polygon as `GeoJSON`.
    pub boundary_geojson: Option<String>,
    /// `intersect`, `strict` or `crop`.
    pub boundary_type: String,
    /// Base style.
    pub style: Option<StyleRecord>,
    /// Style applied on hover.
    pub highlight: Option<StyleRecord>,
    /// Filters, all of which must hold.
    pub filters: Vec<FilterRecord>,
    /// Hover tooltip.
    pub tooltip: Option<TooltipRecord>,
}

/// A template feature group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGroupRecord {
    /// Group name.
    pub name: String,
    /// Stacking order, lowest first.
    pub z_index: i32,
    /// Whether the group is visible when the map opens.
    pub show_on_startup: bool,
    /// Direct children.
    pub children: Vec<FeatureRecord>,
}

/// A persisted style. Colors are `#RRGGBBAA`; the alpha channel carries
/// the opacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleRecord {
    pub stroke: bool,
    pub color: String,
    pub weight: f64,
    pub line_cap: String,
    pub line_join: String,
    pub dash_array: Option<String>,
    pub dash_offset: Option<String>,
    pub fill: bool,
    pub fill_color: String,
    pub fill_rule: String,
    pub fill_pattern: Option<PatternRecord>,
    /// Per-feature overrides.
    #[serde(default)]
    pub property_styles: Vec<PropertyStyleRecord>,
}

/// A style replacing its parent style for features whose `key` attribute
/// equals `value`. Its own `property_styles` are always empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyStyleRecord {
    pub key: String,
    pub value: String,
    pub style: StyleRecord,
}

/// A persisted fill pattern. Colors are `#RRGGBBAA`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PatternRecord {
    /// Parallel stripes.
    Stripe {
        color: String,
        space_color: String,
        weight: f64,
        space_weight: f64,
        angle: f64,
    },
    /// A grid of circles.
    Circle {
        color: String,
        fill_color: String,
        width: f64,
        height: f64,
        radius: f64,
    },
}

/// A persisted filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRecord {
    pub key: String,
    pub operator: String,
    pub value: AttributeValue,
}

/// A persisted tooltip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TooltipRecord {
    pub fields: Vec<String>,
    pub aliases: Option<Vec<String>>,
    pub sticky: bool,
}

/// An emitted map artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRecord {
    /// Store-assigned identifier, `None` until persisted.
    pub id: Option<i64>,
    /// Template the render was generated from.
    pub template_id: i64,
    /// Unique render name.
    pub name: String,
    /// URL-safe name used for the artifact files.
    pub slug: String,
    /// Embeddable HTML fragment.
    pub embed_html: String,
    /// Standalone HTML document.
    pub full_html: String,
    /// When the render was last written.
    pub generated_at: DateTime<Utc>,
}
