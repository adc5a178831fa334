#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dataset, layer, and geographic feature types.
//!
//! These types describe what ingestion produces from a shapefile archive:
//! a [`DatasetVersion`] owns one [`DatasetLayer`] per shapefile, each layer
//! carries its attribute schema ([`DatasetLayerField`]) and a set of
//! [`GeographicFeature`]s whose coordinates are always in [`OUTPUT_SRID`].

mod attributes;

pub use attributes::{AttributeValue, Attributes};

use geo::BoundingRect as _;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Canonical output spatial reference (WGS84 longitude/latitude).
pub const OUTPUT_SRID: u32 = 4326;

/// Spatial reference assumed when a shapefile ships without a `.prj`
/// (RGF93 / Lambert-93).
pub const DEFAULT_SOURCE_SRID: u32 = 2154;

/// Geometry kind of a feature or of a whole layer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum GeometryType {
    /// A single position.
    Point,
    /// A set of positions.
    MultiPoint,
    /// A single polyline.
    LineString,
    /// Several polylines.
    MultiLineString,
    /// One exterior ring with optional holes.
    Polygon,
    /// Several polygons.
    MultiPolygon,
}

impl GeometryType {
    /// Classifies a geometry, `None` for kinds a layer cannot hold
    /// (collections, bare lines, rectangles, triangles).
    #[must_use]
    pub const fn of(geometry: &geo::Geometry<f64>) -> Option<Self> {
        match geometry {
            geo::Geometry::Point(_) => Some(Self::Point),
            geo::Geometry::MultiPoint(_) => Some(Self::MultiPoint),
            geo::Geometry::LineString(_) => Some(Self::LineString),
            geo::Geometry::MultiLineString(_) => Some(Self::MultiLineString),
            geo::Geometry::Polygon(_) => Some(Self::Polygon),
            geo::Geometry::MultiPolygon(_) => Some(Self::MultiPolygon),
            geo::Geometry::Line(_)
            | geo::Geometry::GeometryCollection(_)
            | geo::Geometry::Rect(_)
            | geo::Geometry::Triangle(_) => None,
        }
    }

    /// Returns the multi-part variant of this geometry family.
    #[must_use]
    pub const fn multi(self) -> Self {
        match self {
            Self::Point | Self::MultiPoint => Self::MultiPoint,
            Self::LineString | Self::MultiLineString => Self::MultiLineString,
            Self::Polygon | Self::MultiPolygon => Self::MultiPolygon,
        }
    }

    /// Whether a feature of type `other` may be stored in a layer of this
    /// type. Single and multi-part variants of one family are compatible.
    #[must_use]
    pub fn accepts(self, other: Self) -> bool {
        self.multi() == other.multi()
    }
}

/// Attribute field type, named after the OGR field type it corresponds to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum FieldType {
    /// 32-bit integer.
    #[serde(rename = "OFTInteger")]
    #[strum(serialize = "OFTInteger")]
    Integer,
    /// 64-bit integer.
    #[serde(rename = "OFTInteger64")]
    #[strum(serialize = "OFTInteger64")]
    Integer64,
    /// Double precision float.
    #[serde(rename = "OFTReal")]
    #[strum(serialize = "OFTReal")]
    Real,
    /// Free text.
    #[serde(rename = "OFTString")]
    #[strum(serialize = "OFTString")]
    String,
    /// Calendar date.
    #[serde(rename = "OFTDate")]
    #[strum(serialize = "OFTDate")]
    Date,
    /// Date and time of day.
    #[serde(rename = "OFTDateTime")]
    #[strum(serialize = "OFTDateTime")]
    DateTime,
}

impl FieldType {
    /// Whether values of this type are stored as ISO-8601 text.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::DateTime)
    }
}

/// One attribute column of a dataset layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetLayerField {
    /// Column name as declared in the attribute table.
    pub name: String,
    /// Inferred type tag.
    pub field_type: FieldType,
    /// Declared width of the column.
    pub max_length: u32,
    /// Number of decimal places for numeric columns.
    pub precision: u32,
}

/// Generation state shared by dataset layers and map templates.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    /// Waiting to be generated.
    #[default]
    Pending,
    /// A job is currently working on it.
    Running,
    /// Generated successfully.
    Completed,
    /// The last generation attempt failed.
    Failed,
}

impl GenerationStatus {
    /// Whether no job will touch this item until it is explicitly
    /// re-queued.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Axis-aligned envelope in [`OUTPUT_SRID`] coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    /// Western edge (minimum longitude).
    pub min_x: f64,
    /// Southern edge (minimum latitude).
    pub min_y: f64,
    /// Eastern edge (maximum longitude).
    pub max_x: f64,
    /// Northern edge (maximum latitude).
    pub max_y: f64,
}

impl BoundingBox {
    /// Builds a bounding box from a `geo` rectangle.
    #[must_use]
    pub fn from_rect(rect: geo::Rect<f64>) -> Self {
        Self {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        }
    }

    /// Envelope of a geometry, `None` when it has no coordinates.
    #[must_use]
    pub fn of(geometry: &geo::Geometry<f64>) -> Option<Self> {
        geometry.bounding_rect().map(Self::from_rect)
    }

    /// Returns the smallest box covering both `self` and `other`.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Returns the box as a closed polygon ring: four corners followed by
    /// the closing point.
    #[must_use]
    pub fn to_polygon(self) -> geo::Polygon<f64> {
        geo::Polygon::new(
            geo::LineString::from(vec![
                (self.min_x, self.min_y),
                (self.max_x, self.min_y),
                (self.max_x, self.max_y),
                (self.min_x, self.max_y),
                (self.min_x, self.min_y),
            ]),
            vec![],
        )
    }
}

/// A single geographic feature belonging to a dataset layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GeographicFeature {
    /// Store-assigned identifier, `None` until persisted.
    pub id: Option<i64>,
    /// Geometry in [`OUTPUT_SRID`].
    pub geometry: geo::Geometry<f64>,
    /// Attribute values keyed by field name.
    pub attributes: Attributes,
}

impl GeographicFeature {
    /// Creates an unsaved feature.
    #[must_use]
    pub const fn new(geometry: geo::Geometry<f64>, attributes: Attributes) -> Self {
        Self {
            id: None,
            geometry,
            attributes,
        }
    }
}

/// A layer of a dataset version, one per ingested shapefile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetLayer {
    /// Store-assigned identifier, `None` until persisted.
    pub id: Option<i64>,
    /// Owning dataset version.
    pub dataset_version_id: i64,
    /// Layer name, unique within its dataset version.
    pub name: String,
    /// Spatial reference the source data was declared in.
    pub srid: u32,
    /// Union of all feature envelopes, `None` for an empty layer.
    pub bounding_box: Option<BoundingBox>,
    /// Number of stored features.
    pub feature_count: u64,
    /// Geometry type shared by every feature of the layer.
    pub geometry_type: GeometryType,
    /// Attribute schema, in declaration order.
    pub fields: Vec<DatasetLayerField>,
    /// Ingestion state of the layer.
    pub generation_status: GenerationStatus,
}

impl DatasetLayer {
    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&DatasetLayerField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Text encoding declared for a dataset's attribute tables.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum TextEncoding {
    /// UTF-8.
    #[default]
    #[serde(rename = "utf-8")]
    #[strum(serialize = "utf-8")]
    Utf8,
    /// ISO-8859-1 under its common alias.
    #[serde(rename = "latin-1")]
    #[strum(serialize = "latin-1")]
    Latin1,
    /// ISO-8859-1.
    #[serde(rename = "iso-8859-1")]
    #[strum(serialize = "iso-8859-1")]
    Iso8859_1,
    /// UTF-16, little endian.
    #[serde(rename = "utf-16")]
    #[strum(serialize = "utf-16")]
    Utf16,
    /// 7-bit ASCII.
    #[serde(rename = "ascii")]
    #[strum(serialize = "ascii")]
    Ascii,
}

/// State of a dataset version's ingestion job.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStatus {
    /// Uploaded but not yet processed.
    #[default]
    Pending,
    /// Ingestion is in progress.
    Started,
    /// Every layer was ingested.
    Success,
    /// Ingestion aborted; see the recorded error.
    Failure,
}

/// An uploaded revision of a dataset, backed by one zip archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetVersion {
    /// Store-assigned identifier, `None` until persisted.
    pub id: Option<i64>,
    /// Name of the dataset this version belongs to.
    pub dataset_name: String,
    /// Monotonic version number within the dataset.
    pub version_number: u32,
    /// Location of the zip archive on disk.
    pub archive_path: String,
    /// Declared encoding of the attribute tables.
    pub encoding: TextEncoding,
    /// Ingestion job state.
    pub ingestion_status: IngestionStatus,
    /// Identifier of the running ingestion job, if any.
    pub task_id: Option<String>,
    /// Error captured from the last failed ingestion.
    pub error: Option<String>,
}
