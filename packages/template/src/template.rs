//! The map template aggregate.

use cartoforge_database_models::TemplateRecord;
use cartoforge_dataset_models::GenerationStatus;
use serde::{Deserialize, Serialize};

use crate::feature::{
    Feature, Layer, collect_layers, insert_unique, same_features, validate_features,
};
use crate::serialize::type_tagged;
use crate::tiles::TileLayer;
use crate::{Validate, ValidationError};

/// Lowest zoom level a map may open at.
pub const MIN_ZOOM: u8 = 5;
/// Highest zoom level a map may open at.
pub const MAX_ZOOM: u8 = 18;

/// Zoom level used when a template does not set one.
pub const DEFAULT_ZOOM: i64 = 13;

/// Map center used when a template does not set one, as `(lon, lat)`.
pub const DEFAULT_CENTER: (f64, f64) = (6.175_715, 49.119_308);

const fn default_zoom() -> i64 {
    DEFAULT_ZOOM
}

const fn default_center() -> (f64, f64) {
    DEFAULT_CENTER
}

const fn default_true() -> bool {
    true
}

/// A named map: base tiles plus a tree of styled layers.
///
/// Tiles and top-level features have unique names; equality ignores their
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(remote = "Self")]
pub struct MapTemplate {
    pub name: String,
    #[serde(default = "default_zoom")]
    pub zoom_start: i64,
    #[serde(default = "default_true")]
    pub layer_control: bool,
    #[serde(default = "default_true")]
    pub zoom_control: bool,
    /// Initial map center as `(lon, lat)`.
    #[serde(default = "default_center")]
    pub center: (f64, f64),
    #[serde(default)]
    tiles: Vec<TileLayer>,
    #[serde(default)]
    features: Vec<Feature>,
}

type_tagged!(MapTemplate, "MapTemplate");

impl PartialEq for MapTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.zoom_start == other.zoom_start
            && self.layer_control == other.layer_control
            && self.zoom_control == other.zoom_control
            && self.center == other.center
            && self.tiles.len() == other.tiles.len()
            && self.tiles.iter().all(|t| other.tiles.contains(t))
            && same_features(&self.features, &other.features)
    }
}

impl MapTemplate {
    /// An empty template with default zoom, center and controls.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zoom_start: DEFAULT_ZOOM,
            layer_control: true,
            zoom_control: true,
            center: DEFAULT_CENTER,
            tiles: vec![],
            features: vec![],
        }
    }

    /// Base tiles, in insertion order.
    #[must_use]
    pub fn tiles(&self) -> &[TileLayer] {
        &self.tiles
    }

    /// Top-level features, in insertion order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Looks up a tile layer by name.
    #[must_use]
    pub fn tile(&self, name: &str) -> Option<&TileLayer> {
        self.tiles.iter().find(|t| t.name == name)
    }

    /// Looks up a top-level feature by name.
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name() == name)
    }

    /// Adds a tile layer.
    ///
    /// Returns `false` when an equal tile layer is already present.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a different tile layer has the same
    /// name.
    pub fn add_tile(&mut self, tile: TileLayer) -> Result<bool, ValidationError> {
        match self.tile(&tile.name) {
            Some(existing) if *existing == tile => Ok(false),
            Some(_) => Err(ValidationError::new(
                "tiles",
                format!("another tile layer is already named {:?}", tile.name),
            )),
            None => {
                self.tiles.push(tile);
                Ok(true)
            }
        }
    }

    /// Adds a top-level feature.
    ///
    /// Returns `false` when an equal feature is already present.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a different feature has the same name.
    pub fn add_feature(&mut self, feature: impl Into<Feature>) -> Result<bool, ValidationError> {
        insert_unique(&mut self.features, feature.into())
    }

    /// Removes the top-level feature named `name`.
    pub fn remove_feature(&mut self, name: &str) -> Option<Feature> {
        let index = self.features.iter().position(|f| f.name() == name)?;
        Some(self.features.remove(index))
    }

    /// Every layer of the template, including those nested in groups.
    #[must_use]
    pub fn layers(&self) -> Vec<&Layer> {
        let mut layers = vec![];
        collect_layers(&self.features, &mut layers);
        layers
    }

    /// Hydrates the whole template (tiles, feature tree, styles, filters)
    /// and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if anything in the template is invalid.
    pub fn from_persisted(record: &TemplateRecord) -> Result<Self, ValidationError> {
        let mut template = Self {
            name: record.name.clone(),
            zoom_start: record.zoom_start,
            layer_control: record.layer_control,
            zoom_control: record.zoom_control,
            center: (record.center_lon, record.center_lat),
            tiles: record
                .tiles
                .iter()
                .map(|t| {
                    TileLayer::from_persisted(t).map_err(|e| e.within(&format!("tiles.{}", t.name)))
                })
                .collect::<Result<_, _>>()?,
            features: record
                .features
                .iter()
                .map(|f| {
                    Feature::from_persisted(f)
                        .map_err(|e| e.within(&format!("features.{}", f.name())))
                })
                .collect::<Result<_, _>>()?,
        };
        template.validate()?;
        Ok(template)
    }

    /// Converts the template to a new, unsaved record in PENDING state.
    ///
    /// Saving it over an existing template keeps the stored generation
    /// state; only the content is replaced.
    #[must_use]
    pub fn to_persisted(&self) -> TemplateRecord {
        TemplateRecord {
            id: None,
            name: self.name.clone(),
            zoom_start: self.zoom_start,
            layer_control: self.layer_control,
            zoom_control: self.zoom_control,
            center_lon: self.center.0,
            center_lat: self.center.1,
            tiles: self.tiles.iter().map(TileLayer::to_persisted).collect(),
            features: self.features.iter().map(Feature::to_persisted).collect(),
            generation_status: GenerationStatus::Pending,
            task_id: None,
            regenerate: false,
            last_error: None,
        }
    }
}

impl Validate for MapTemplate {
    fn validate(&mut self) -> Result<(), ValidationError> {
        crate::validate_name("name", &self.name)?;
        if !(i64::from(MIN_ZOOM)..=i64::from(MAX_ZOOM)).contains(&self.zoom_start) {
            return Err(ValidationError::new(
                "zoom_start",
                format!(
                    "must be between {MIN_ZOOM} and {MAX_ZOOM}, got {}",
                    self.zoom_start
                ),
            ));
        }
        let (lon, lat) = self.center;
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::new(
                "center",
                format!("({lon}, {lat}) is not a longitude/latitude pair"),
            ));
        }

        for (i, tile) in self.tiles.iter().enumerate() {
            if self.tiles[..i].iter().any(|t| t.name == tile.name) {
                return Err(ValidationError::new(
                    "tiles",
                    format!("more than one tile layer is named {:?}", tile.name),
                ));
            }
        }
        for tile in &mut self.tiles {
            let path = format!("tiles.{}", tile.name);
            tile.validate().map_err(|e| e.within(&path))?;
        }
        validate_features(&mut self.features)
    }
}
