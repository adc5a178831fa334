//! Template features: styled layers and the groups that nest them.

use cartoforge_database_models::{FeatureGroupRecord, FeatureRecord, LayerRecord};
use cartoforge_geometry::BoundaryType;
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::filter::{Filter, matches_all};
use crate::serialize::{TypeTagged as _, check_tag, type_tagged};
use crate::style::{Style, parse_tag};
use crate::tooltip::Tooltip;
use crate::{Validate, ValidationError};

const fn default_true() -> bool {
    true
}

/// A styled, filtered view of one dataset layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self")]
pub struct Layer {
    pub name: String,
    /// Dataset layer providing the features.
    pub dataset_layer_id: i64,
    #[serde(default)]
    pub style: Option<Style>,
    /// Style applied while a feature is hovered.
    #[serde(default)]
    pub highlight: Option<Style>,
    /// Filters a feature must all pass to be drawn.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Area the features are restricted to.
    #[serde(default, with = "boundary_geojson")]
    pub boundary: Option<MultiPolygon<f64>>,
    /// How [`Layer::boundary`] applies; ignored without a boundary.
    #[serde(default)]
    pub boundary_type: BoundaryType,
    #[serde(default)]
    pub tooltip: Option<Tooltip>,
    #[serde(default = "default_true")]
    pub show_on_startup: bool,
    /// Stacking order, lowest first.
    #[serde(default)]
    pub z_index: i32,
}

type_tagged!(Layer, "Layer");

mod boundary_geojson {
    use geo::MultiPolygon;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        boundary: &Option<MultiPolygon<f64>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        boundary
            .as_ref()
            .map(|b| cartoforge_geometry::codec::to_geojson(&geo::Geometry::MultiPolygon(b.clone())))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<MultiPolygon<f64>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| cartoforge_geometry::codec::parse_multipolygon(&text))
            .transpose()
            .map_err(D::Error::custom)
    }
}

impl Layer {
    /// An unstyled layer showing every feature of a dataset layer.
    #[must_use]
    pub fn new(name: impl Into<String>, dataset_layer_id: i64) -> Self {
        Self {
            name: name.into(),
            dataset_layer_id,
            style: None,
            highlight: None,
            filters: vec![],
            boundary: None,
            boundary_type: BoundaryType::default(),
            tooltip: None,
            show_on_startup: true,
            z_index: 0,
        }
    }

    /// Appends a filter.
    pub fn add_filter(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    /// Whether a feature with `attributes` passes every filter.
    #[must_use]
    pub fn accepts(&self, attributes: &cartoforge_dataset_models::Attributes) -> bool {
        matches_all(&self.filters, attributes)
    }

    /// Hydrates and validates a persisted layer with its styles, filters
    /// and tooltip.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the boundary is not polygonal
    /// `GeoJSON`, a tag is unknown, or the layer is invalid.
    pub fn from_persisted(record: &LayerRecord) -> Result<Self, ValidationError> {
        let mut layer = Self {
            name: record.name.clone(),
            dataset_layer_id: record.dataset_layer_id,
            style: record
                .style
                .as_ref()
                .map(Style::from_persisted)
                .transpose()
                .map_err(|e| e.within("style"))?,
            highlight: record
                .highlight
                .as_ref()
                .map(Style::from_persisted)
                .transpose()
                .map_err(|e| e.within("highlight"))?,
            filters: record
                .filters
                .iter()
                .map(Filter::from_persisted)
                .collect::<Result<_, _>>()
                .map_err(|e| e.within("filters"))?,
            boundary: record
                .boundary_geojson
                .as_deref()
                .map(cartoforge_geometry::codec::parse_multipolygon)
                .transpose()
                .map_err(|e| ValidationError::new("boundary", e.to_string()))?,
            boundary_type: parse_tag("boundary_type", &record.boundary_type)?,
            tooltip: record
                .tooltip
                .as_ref()
                .map(Tooltip::from_persisted)
                .transpose()
                .map_err(|e| e.within("tooltip"))?,
            show_on_startup: record.show_on_startup,
            z_index: record.z_index,
        };
        layer.validate()?;
        Ok(layer)
    }

    /// Converts the layer to its persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> LayerRecord {
        LayerRecord {
            name: self.name.clone(),
            z_index: self.z_index,
            show_on_startup: self.show_on_startup,
            dataset_layer_id: self.dataset_layer_id,
            boundary_geojson: self.boundary.as_ref().map(|b| {
                cartoforge_geometry::codec::to_geojson(&geo::Geometry::MultiPolygon(b.clone()))
            }),
            boundary_type: self.boundary_type.to_string(),
            style: self.style.as_ref().map(Style::to_persisted),
            highlight: self.highlight.as_ref().map(Style::to_persisted),
            filters: self.filters.iter().map(Filter::to_persisted).collect(),
            tooltip: self.tooltip.as_ref().map(Tooltip::to_persisted),
        }
    }
}

impl Validate for Layer {
    fn validate(&mut self) -> Result<(), ValidationError> {
        crate::validate_name("name", &self.name)?;
        validate_z_index(self.z_index)?;
        if let Some(style) = &mut self.style {
            style.validate().map_err(|e| e.within("style"))?;
        }
        if let Some(highlight) = &mut self.highlight {
            highlight.validate().map_err(|e| e.within("highlight"))?;
        }
        for (i, filter) in self.filters.iter_mut().enumerate() {
            filter
                .validate()
                .map_err(|e| e.within(&format!("filters.{i}")))?;
        }
        if self.boundary.as_ref().is_some_and(|b| b.0.is_empty()) {
            return Err(ValidationError::new("boundary", "must hold a polygon"));
        }
        if let Some(tooltip) = &mut self.tooltip {
            tooltip.validate().map_err(|e| e.within("tooltip"))?;
        }
        Ok(())
    }
}

fn validate_z_index(z_index: i32) -> Result<(), ValidationError> {
    if z_index < 0 {
        return Err(ValidationError::new(
            "z_index",
            format!("must not be negative, got {z_index}"),
        ));
    }
    Ok(())
}

/// A named folder of layers and nested groups, toggled together.
///
/// Children have unique names. Equality ignores their order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(remote = "Self")]
pub struct FeatureGroup {
    pub name: String,
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default = "default_true")]
    pub show_on_startup: bool,
    #[serde(default)]
    pub z_index: i32,
}

type_tagged!(FeatureGroup, "FeatureGroup");

impl PartialEq for FeatureGroup {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.show_on_startup == other.show_on_startup
            && self.z_index == other.z_index
            && same_features(&self.features, &other.features)
    }
}

impl FeatureGroup {
    /// An empty group, visible on startup.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: vec![],
            show_on_startup: true,
            z_index: 0,
        }
    }

    /// Adds a child.
    ///
    /// Returns `false` when an equal child is already present.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a different child has the same name.
    pub fn add(&mut self, feature: Feature) -> Result<bool, ValidationError> {
        insert_unique(&mut self.features, feature)
    }

    /// Removes the child named `name`.
    pub fn remove(&mut self, name: &str) -> Option<Feature> {
        let index = self.features.iter().position(|f| f.name() == name)?;
        Some(self.features.remove(index))
    }

    /// Looks up a direct child.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name() == name)
    }

    /// Direct children, in insertion order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Number of direct children.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the group has no children.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Hydrates and validates a persisted group and its whole subtree.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if any descendant is invalid or two
    /// siblings share a name.
    pub fn from_persisted(record: &FeatureGroupRecord) -> Result<Self, ValidationError> {
        let mut group = Self {
            name: record.name.clone(),
            features: record
                .children
                .iter()
                .map(|child| {
                    Feature::from_persisted(child)
                        .map_err(|e| e.within(&format!("features.{}", child.name())))
                })
                .collect::<Result<_, _>>()?,
            show_on_startup: record.show_on_startup,
            z_index: record.z_index,
        };
        group.validate()?;
        Ok(group)
    }

    /// Converts the group and its subtree to persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> FeatureGroupRecord {
        FeatureGroupRecord {
            name: self.name.clone(),
            z_index: self.z_index,
            show_on_startup: self.show_on_startup,
            children: self.features.iter().map(Feature::to_persisted).collect(),
        }
    }
}

impl Validate for FeatureGroup {
    fn validate(&mut self) -> Result<(), ValidationError> {
        crate::validate_name("name", &self.name)?;
        validate_z_index(self.z_index)?;
        validate_features(&mut self.features)
    }
}

/// A node of a template's feature tree.
///
/// Serializes as the tagged object it holds; decoding dispatches on the
/// `__type__` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Layer(Layer),
    FeatureGroup(FeatureGroup),
}

impl From<Layer> for Feature {
    fn from(layer: Layer) -> Self {
        Self::Layer(layer)
    }
}

impl From<FeatureGroup> for Feature {
    fn from(group: FeatureGroup) -> Self {
        Self::FeatureGroup(group)
    }
}

impl Serialize for Feature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Layer(layer) => layer.serialize(serializer),
            Self::FeatureGroup(group) => group.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Feature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        use serde_json::{Map, Value};

        let mut object = Map::<String, Value>::deserialize(deserializer)?;
        let tag = check_tag(&mut object, &["Layer", "FeatureGroup"]).map_err(D::Error::custom)?;
        let fields = Value::Object(object);
        if tag == "Layer" {
            Layer::deserialize_fields(fields).map(Self::Layer)
        } else {
            FeatureGroup::deserialize_fields(fields).map(Self::FeatureGroup)
        }
        .map_err(D::Error::custom)
    }
}

impl Feature {
    /// Name of the layer or group.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Layer(layer) => &layer.name,
            Self::FeatureGroup(group) => &group.name,
        }
    }

    #[must_use]
    pub const fn z_index(&self) -> i32 {
        match self {
            Self::Layer(layer) => layer.z_index,
            Self::FeatureGroup(group) => group.z_index,
        }
    }

    #[must_use]
    pub const fn show_on_startup(&self) -> bool {
        match self {
            Self::Layer(layer) => layer.show_on_startup,
            Self::FeatureGroup(group) => group.show_on_startup,
        }
    }

    /// Every layer in this subtree, depth first.
    #[must_use]
    pub fn layers(&self) -> Vec<&Layer> {
        let mut layers = vec![];
        collect_layers(std::slice::from_ref(self), &mut layers);
        layers
    }

    /// Hydrates and validates a persisted feature and its subtree.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if anything in the subtree is invalid.
    pub fn from_persisted(record: &FeatureRecord) -> Result<Self, ValidationError> {
        match record {
            FeatureRecord::Layer(layer) => Layer::from_persisted(layer).map(Self::Layer),
            FeatureRecord::Group(group) => {
                FeatureGroup::from_persisted(group).map(Self::FeatureGroup)
            }
        }
    }

    /// Converts the feature and its subtree to persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> FeatureRecord {
        match self {
            Self::Layer(layer) => FeatureRecord::Layer(layer.to_persisted()),
            Self::FeatureGroup(group) => FeatureRecord::Group(group.to_persisted()),
        }
    }
}

impl Validate for Feature {
    fn validate(&mut self) -> Result<(), ValidationError> {
        match self {
            Self::Layer(layer) => layer.validate(),
            Self::FeatureGroup(group) => group.validate(),
        }
    }
}

pub(crate) fn collect_layers<'a>(features: &'a [Feature], out: &mut Vec<&'a Layer>) {
    for feature in features {
        match feature {
            Feature::Layer(layer) => out.push(layer),
            Feature::FeatureGroup(group) => collect_layers(&group.features, out),
        }
    }
}

/// Adds `feature` unless an equal one is present.
pub(crate) fn insert_unique(
    features: &mut Vec<Feature>,
    feature: Feature,
) -> Result<bool, ValidationError> {
    match features.iter().find(|f| f.name() == feature.name()) {
        Some(existing) if *existing == feature => Ok(false),
        Some(_) => Err(ValidationError::new(
            "features",
            format!("another feature is already named {:?}", feature.name()),
        )),
        None => {
            features.push(feature);
            Ok(true)
        }
    }
}

/// Validates siblings: unique names, then each subtree.
pub(crate) fn validate_features(features: &mut [Feature]) -> Result<(), ValidationError> {
    for (i, feature) in features.iter().enumerate() {
        if features[..i].iter().any(|f| f.name() == feature.name()) {
            return Err(ValidationError::new(
                "features",
                format!("more than one feature is named {:?}", feature.name()),
            ));
        }
    }
    for feature in features.iter_mut() {
        let path = format!("features.{}", feature.name());
        feature.validate().map_err(|e| e.within(&path))?;
    }
    Ok(())
}

/// Order-insensitive comparison of sibling lists with unique names.
pub(crate) fn same_features(a: &[Feature], b: &[Feature]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|x| b.iter().any(|y| x.name() == y.name() && x == y))
}
