//! Feature assembly.
//!
//! Turns a template's feature tree into the features each layer draws.
//! For every stored feature of a layer the boundary policy runs first,
//! then the layer's filters, then style resolution. Siblings are ordered
//! by z-index, lowest first; equal z-indexes keep their template order.

use cartoforge_database_models::{FeatureStore, StoreError};
use cartoforge_dataset_models::{Attributes, GeographicFeature};
use cartoforge_geometry::apply_boundary;
use cartoforge_template::{Feature, Layer, Style};

/// One feature ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFeature {
    /// Stored feature id.
    pub id: Option<i64>,
    /// Geometry after the boundary policy.
    pub geometry: geo::Geometry<f64>,
    /// Attributes of the stored feature.
    pub attributes: Attributes,
    /// Style resolved for this feature, `None` for the map default.
    pub style: Option<Style>,
    /// Tooltip `(label, value)` rows.
    pub tooltip: Vec<(String, String)>,
}

/// A template layer with its drawable features.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledLayer {
    pub name: String,
    pub z_index: i32,
    pub show_on_startup: bool,
    /// Base style, shown in the legend.
    pub style: Option<Style>,
    /// Style applied on hover.
    pub highlight: Option<Style>,
    /// Whether tooltips follow the cursor; `None` without a tooltip.
    pub sticky_tooltip: Option<bool>,
    pub features: Vec<AssembledFeature>,
}

/// A feature group with its assembled children.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledGroup {
    pub name: String,
    pub z_index: i32,
    pub show_on_startup: bool,
    pub children: Vec<AssembledNode>,
}

/// A node of the assembled feature tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AssembledNode {
    Layer(AssembledLayer),
    Group(AssembledGroup),
}

impl AssembledNode {
    /// Name of the node.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Layer(layer) => &layer.name,
            Self::Group(group) => &group.name,
        }
    }

    /// Stacking order of the node.
    #[must_use]
    pub const fn z_index(&self) -> i32 {
        match self {
            Self::Layer(layer) => layer.z_index,
            Self::Group(group) => group.z_index,
        }
    }

    /// Every layer under this node, in drawing order.
    #[must_use]
    pub fn layers(&self) -> Vec<&AssembledLayer> {
        match self {
            Self::Layer(layer) => vec![layer],
            Self::Group(group) => group.children.iter().flat_map(Self::layers).collect(),
        }
    }
}

/// Runs one template layer over the stored features of its dataset layer.
#[must_use]
pub fn assemble_layer(layer: &Layer, features: Vec<GeographicFeature>) -> AssembledLayer {
    let total = features.len();
    let mut kept = Vec::new();

    for feature in features {
        let geometry = match &layer.boundary {
            Some(boundary) => {
                match apply_boundary(&feature.geometry, boundary, layer.boundary_type) {
                    Some(geometry) => geometry,
                    None => continue,
                }
            }
            None => feature.geometry,
        };
        if !layer.accepts(&feature.attributes) {
            continue;
        }

        let style = layer
            .style
            .as_ref()
            .map(|style| style.resolve(&feature.attributes).clone());
        let tooltip = layer
            .tooltip
            .as_ref()
            .map(|tooltip| tooltip.rows(&feature.attributes))
            .unwrap_or_default();

        kept.push(AssembledFeature {
            id: feature.id,
            geometry,
            attributes: feature.attributes,
            style,
            tooltip,
        });
    }

    log::debug!("Layer '{}': kept {}/{total} features", layer.name, kept.len());

    AssembledLayer {
        name: layer.name.clone(),
        z_index: layer.z_index,
        show_on_startup: layer.show_on_startup,
        style: layer.style.clone(),
        highlight: layer.highlight.clone(),
        sticky_tooltip: layer.tooltip.as_ref().map(|tooltip| tooltip.sticky),
        features: kept,
    }
}

/// Assembles a feature tree, loading each layer's features from `store`.
///
/// # Errors
///
/// Returns [`StoreError`] if features cannot be loaded.
pub fn assemble<S>(store: &S, features: &[Feature]) -> Result<Vec<AssembledNode>, StoreError>
where
    S: FeatureStore + ?Sized,
{
    let mut nodes = features
        .iter()
        .map(|feature| assemble_node(store, feature))
        .collect::<Result<Vec<_>, _>>()?;
    nodes.sort_by_key(AssembledNode::z_index);
    Ok(nodes)
}

fn assemble_node<S>(store: &S, feature: &Feature) -> Result<AssembledNode, StoreError>
where
    S: FeatureStore + ?Sized,
{
    Ok(match feature {
        Feature::Layer(layer) => {
            let features = store.features_for_layer(layer.dataset_layer_id)?;
            AssembledNode::Layer(assemble_layer(layer, features))
        }
        Feature::FeatureGroup(group) => AssembledNode::Group(AssembledGroup {
            name: group.name.clone(),
            z_index: group.z_index,
            show_on_startup: group.show_on_startup,
            children: assemble(store, group.features())?,
        }),
    })
}

#[cfg(test)]
mod tests {
    use cartoforge_database_models::{InMemoryStore, LayerStore as _};
    use cartoforge_dataset_models::{
        AttributeValue, DatasetLayer, GenerationStatus, GeometryType,
    };
    use cartoforge_geometry::BoundaryType;
    use cartoforge_template::{FeatureGroup, Filter, Operator, PropertyStyle, Tooltip};
    use geo::{Geometry, MultiPolygon, Point, polygon};

    use super::*;

    fn point(x: f64, y: f64, kind: &str, lanes: i64) -> GeographicFeature {
        let attributes = [
            ("kind", AttributeValue::from(kind)),
            ("lanes", AttributeValue::Int(lanes)),
        ]
        .into_iter()
        .collect();
        GeographicFeature::new(Geometry::Point(Point::new(x, y)), attributes)
    }

    fn unit_square() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]])
    }

    fn store_with_points(features: Vec<GeographicFeature>) -> (InMemoryStore, i64) {
        let store = InMemoryStore::new();
        let layer = store
            .replace_layer(
                &DatasetLayer {
                    id: None,
                    dataset_version_id: 1,
                    name: "points".to_string(),
                    srid: 4326,
                    bounding_box: None,
                    feature_count: 0,
                    geometry_type: GeometryType::Point,
                    fields: vec![],
                    generation_status: GenerationStatus::Completed,
                },
                &mut features.into_iter().map(Ok),
            )
            .unwrap();
        let id = layer.id.unwrap();
        (store, id)
    }

    #[test]
    fn boundary_runs_before_filters() {
        let mut layer = Layer {
            boundary: Some(unit_square()),
            boundary_type: BoundaryType::Strict,
            ..Layer::new("roads", 1)
        };
        layer.add_filter(Filter::new("lanes", Operator::Ge, 2_i64));

        let assembled = assemble_layer(
            &layer,
            vec![
                point(0.5, 0.5, "road", 2),
                point(0.5, 0.5, "road", 1),
                point(5.0, 5.0, "road", 4),
            ],
        );
        assert_eq!(assembled.features.len(), 1);
        assert_eq!(
            assembled.features[0].attributes.get("lanes"),
            Some(&AttributeValue::Int(2))
        );
    }

    #[test]
    fn features_outside_the_boundary_are_dropped_by_every_policy() {
        for policy in [BoundaryType::Intersect, BoundaryType::Strict, BoundaryType::Crop] {
            let layer = Layer {
                boundary: Some(unit_square()),
                boundary_type: policy,
                ..Layer::new("roads", 1)
            };
            let assembled = assemble_layer(&layer, vec![point(3.0, 3.0, "road", 1)]);
            assert!(assembled.features.is_empty(), "{policy} kept an outside feature");
        }
    }

    #[test]
    fn property_styles_are_resolved_per_feature() {
        let layer = Layer {
            style: Some(Style {
                property_styles: vec![PropertyStyle::new(
                    "kind",
                    "highway",
                    Style {
                        color: "#ff0000".to_string(),
                        ..Style::default()
                    },
                )],
                ..Style::default()
            }),
            tooltip: Some(Tooltip::new(["kind"])),
            ..Layer::new("roads", 1)
        };

        let assembled = assemble_layer(
            &layer,
            vec![point(0.0, 0.0, "highway", 2), point(1.0, 1.0, "path", 1)],
        );
        let colors: Vec<_> = assembled
            .features
            .iter()
            .map(|f| f.style.as_ref().unwrap().color.as_str())
            .collect();
        assert_eq!(colors, vec!["#ff0000", "#3388ff"]);
        assert_eq!(
            assembled.features[1].tooltip,
            vec![("kind".to_string(), "path".to_string())]
        );
        assert_eq!(assembled.sticky_tooltip, Some(true));
    }

    #[test]
    fn siblings_are_ordered_by_z_index() {
        let (store, layer_id) = store_with_points(vec![point(0.0, 0.0, "road", 1)]);

        let mut group = FeatureGroup::new("group");
        group.z_index = 1;
        group
            .add(
                Layer {
                    z_index: 3,
                    ..Layer::new("late", layer_id)
                }
                .into(),
            )
            .unwrap();
        group
            .add(
                Layer {
                    z_index: 0,
                    ..Layer::new("early", layer_id)
                }
                .into(),
            )
            .unwrap();

        let features = vec![
            Feature::from(Layer {
                z_index: 2,
                ..Layer::new("top", layer_id)
            }),
            Feature::from(group),
        ];

        let nodes = assemble(&store, &features).unwrap();
        let names: Vec<_> = nodes.iter().map(AssembledNode::name).collect();
        assert_eq!(names, vec!["group", "top"]);

        let drawing_order: Vec<_> = nodes
            .iter()
            .flat_map(AssembledNode::layers)
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(drawing_order, vec!["early", "late", "top"]);
        assert!(
            nodes
                .iter()
                .flat_map(AssembledNode::layers)
                .all(|l| l.features.len() == 1)
        );
    }
}
