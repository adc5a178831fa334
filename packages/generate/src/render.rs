//! Leaflet HTML emission.
//!
//! A render is a standalone HTML document loading Leaflet, with the whole
//! map (tiles, feature tree, styles, tooltips) inlined as one JSON object,
//! plus an embeddable fragment wrapping that document in an `<iframe>`.
//! Output depends only on the template and the assembled features.

use std::fmt::Write as _;
use std::sync::LazyLock;

use cartoforge_template::{MAX_ZOOM, MIN_ZOOM, MapTemplate, Style};
use regex::Regex;
use serde::Serialize;

use crate::GenerationError;
use crate::assemble::{AssembledLayer, AssembledNode};

const LEAFLET_VERSION: &str = "1.9.4";

/// Degrees the map may be panned away from its center, in every direction.
const BOUNDS_MARGIN: f64 = 1.5;

const MAP_CSS: &str = include_str!("assets/map.css");
const MAP_JS: &str = include_str!("assets/map.js");

static NOT_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_\s-]").expect("valid regex"));
static SLUG_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("valid regex"));

/// The two HTML artifacts of a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMap {
    /// Fragment embedding the map in another page.
    pub embed_html: String,
    /// Standalone document.
    pub full_html: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MapSpec {
    /// `[lat, lon]`, the order Leaflet expects.
    center: [f64; 2],
    zoom: i64,
    min_zoom: u8,
    max_zoom: u8,
    max_bounds: [[f64; 2]; 2],
    zoom_control: bool,
    layer_control: bool,
    tiles: Vec<TileSpec>,
    features: Vec<NodeSpec>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TileSpec {
    name: String,
    url: String,
    attribution: String,
    access_token: Option<String>,
    max_zoom: u8,
    overlay: bool,
    control: bool,
    transparent: bool,
}

#[derive(Serialize)]
struct TooltipSpec {
    sticky: bool,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum NodeSpec {
    Layer {
        name: String,
        show: bool,
        highlight: Option<serde_json::Value>,
        tooltip: Option<TooltipSpec>,
        data: geojson::FeatureCollection,
    },
    Group {
        name: String,
        show: bool,
        children: Vec<NodeSpec>,
    },
}

/// Renders a template and its assembled feature tree.
///
/// # Errors
///
/// Returns [`GenerationError::Failure`] if a builtin tile names an unknown
/// provider or the map cannot be encoded.
pub fn render_map(
    template: &MapTemplate,
    nodes: &[AssembledNode],
) -> Result<RenderedMap, GenerationError> {
    let (lon, lat) = template.center;
    let spec = MapSpec {
        center: [lat, lon],
        zoom: template.zoom_start,
        min_zoom: MIN_ZOOM,
        max_zoom: MAX_ZOOM,
        max_bounds: [
            [lat - BOUNDS_MARGIN, lon - BOUNDS_MARGIN],
            [lat + BOUNDS_MARGIN, lon + BOUNDS_MARGIN],
        ],
        zoom_control: template.zoom_control,
        layer_control: template.layer_control,
        tiles: tile_specs(template)?,
        features: nodes.iter().map(node_spec).collect(),
    };

    let payload = serde_json::to_string(&spec)
        .map_err(|e| GenerationError::failure(format!("cannot encode map: {e}")))?
        // Keeps the payload from closing the surrounding <script>.
        .replace("</", "<\\/");

    let full_html = document(&template.name, &payload, &legend(nodes));
    let embed_html = format!(
        "<div style=\"width:100%;\"><div style=\"position:relative;width:100%;height:0;padding-bottom:60%;\">\
         <iframe srcdoc=\"{}\" style=\"position:absolute;width:100%;height:100%;left:0;top:0;border:none !important;\" \
         allowfullscreen webkitallowfullscreen mozallowfullscreen></iframe></div></div>",
        escape_html(&full_html)
    );

    Ok(RenderedMap {
        embed_html,
        full_html,
    })
}

fn tile_specs(template: &MapTemplate) -> Result<Vec<TileSpec>, GenerationError> {
    template
        .tiles()
        .iter()
        .map(|tile| {
            let source = tile.source().ok_or_else(|| {
                GenerationError::failure(format!("no tile source for tile layer {:?}", tile.name))
            })?;
            Ok(TileSpec {
                name: tile.label(),
                url: source.url,
                attribution: source.attribution,
                access_token: source.access_token,
                max_zoom: source.max_zoom,
                overlay: tile.overlay,
                control: tile.control,
                transparent: tile.transparent,
            })
        })
        .collect()
}

fn node_spec(node: &AssembledNode) -> NodeSpec {
    match node {
        AssembledNode::Layer(layer) => NodeSpec::Layer {
            name: layer.name.clone(),
            show: layer.show_on_startup,
            highlight: layer.highlight.as_ref().map(Style::leaflet_options),
            tooltip: layer.sticky_tooltip.map(|sticky| TooltipSpec { sticky }),
            data: feature_collection(layer),
        },
        AssembledNode::Group(group) => NodeSpec::Group {
            name: group.name.clone(),
            show: group.show_on_startup,
            children: group.children.iter().map(node_spec).collect(),
        },
    }
}

fn feature_collection(layer: &AssembledLayer) -> geojson::FeatureCollection {
    let features = layer
        .features
        .iter()
        .map(|feature| {
            let mut properties = geojson::JsonObject::new();
            if let Some(style) = &feature.style {
                properties.insert("style".to_string(), style.leaflet_options());
            }
            if !feature.tooltip.is_empty() {
                properties.insert(
                    "tooltip".to_string(),
                    serde_json::json!(feature.tooltip),
                );
            }
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(
                    &feature.geometry,
                ))),
                id: feature
                    .id
                    .map(|id| geojson::feature::Id::Number(serde_json::Number::from(id))),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Legend listing every layer, the lowest z-index at the bottom.
fn legend(nodes: &[AssembledNode]) -> String {
    let layers: Vec<&AssembledLayer> = nodes.iter().flat_map(AssembledNode::layers).collect();
    if layers.is_empty() {
        return String::new();
    }

    let mut html = String::from(
        "<div class=\"legend --collapsed\">\n<p class=\"legend-title\">Legend</p>\n",
    );
    for layer in layers.iter().rev() {
        let style = layer.style.clone().unwrap_or_default();
        let (stroke, fill) = legend_colors(&style);
        let _ = writeln!(
            html,
            "<div class=\"legend-entry\"><div class=\"square\" style=\"--fill-color: {fill}; --stroke-color: {stroke};\"></div><p>{}</p></div>",
            escape_html(&layer.name)
        );
    }
    html.push_str("</div>");
    html
}

/// CSS colors of a legend swatch: `(stroke, fill)`.
fn legend_colors(style: &Style) -> (String, String) {
    const NONE: &str = "rgba(0, 0, 0, 0)";

    let stroke = if style.stroke {
        style.stroke_rgba()
    } else {
        NONE.to_string()
    };
    let fill = match (&style.fill_pattern, style.fill) {
        (_, false) => NONE.to_string(),
        (Some(pattern), true) => pattern.css_color(),
        (None, true) => style.fill_rgba(),
    };
    (stroke, fill)
}

fn document(title: &str, payload: &str, legend: &str) -> String {
    let script = MAP_JS.replace("MAP_SPEC", payload);
    format!(
        "<!DOCTYPE html>
<html lang=\"en\">
<head>
<meta charset=\"utf-8\">
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">
<title>{title}</title>
<link rel=\"stylesheet\" href=\"https://unpkg.com/leaflet@{LEAFLET_VERSION}/dist/leaflet.css\">
<script src=\"https://unpkg.com/leaflet@{LEAFLET_VERSION}/dist/leaflet.js\"></script>
<style>
{MAP_CSS}</style>
</head>
<body>
<div id=\"map\"></div>
{legend}
<script>
{script}</script>
</body>
</html>
",
        title = escape_html(title),
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// URL-safe form of a render name: lowercase ASCII letters, digits,
/// underscores and single hyphens.
#[must_use]
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let kept = NOT_SLUG.replace_all(&lowered, "");
    SLUG_SEPARATOR
        .replace_all(kept.trim(), "-")
        .trim_matches(|c| c == '-' || c == '_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use cartoforge_template::{FillPattern, StripePattern, TileLayer};
    use geo::{Geometry, Point};

    use super::*;
    use crate::assemble::{AssembledFeature, AssembledGroup};

    fn layer(name: &str, z_index: i32, style: Option<Style>) -> AssembledLayer {
        AssembledLayer {
            name: name.to_string(),
            z_index,
            show_on_startup: true,
            style,
            highlight: None,
            sticky_tooltip: None,
            features: vec![AssembledFeature {
                id: Some(7),
                geometry: Geometry::Point(Point::new(6.17, 49.11)),
                attributes: cartoforge_dataset_models::Attributes::new(),
                style: None,
                tooltip: vec![("Name".to_string(), "</script>".to_string())],
            }],
        }
    }

    fn template() -> MapTemplate {
        let mut template = MapTemplate::new("Metz & co");
        template.add_tile(TileLayer::builtin("openstreetmap")).unwrap();
        template
    }

    #[test]
    fn slugs_are_url_safe() {
        assert_eq!(slugify("Metz & Co"), "metz-co");
        assert_eq!(slugify("  Road map -- 2024 "), "road-map-2024");
        assert_eq!(slugify("_draft_"), "draft");
    }

    #[test]
    fn render_is_deterministic() {
        let nodes = vec![AssembledNode::Layer(layer("roads", 0, None))];
        let first = render_map(&template(), &nodes).unwrap();
        let second = render_map(&template(), &nodes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn document_inlines_bounds_and_zoom_range() {
        let rendered = render_map(&template(), &[]).unwrap();
        assert!(rendered.full_html.starts_with("<!DOCTYPE html>"));
        assert!(rendered.full_html.contains("<title>Metz &amp; co</title>"));
        assert!(rendered.full_html.contains("\"minZoom\":5"));
        assert!(rendered.full_html.contains("\"maxZoom\":18"));
        assert!(rendered.full_html.contains("\"center\":[49.119308,6.175715]"));
        assert!(rendered.full_html.contains("\"layerControl\":true"));
        assert!(!rendered.full_html.contains("MAP_SPEC"));
        assert!(!rendered.full_html.contains("class=\"legend"));
    }

    #[test]
    fn embed_wraps_the_escaped_document() {
        let rendered = render_map(&template(), &[]).unwrap();
        assert!(rendered.embed_html.contains("<iframe srcdoc=\"&lt;!DOCTYPE html&gt;"));
        assert!(!rendered.embed_html.contains("<script"));
    }

    #[test]
    fn payload_cannot_close_the_script() {
        let nodes = vec![AssembledNode::Layer(layer("roads", 0, None))];
        let rendered = render_map(&template(), &nodes).unwrap();
        assert!(rendered.full_html.contains("<\\/script>"));
        assert_eq!(rendered.full_html.matches("</script>").count(), 2);
    }

    #[test]
    fn legend_lists_layers_top_down_with_rgba_swatches() {
        let red = Style {
            color: "#ff0000".to_string(),
            fill_color: "#00ff00".to_string(),
            ..Style::default()
        };
        let nodes = vec![
            AssembledNode::Layer(layer("bottom", 0, None)),
            AssembledNode::Group(AssembledGroup {
                name: "group".to_string(),
                z_index: 1,
                show_on_startup: true,
                children: vec![AssembledNode::Layer(layer("top", 0, Some(red)))],
            }),
        ];
        let html = legend(&nodes);
        let top = html.find("<p>top</p>").unwrap();
        let bottom = html.find("<p>bottom</p>").unwrap();
        assert!(top < bottom);
        assert!(html.contains("--fill-color: rgba(0, 255, 0, 0.2); --stroke-color: rgba(255, 0, 0, 1);"));
    }

    #[test]
    fn legend_handles_patterns_and_disabled_paint() {
        let patterned = Style {
            fill_pattern: Some(FillPattern::Stripe(StripePattern {
                color: "#0000ff".to_string(),
                ..StripePattern::default()
            })),
            ..Style::default()
        };
        assert_eq!(legend_colors(&patterned).1, "rgba(0, 0, 255, 1)");

        let outline = Style {
            fill: false,
            ..Style::default()
        };
        assert_eq!(legend_colors(&outline).1, "rgba(0, 0, 0, 0)");
    }

    #[test]
    fn unknown_builtin_tiles_fail_the_render() {
        let mut template = MapTemplate::new("t");
        template.add_tile(TileLayer::builtin("nowhere")).unwrap();
        assert!(matches!(
            render_map(&template, &[]),
            Err(GenerationError::Failure { .. })
        ));
    }
}
