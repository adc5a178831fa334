//! `GeoJSON` text encoding of geometries, as stored in the database.

use geo::MultiPolygon;
use geojson::GeoJson;

use crate::GeometryError;

/// Encodes a geometry as a `GeoJSON` geometry object.
#[must_use]
pub fn to_geojson(geometry: &geo::Geometry<f64>) -> String {
    geojson::Geometry::new(geojson::Value::from(geometry)).to_string()
}

/// Decodes a `GeoJSON` geometry (or a feature wrapping one).
///
/// # Errors
///
/// Returns [`GeometryError::GeoJson`] if the text is not valid `GeoJSON`,
/// or [`GeometryError::UnsupportedGeometry`] if it holds no geometry.
pub fn from_geojson(text: &str) -> Result<geo::Geometry<f64>, GeometryError> {
    let geometry = match text.parse::<GeoJson>()? {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => {
            feature
                .geometry
                .ok_or_else(|| GeometryError::UnsupportedGeometry {
                    kind: "Feature without geometry".to_string(),
                })?
        }
        GeoJson::FeatureCollection(_) => {
            return Err(GeometryError::UnsupportedGeometry {
                kind: "FeatureCollection".to_string(),
            });
        }
    };
    Ok(geo::Geometry::<f64>::try_from(geometry)?)
}

/// Decodes a polygonal `GeoJSON` geometry into a [`MultiPolygon`].
///
/// # Errors
///
/// Returns [`GeometryError::UnsupportedGeometry`] if the geometry is not a
/// polygon or multipolygon, or any error from [`from_geojson`].
pub fn parse_multipolygon(text: &str) -> Result<MultiPolygon<f64>, GeometryError> {
    match from_geojson(text)? {
        geo::Geometry::MultiPolygon(multi) => Ok(multi),
        geo::Geometry::Polygon(polygon) => Ok(MultiPolygon(vec![polygon])),
        other => Err(GeometryError::UnsupportedGeometry {
            kind: crate::geometry_kind_name(&other).to_string(),
        }),
    }
}
