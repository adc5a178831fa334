#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry and projection utilities.
//!
//! Pure functions shared by ingestion and map generation: coordinate
//! reprojection between spatial references, ring decimation under point
//! budgets, geometry classification, boundary policies (intersect, strict,
//! crop), and the `GeoJSON` text codec used for storage.

pub mod boundary;
pub mod codec;
pub mod decimate;
pub mod projection;

pub use boundary::{BoundaryType, apply_boundary};
pub use decimate::{DecimationLimits, LimitOutcome, decimate_ring, limit_geometry};
pub use projection::{Reprojector, reproject, srid_from_wkt};

use cartoforge_dataset_models::GeometryType;
use thiserror::Error;

/// Errors raised by geometry operations.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// No projection definition is known for this SRID.
    #[error("Unknown spatial reference EPSG:{0}")]
    UnknownSrid(u32),

    /// The coordinate transform itself failed.
    #[error("Projection error: {message}")]
    Projection {
        /// Description of what went wrong.
        message: String,
    },

    /// The geometry kind cannot be represented in a dataset layer.
    #[error("Unsupported geometry type: {kind}")]
    UnsupportedGeometry {
        /// Name of the offending geometry kind.
        kind: String,
    },

    /// `GeoJSON` encoding or decoding failed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

/// Classifies a geometry into the layer geometry taxonomy.
///
/// # Errors
///
/// Returns [`GeometryError::UnsupportedGeometry`] for kinds a dataset layer
/// cannot hold (collections, lines, rectangles, triangles).
pub fn classify(geometry: &geo::Geometry<f64>) -> Result<GeometryType, GeometryError> {
    GeometryType::of(geometry).ok_or_else(|| GeometryError::UnsupportedGeometry {
        kind: geometry_kind_name(geometry).to_string(),
    })
}

const fn geometry_kind_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_layer_geometries() {
        let point = geo::Geometry::Point(geo::Point::new(1.0, 2.0));
        assert_eq!(classify(&point).unwrap(), GeometryType::Point);

        let polygon = geo::Geometry::Polygon(geo::Polygon::new(
            geo::LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        ));
        assert_eq!(classify(&polygon).unwrap(), GeometryType::Polygon);
    }

    #[test]
    fn rejects_collections() {
        let collection = geo::Geometry::GeometryCollection(geo::GeometryCollection(vec![
            geo::Geometry::Point(geo::Point::new(0.0, 0.0)),
        ]));
        assert!(matches!(
            classify(&collection),
            Err(GeometryError::UnsupportedGeometry { kind }) if kind == "GeometryCollection"
        ));
    }
}
