//! Boundary policies restricting a layer's features to an area.

use geo::{
    Area as _, BooleanOps as _, Geometry, Intersects as _, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Relate as _,
};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// How features are matched against a layer boundary.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BoundaryType {
    /// Keep features touching the boundary, unmodified.
    #[default]
    Intersect,
    /// Keep only features lying entirely inside the boundary.
    Strict,
    /// Clip features to the boundary, dropping what ends up empty.
    Crop,
}

/// Applies a boundary policy to one feature geometry.
///
/// Returns the geometry to render, or `None` when the feature is excluded.
#[must_use]
pub fn apply_boundary(
    geometry: &Geometry<f64>,
    boundary: &MultiPolygon<f64>,
    policy: BoundaryType,
) -> Option<Geometry<f64>> {
    match policy {
        BoundaryType::Intersect => geometry.intersects(boundary).then(|| geometry.clone()),
        BoundaryType::Strict => geometry
            .relate(boundary)
            .is_within()
            .then(|| geometry.clone()),
        BoundaryType::Crop => crop(geometry, boundary),
    }
}

fn crop(geometry: &Geometry<f64>, boundary: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(point) => boundary
            .intersects(point)
            .then_some(Geometry::Point(*point)),
        Geometry::MultiPoint(points) => {
            let kept: Vec<_> = points
                .iter()
                .filter(|point| boundary.intersects(*point))
                .copied()
                .collect();
            (!kept.is_empty()).then_some(Geometry::MultiPoint(MultiPoint(kept)))
        }
        Geometry::LineString(line) => {
            clip_lines(boundary, &MultiLineString(vec![line.clone()])).map(|mut clipped| {
                if clipped.0.len() == 1 {
                    Geometry::LineString(clipped.0.remove(0))
                } else {
                    Geometry::MultiLineString(clipped)
                }
            })
        }
        Geometry::MultiLineString(lines) => {
            clip_lines(boundary, lines).map(Geometry::MultiLineString)
        }
        Geometry::Polygon(polygon) => {
            clip_polygons(boundary, &MultiPolygon(vec![polygon.clone()])).map(|mut clipped| {
                if clipped.0.len() == 1 {
                    Geometry::Polygon(clipped.0.remove(0))
                } else {
                    Geometry::MultiPolygon(clipped)
                }
            })
        }
        Geometry::MultiPolygon(polygons) => {
            clip_polygons(boundary, polygons).map(Geometry::MultiPolygon)
        }
        Geometry::Line(_)
        | Geometry::GeometryCollection(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => None,
    }
}

fn clip_lines(
    boundary: &MultiPolygon<f64>,
    lines: &MultiLineString<f64>,
) -> Option<MultiLineString<f64>> {
    let clipped = boundary.clip(lines, false);
    let parts: Vec<LineString<f64>> = clipped
        .0
        .into_iter()
        .filter(|line| line.0.len() >= 2)
        .collect();
    (!parts.is_empty()).then_some(MultiLineString(parts))
}

fn clip_polygons(
    boundary: &MultiPolygon<f64>,
    polygons: &MultiPolygon<f64>,
) -> Option<MultiPolygon<f64>> {
    let clipped = polygons.intersection(boundary);
    let parts: Vec<_> = clipped
        .0
        .into_iter()
        .filter(|polygon| polygon.unsigned_area() > 0.0)
        .collect();
    (!parts.is_empty()).then_some(MultiPolygon(parts))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use geo::{Polygon, polygon};

    use super::*;

    fn unit_square() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]])
    }

    fn square(min: (f64, f64), size: f64) -> Polygon<f64> {
        let (x, y) = min;
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ]
    }

    #[test]
    fn outside_feature_is_excluded_by_every_policy() {
        let outside = Geometry::Polygon(square((5.0, 5.0), 1.0));
        let boundary = unit_square();
        assert_eq!(apply_boundary(&outside, &boundary, BoundaryType::Intersect), None);
        assert_eq!(apply_boundary(&outside, &boundary, BoundaryType::Strict), None);
        assert_eq!(apply_boundary(&outside, &boundary, BoundaryType::Crop), None);
    }

    #[test]
    fn straddling_feature_is_kept_whole_by_intersect() {
        let straddling = Geometry::Polygon(square((0.5, 0.25), 1.0));
        let kept = apply_boundary(&straddling, &unit_square(), BoundaryType::Intersect);
        assert_eq!(kept, Some(straddling));
    }

    #[test]
    fn straddling_feature_is_dropped_by_strict() {
        let straddling = Geometry::Polygon(square((0.5, 0.25), 1.0));
        assert_eq!(
            apply_boundary(&straddling, &unit_square(), BoundaryType::Strict),
            None
        );
    }

    #[test]
    fn contained_feature_is_kept_by_strict() {
        let inside = Geometry::Polygon(square((0.25, 0.25), 0.5));
        assert_eq!(
            apply_boundary(&inside, &unit_square(), BoundaryType::Strict),
            Some(inside)
        );
    }

    #[test]
    fn crop_clips_polygons_to_the_boundary() {
        let straddling = Geometry::Polygon(square((0.5, 0.0), 1.0));
        let Some(Geometry::Polygon(cropped)) =
            apply_boundary(&straddling, &unit_square(), BoundaryType::Crop)
        else {
            panic!("crop should produce a single polygon");
        };
        assert!((cropped.unsigned_area() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn crop_clips_lines_to_the_boundary() {
        let line = Geometry::LineString(LineString::from(vec![(-1.0, 0.5), (2.0, 0.5)]));
        let Some(Geometry::LineString(cropped)) =
            apply_boundary(&line, &unit_square(), BoundaryType::Crop)
        else {
            panic!("crop should produce a single line");
        };
        for coord in &cropped.0 {
            assert!(coord.x >= -1e-9 && coord.x <= 1.0 + 1e-9, "x = {}", coord.x);
        }
    }

    #[test]
    fn crop_keeps_only_inner_points() {
        let points = Geometry::MultiPoint(MultiPoint::from(vec![(0.5, 0.5), (3.0, 3.0)]));
        assert_eq!(
            apply_boundary(&points, &unit_square(), BoundaryType::Crop),
            Some(Geometry::MultiPoint(MultiPoint::from(vec![(0.5, 0.5)])))
        );
    }

    #[test]
    fn boundary_types_use_lowercase_names() {
        assert_eq!(BoundaryType::Crop.to_string(), "crop");
        assert_eq!(BoundaryType::from_str("strict").unwrap(), BoundaryType::Strict);
        assert_eq!(
            serde_json::to_string(&BoundaryType::Intersect).unwrap(),
            "\"intersect\""
        );
        assert_eq!(BoundaryType::default(), BoundaryType::Intersect);
    }
}
