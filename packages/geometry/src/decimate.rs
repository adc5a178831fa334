//! Point decimation and part-count limits for polygonal geometries.

use geo::{Coord, LineString, MultiPolygon, Polygon};

/// Smallest ring that still describes an area: three corners plus the
/// closing point.
const MIN_RING_POINTS: usize = 4;

/// Size limits applied to polygonal geometries during ingestion.
///
/// A limit of `0` disables the corresponding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimationLimits {
    /// Maximum points per ring of a single polygon.
    pub polygon_point_limit: usize,
    /// Maximum number of parts in a multipolygon before it is rejected.
    pub sub_polygon_limit: usize,
    /// Maximum points per ring of a multipolygon part.
    pub sub_polygon_point_limit: usize,
}

impl Default for DecimationLimits {
    fn default() -> Self {
        Self {
            polygon_point_limit: 1000,
            sub_polygon_limit: 2500,
            sub_polygon_point_limit: 1000,
        }
    }
}

impl DecimationLimits {
    /// Limits that never decimate nor reject anything.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            polygon_point_limit: 0,
            sub_polygon_limit: 0,
            sub_polygon_point_limit: 0,
        }
    }
}

/// Result of applying [`DecimationLimits`] to a geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitOutcome {
    /// The geometry survived, possibly with fewer points.
    Kept(geo::Geometry<f64>),
    /// A multipolygon had more parts than allowed.
    Rejected {
        /// Number of parts the multipolygon had.
        parts: usize,
    },
}

/// Keeps every `ceil(len / max_points)`-th point of `points`.
///
/// Returns the input unchanged when it already fits, or when `max_points`
/// is `0`. Otherwise the result holds at most `max_points` points, always
/// starts with the first input point and preserves order.
#[must_use]
pub fn decimate_ring<T: Clone>(points: &[T], max_points: usize) -> Vec<T> {
    if max_points == 0 || points.len() <= max_points {
        return points.to_vec();
    }

    let stride = points.len().div_ceil(max_points);
    points.iter().step_by(stride).cloned().collect()
}

/// Applies `limits` to a geometry.
///
/// Multipolygons with more parts than `sub_polygon_limit` are rejected
/// before any decimation happens. Surviving polygon rings are decimated;
/// points and lines pass through untouched.
#[must_use]
pub fn limit_geometry(geometry: geo::Geometry<f64>, limits: &DecimationLimits) -> LimitOutcome {
    match geometry {
        geo::Geometry::MultiPolygon(multi) => {
            let parts = multi.0.len();
            if limits.sub_polygon_limit > 0 && parts > limits.sub_polygon_limit {
                return LimitOutcome::Rejected { parts };
            }
            LimitOutcome::Kept(geo::Geometry::MultiPolygon(MultiPolygon(
                multi
                    .0
                    .iter()
                    .map(|polygon| decimate_polygon(polygon, limits.sub_polygon_point_limit))
                    .collect(),
            )))
        }
        geo::Geometry::Polygon(polygon) => LimitOutcome::Kept(geo::Geometry::Polygon(
            decimate_polygon(&polygon, limits.polygon_point_limit),
        )),
        other => LimitOutcome::Kept(other),
    }
}

fn decimate_polygon(polygon: &Polygon<f64>, max_points: usize) -> Polygon<f64> {
    if max_points == 0 {
        return polygon.clone();
    }
    Polygon::new(
        decimate_closed_ring(polygon.exterior(), max_points),
        polygon
            .interiors()
            .iter()
            .map(|ring| decimate_closed_ring(ring, max_points))
            .collect(),
    )
}

/// Decimates a closed ring so that, once re-closed, it holds at most
/// `max_points` points.
fn decimate_closed_ring(ring: &LineString<f64>, max_points: usize) -> LineString<f64> {
    let max_points = max_points.max(MIN_RING_POINTS);
    if ring.0.len() <= max_points {
        return ring.clone();
    }

    let open: &[Coord<f64>] = if ring.is_closed() {
        &ring.0[..ring.0.len() - 1]
    } else {
        &ring.0
    };

    // One slot is reserved for the closing point.
    let mut kept = decimate_ring(open, max_points - 1);
    if let Some(first) = kept.first().copied() {
        kept.push(first);
    }
    LineString(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(n: usize) -> Polygon<f64> {
        #[allow(clippy::cast_precision_loss)]
        let coords: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let t = (i as f64) / (n as f64) * std::f64::consts::TAU;
                (t.cos(), t.sin())
            })
            .collect();
        Polygon::new(LineString::from(coords), vec![])
    }

    #[test]
    fn decimate_ring_keeps_small_inputs() {
        let points: Vec<u32> = (0..10).collect();
        assert_eq!(decimate_ring(&points, 10), points);
        assert_eq!(decimate_ring(&points, 0), points);
    }

    #[test]
    fn decimate_ring_never_exceeds_budget() {
        for len in [11_usize, 99, 100, 101, 1001, 2999, 3000, 3001] {
            for max in [1_usize, 3, 10, 100, 1000] {
                let points: Vec<usize> = (0..len).collect();
                let kept = decimate_ring(&points, max);
                if len > max {
                    assert!(kept.len() <= max, "len={len} max={max} kept={}", kept.len());
                }
                assert!(kept.windows(2).all(|w| w[0] < w[1]), "order lost");
                assert_eq!(kept.first(), Some(&0));
            }
        }
    }

    #[test]
    fn decimate_ring_uses_regular_stride() {
        let points: Vec<u32> = (0..10).collect();
        assert_eq!(decimate_ring(&points, 4), vec![0, 3, 6, 9]);
        assert_eq!(decimate_ring(&points, 5), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn polygon_rings_stay_closed_after_decimation() {
        let limits = DecimationLimits {
            polygon_point_limit: 50,
            ..DecimationLimits::default()
        };
        let LimitOutcome::Kept(geo::Geometry::Polygon(polygon)) =
            limit_geometry(geo::Geometry::Polygon(circle(500)), &limits)
        else {
            panic!("polygon should be kept");
        };
        let ring = polygon.exterior();
        assert!(ring.0.len() <= 50);
        assert!(ring.0.len() >= MIN_RING_POINTS);
        assert!(ring.is_closed());
    }

    #[test]
    fn oversized_multipolygons_are_rejected_before_decimation() {
        let limits = DecimationLimits {
            sub_polygon_limit: 2,
            ..DecimationLimits::default()
        };
        let multi = MultiPolygon(vec![circle(10), circle(10), circle(10)]);
        assert_eq!(
            limit_geometry(geo::Geometry::MultiPolygon(multi), &limits),
            LimitOutcome::Rejected { parts: 3 }
        );
    }

    #[test]
    fn multipolygon_parts_use_their_own_point_limit() {
        let limits = DecimationLimits {
            polygon_point_limit: 1000,
            sub_polygon_limit: 10,
            sub_polygon_point_limit: 20,
        };
        let multi = MultiPolygon(vec![circle(200), circle(8)]);
        let LimitOutcome::Kept(geo::Geometry::MultiPolygon(kept)) =
            limit_geometry(geo::Geometry::MultiPolygon(multi), &limits)
        else {
            panic!("multipolygon should be kept");
        };
        assert!(kept.0[0].exterior().0.len() <= 20);
        assert_eq!(kept.0[1].exterior().0.len(), 9);
    }

    #[test]
    fn zero_limits_disable_everything() {
        let mut parts = vec![circle(4); 2600];
        parts.push(circle(1500));
        let LimitOutcome::Kept(geo::Geometry::MultiPolygon(kept)) = limit_geometry(
            geo::Geometry::MultiPolygon(MultiPolygon(parts)),
            &DecimationLimits::unlimited(),
        ) else {
            panic!("multipolygon should be kept");
        };
        assert_eq!(kept.0.len(), 2601);
        assert_eq!(kept.0[2600].exterior().0.len(), 1501);
    }

    #[test]
    fn points_pass_through() {
        let point = geo::Geometry::Point(geo::Point::new(1.0, 2.0));
        assert_eq!(
            limit_geometry(point.clone(), &DecimationLimits::default()),
            LimitOutcome::Kept(point)
        );
    }
}
