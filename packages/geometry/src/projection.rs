//! Coordinate reprojection between spatial reference systems.
//!
//! Shapefiles in a projected SRS store `(x = easting, y = northing)`; these
//! map to `(longitude, latitude)` only after the transform, so coordinates
//! are always handled in `(x, y)` order and never swapped.

use std::sync::LazyLock;

use geo::{Coord, MapCoords as _};
use proj4rs::proj::Proj;
use regex::Regex;

use crate::GeometryError;

/// SRIDs with a built-in projection definition, besides the UTM zones
/// (`32601..=32660` north, `32701..=32760` south).
const KNOWN_DEFINITIONS: &[(u32, &str)] = &[
    (4326, "+proj=longlat +datum=WGS84 +no_defs"),
    (4258, "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
    (4171, "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
    (
        3857,
        "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs",
    ),
    (
        2154,
        "+proj=lcc +lat_0=46.5 +lon_0=3 +lat_1=49 +lat_2=44 +x_0=700000 +y_0=6600000 \
         +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
];

/// Returns the PROJ.4 definition string for `srid`, if known.
#[must_use]
pub fn proj_definition(srid: u32) -> Option<String> {
    if let Some((_, def)) = KNOWN_DEFINITIONS.iter().find(|(code, _)| *code == srid) {
        return Some((*def).to_string());
    }

    match srid {
        32601..=32660 => Some(format!(
            "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
            srid - 32600
        )),
        32701..=32760 => Some(format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
            srid - 32700
        )),
        _ => None,
    }
}

/// Whether `srid` is a geographic (degree-based) reference system.
#[must_use]
pub const fn is_geographic(srid: u32) -> bool {
    matches!(srid, 4326 | 4258 | 4171)
}

/// A prepared transform from one spatial reference to another.
pub struct Reprojector {
    from_srid: u32,
    to_srid: u32,
    from: Proj,
    to: Proj,
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("from_srid", &self.from_srid)
            .field("to_srid", &self.to_srid)
            .finish_non_exhaustive()
    }
}

impl Reprojector {
    /// Prepares a transform between two SRIDs.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnknownSrid`] if either SRID has no known
    /// definition, or [`GeometryError::Projection`] if the definition fails
    /// to parse.
    pub fn new(from_srid: u32, to_srid: u32) -> Result<Self, GeometryError> {
        log::debug!("Preparing reprojection EPSG:{from_srid} -> EPSG:{to_srid}");
        Ok(Self {
            from_srid,
            to_srid,
            from: build_proj(from_srid)?,
            to: build_proj(to_srid)?,
        })
    }

    /// Source SRID of the transform.
    #[must_use]
    pub const fn from_srid(&self) -> u32 {
        self.from_srid
    }

    /// Target SRID of the transform.
    #[must_use]
    pub const fn to_srid(&self) -> u32 {
        self.to_srid
    }

    /// Whether the transform leaves coordinates untouched.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.from_srid == self.to_srid
    }

    /// Transforms a single coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Projection`] if the coordinate falls outside
    /// the domain of either projection.
    pub fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
        if self.is_identity() {
            return Ok(coord);
        }

        let mut point = if is_geographic(self.from_srid) {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };

        proj4rs::transform::transform(&self.from, &self.to, &mut point).map_err(|e| {
            GeometryError::Projection {
                message: format!(
                    "EPSG:{} -> EPSG:{} failed for ({}, {}): {e}",
                    self.from_srid, self.to_srid, coord.x, coord.y
                ),
            }
        })?;

        if is_geographic(self.to_srid) {
            Ok(Coord {
                x: point.0.to_degrees(),
                y: point.1.to_degrees(),
            })
        } else {
            Ok(Coord {
                x: point.0,
                y: point.1,
            })
        }
    }

    /// Transforms every coordinate of a geometry.
    ///
    /// # Errors
    ///
    /// Returns the first [`GeometryError::Projection`] encountered.
    pub fn transform_geometry(
        &self,
        geometry: &geo::Geometry<f64>,
    ) -> Result<geo::Geometry<f64>, GeometryError> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|coord| self.transform(coord))
    }
}

fn build_proj(srid: u32) -> Result<Proj, GeometryError> {
    let definition = proj_definition(srid).ok_or(GeometryError::UnknownSrid(srid))?;
    Proj::from_proj_string(&definition).map_err(|e| GeometryError::Projection {
        message: format!("invalid definition for EPSG:{srid}: {e}"),
    })
}

/// Reprojects a single point from `from_srid` to `to_srid`.
///
/// # Errors
///
/// Returns [`GeometryError`] if either SRID is unknown or the transform
/// fails.
pub fn reproject(
    point: geo::Point<f64>,
    from_srid: u32,
    to_srid: u32,
) -> Result<geo::Point<f64>, GeometryError> {
    let reprojector = Reprojector::new(from_srid, to_srid)?;
    Ok(reprojector.transform(point.0)?.into())
}

static AUTHORITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#).expect("valid regex")
});

static UTM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"utm[_ ]zone[_ ](\d{1,2})([ns])").expect("valid regex"));

/// Projection names found in ESRI-style `.prj` files without authority
/// codes, matched against the lowercased WKT.
const KNOWN_NAMES: &[(&str, u32)] = &[
    ("lambert_93", 2154),
    ("lambert-93", 2154),
    ("lambert 93", 2154),
    ("web_mercator", 3857),
    ("pseudo-mercator", 3857),
    ("pseudo_mercator", 3857),
];

/// Geographic datums recognized when the WKT root is a `GEOGCS`.
const KNOWN_DATUMS: &[(&str, u32)] = &[
    ("wgs_1984", 4326),
    ("wgs 84", 4326),
    ("wgs84", 4326),
    ("etrs_1989", 4258),
    ("etrs89", 4258),
    ("rgf_1993", 4171),
    ("rgf93", 4171),
];

/// Detects the SRID declared by a `.prj` WKT string.
///
/// Prefers the root element's own `AUTHORITY["EPSG", n]`, then falls back
/// to well-known projection and datum names. Returns `None` when nothing
/// is recognized.
#[must_use]
pub fn srid_from_wkt(wkt: &str) -> Option<u32> {
    for captures in AUTHORITY_RE.captures_iter(wkt) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if nesting_depth(&wkt[..whole.start()]) == 1 {
            return captures.get(1).and_then(|m| m.as_str().parse().ok());
        }
    }

    let lowered = wkt.to_ascii_lowercase();

    if let Some(captures) = UTM_RE.captures(&lowered) {
        let zone: u32 = captures.get(1)?.as_str().parse().ok()?;
        if (1..=60).contains(&zone) && lowered.contains("wgs") {
            let base = if captures.get(2)?.as_str() == "n" {
                32600
            } else {
                32700
            };
            return Some(base + zone);
        }
    }

    if let Some((_, srid)) = KNOWN_NAMES.iter().find(|(name, _)| lowered.contains(name)) {
        return Some(*srid);
    }

    if lowered.trim_start().starts_with("geogcs") {
        return KNOWN_DATUMS
            .iter()
            .find(|(name, _)| lowered.contains(name))
            .map(|(_, srid)| *srid);
    }

    None
}

/// Bracket depth at the end of `prefix`.
fn nesting_depth(prefix: &str) -> i32 {
    prefix.chars().fold(0, |depth, c| match c {
        '[' | '(' => depth + 1,
        ']' | ')' => depth - 1,
        _ => depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAMBERT_93_WKT: &str = r#"PROJCS["RGF93 / Lambert-93",GEOGCS["RGF93",DATUM["Reseau_Geodesique_Francais_1993",SPHEROID["GRS 1980",6378137,298.257222101,AUTHORITY["EPSG","7019"]],AUTHORITY["EPSG","6171"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4171"]],PROJECTION["Lambert_Conformal_Conic_2SP"],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AUTHORITY["EPSG","2154"]]"#;

    const ESRI_LAMBERT_93_WKT: &str = r#"PROJCS["RGF_1993_Lambert_93",GEOGCS["GCS_RGF_1993",DATUM["D_RGF_1993",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Lambert_Conformal_Conic"],UNIT["Meter",1.0]]"#;

    #[test]
    fn lambert_93_origin_maps_to_projection_center() {
        let point = reproject(geo::Point::new(700_000.0, 6_600_000.0), 2154, 4326).unwrap();
        assert!((point.x() - 3.0).abs() < 1e-6, "lon = {}", point.x());
        assert!((point.y() - 46.5).abs() < 1e-6, "lat = {}", point.y());
    }

    #[test]
    fn projected_axes_are_not_swapped() {
        // Metz, in Lambert-93 metres.
        let point = reproject(geo::Point::new(931_500.0, 6_895_500.0), 2154, 4326).unwrap();
        assert!(point.x() > 6.0 && point.x() < 6.4, "lon = {}", point.x());
        assert!(point.y() > 49.0 && point.y() < 49.3, "lat = {}", point.y());
    }

    #[test]
    fn round_trip_through_web_mercator() {
        let origin = geo::Point::new(6.175_715, 49.119_308);
        let projected = reproject(origin, 4326, 3857).unwrap();
        let back = reproject(projected, 3857, 4326).unwrap();
        assert!((back.x() - origin.x()).abs() < 1e-9);
        assert!((back.y() - origin.y()).abs() < 1e-9);
    }

    #[test]
    fn identity_transform_is_exact() {
        let reprojector = Reprojector::new(4326, 4326).unwrap();
        let coord = Coord { x: 1.25, y: -3.5 };
        assert_eq!(reprojector.transform(coord).unwrap(), coord);
    }

    #[test]
    fn unknown_srid_is_rejected() {
        assert!(matches!(
            Reprojector::new(99_999, 4326),
            Err(GeometryError::UnknownSrid(99_999))
        ));
    }

    #[test]
    fn utm_zones_have_definitions() {
        assert!(proj_definition(32631).unwrap().contains("+zone=31"));
        assert!(proj_definition(32733).unwrap().contains("+south"));
        assert!(proj_definition(32661).is_none());
    }

    #[test]
    fn detects_root_authority() {
        assert_eq!(srid_from_wkt(LAMBERT_93_WKT), Some(2154));
    }

    #[test]
    fn detects_esri_projection_names() {
        assert_eq!(srid_from_wkt(ESRI_LAMBERT_93_WKT), Some(2154));
        assert_eq!(
            srid_from_wkt(r#"PROJCS["WGS_1984_UTM_Zone_32N",GEOGCS["GCS_WGS_1984"]]"#),
            Some(32632)
        );
        assert_eq!(
            srid_from_wkt(r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984"]]"#),
            Some(4326)
        );
    }

    #[test]
    fn unrecognized_wkt_yields_none() {
        assert_eq!(srid_from_wkt(r#"LOCAL_CS["Engineering"]"#), None);
    }
}
