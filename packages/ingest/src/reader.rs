//! Shapefile layers.
//!
//! Geometry comes from the `.shp` file, attributes from the sibling
//! `.dbf`, and the spatial reference from the sibling `.prj`. The two files
//! are read in lockstep, one record at a time, so a layer is never held in
//! memory as a whole.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use cartoforge_dataset_models::{
    DatasetLayer, DatasetLayerField, GenerationStatus, GeographicFeature, GeometryType,
    TextEncoding,
};
use cartoforge_geometry::{
    DecimationLimits, LimitOutcome, Reprojector, limit_geometry, srid_from_wkt,
};
use geo::{Coord, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use shapefile::{PolygonRing, Shape, ShapeReader, ShapeType};

use crate::IngestError;
use crate::config::IngestConfig;
use crate::dbf::{DbfField, DbfReader};

/// Per-record outcome counts of a layer read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Records read from the files.
    pub read: u64,
    /// Multipolygons dropped for having too many parts.
    pub rejected: u64,
    /// Null shapes and deleted records.
    pub skipped: u64,
}

/// An opened shapefile.
pub struct ShapefileLayer {
    path: PathBuf,
    name: String,
    srid: u32,
    geometry_type: GeometryType,
    shapes: ShapeReader<BufReader<File>>,
    table: DbfReader<BufReader<File>>,
    reprojector: Reprojector,
    limits: DecimationLimits,
    stats: ReadStats,
}

impl std::fmt::Debug for ShapefileLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapefileLayer")
            .field("path", &self.path)
            .field("srid", &self.srid)
            .field("geometry_type", &self.geometry_type)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ShapefileLayer {
    /// Opens a `.shp` file together with its `.dbf` and `.prj` siblings.
    ///
    /// The SRID is read from the `.prj`; when that file is missing or not
    /// recognized, `config.default_srid` is assumed.
    ///
    /// # Errors
    ///
    /// * [`IngestError::Parse`] if either file is malformed or the `.dbf`
    ///   is missing
    /// * [`IngestError::UnsupportedGeometry`] for multipatch or untyped
    ///   shapefiles
    /// * [`IngestError::Geometry`] if the SRID has no known transform
    /// * [`IngestError::Encoding`] if the declared encoding is UTF-16
    pub fn open(
        path: &Path,
        encoding: TextEncoding,
        config: &IngestConfig,
    ) -> Result<Self, IngestError> {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::Parse {
                path: path.display().to_string(),
                message: "not a file path".to_string(),
            })?;

        let file = File::open(path).map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let shapes = ShapeReader::new(BufReader::new(file)).map_err(|e| IngestError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let geometry_type = layer_geometry_type(shapes.header().shape_type)?;

        let dbf_path = sibling(path, "dbf").ok_or_else(|| IngestError::Parse {
            path: path.display().to_string(),
            message: "missing .dbf attribute table".to_string(),
        })?;
        let table = DbfReader::open(&dbf_path, encoding)?;

        let srid = detect_srid(path, config.default_srid)?;
        let reprojector = Reprojector::new(srid, config.output_srid)?;

        log::info!(
            "{name}: {geometry_type} layer, EPSG:{srid}, {} records, {} fields",
            table.record_count(),
            table.fields().len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            name,
            srid,
            geometry_type,
            shapes,
            table,
            reprojector,
            limits: config.limits(),
            stats: ReadStats::default(),
        })
    }

    /// Layer name (the file stem).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// SRID the coordinates are declared in.
    #[must_use]
    pub const fn srid(&self) -> u32 {
        self.srid
    }

    /// Geometry family declared by the `.shp` header.
    #[must_use]
    pub const fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    /// Number of records declared by the attribute table.
    #[must_use]
    pub fn record_count(&self) -> u32 {
        self.table.record_count()
    }

    /// Attribute schema, inferred once from the field descriptors.
    #[must_use]
    pub fn fields(&self) -> Vec<DatasetLayerField> {
        self.table.fields().iter().map(DbfField::to_layer_field).collect()
    }

    /// Counts gathered by [`ShapefileLayer::features`] so far.
    #[must_use]
    pub const fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Unsaved layer metadata for `dataset_version_id`. The bounding box and
    /// feature count are left for the store to compute.
    #[must_use]
    pub fn to_layer(&self, dataset_version_id: i64) -> DatasetLayer {
        DatasetLayer {
            id: None,
            dataset_version_id,
            name: self.name.clone(),
            srid: self.srid,
            bounding_box: None,
            feature_count: 0,
            geometry_type: self.geometry_type,
            fields: self.fields(),
            generation_status: GenerationStatus::Pending,
        }
    }

    /// Streams the layer's features with reprojected geometry.
    ///
    /// Deleted records and null shapes are skipped. Multipolygons with more
    /// parts than allowed are rejected before any decimation; surviving
    /// polygons are decimated. The first error ends the stream.
    pub fn features(
        &mut self,
    ) -> impl Iterator<Item = Result<GeographicFeature, IngestError>> + '_ {
        let Self {
            path,
            name,
            shapes,
            table,
            reprojector,
            limits,
            stats,
            ..
        } = self;
        let mut shapes = shapes.iter_shapes();
        let mut failed = false;

        std::iter::from_fn(move || {
            if failed {
                return None;
            }
            let item = loop {
                let shape = match shapes.next()? {
                    Ok(shape) => shape,
                    Err(e) => {
                        break Err(IngestError::Parse {
                            path: path.display().to_string(),
                            message: format!("record {}: {e}", stats.read + 1),
                        });
                    }
                };
                let record = match table.next_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        break Err(IngestError::Parse {
                            path: path.display().to_string(),
                            message: format!(
                                "attribute table ends before shape {}",
                                stats.read + 1
                            ),
                        });
                    }
                    Err(e) => break Err(e),
                };
                stats.read += 1;

                if record.deleted {
                    stats.skipped += 1;
                    continue;
                }

                let geometry = match to_geometry(&shape) {
                    Ok(Some(geometry)) => geometry,
                    Ok(None) => {
                        log::debug!("{name}: skipping null shape #{}", stats.read);
                        stats.skipped += 1;
                        continue;
                    }
                    Err(e) => break Err(e),
                };

                let geometry = match limit_geometry(geometry, limits) {
                    LimitOutcome::Kept(geometry) => geometry,
                    LimitOutcome::Rejected { parts } => {
                        log::warn!(
                            "{name}: rejecting shape #{} with {parts} parts (limit {})",
                            stats.read,
                            limits.sub_polygon_limit
                        );
                        stats.rejected += 1;
                        continue;
                    }
                };

                break reprojector
                    .transform_geometry(&geometry)
                    .map(|geometry| GeographicFeature::new(geometry, record.attributes))
                    .map_err(IngestError::from);
            };
            failed = item.is_err();
            Some(item)
        })
    }
}

/// Geometry family of a shapefile from its header shape type.
fn layer_geometry_type(shape_type: ShapeType) -> Result<GeometryType, IngestError> {
    match shape_type {
        ShapeType::Point | ShapeType::PointM | ShapeType::PointZ => Ok(GeometryType::Point),
        ShapeType::Multipoint | ShapeType::MultipointM | ShapeType::MultipointZ => {
            Ok(GeometryType::MultiPoint)
        }
        ShapeType::Polyline | ShapeType::PolylineM | ShapeType::PolylineZ => {
            Ok(GeometryType::LineString)
        }
        ShapeType::Polygon | ShapeType::PolygonM | ShapeType::PolygonZ => {
            Ok(GeometryType::Polygon)
        }
        ShapeType::Multipatch | ShapeType::NullShape => Err(IngestError::UnsupportedGeometry {
            kind: format!("{shape_type:?}"),
        }),
    }
}

/// Finds `path` with its extension replaced by `extension`, in either case.
fn sibling(path: &Path, extension: &str) -> Option<PathBuf> {
    [extension.to_ascii_lowercase(), extension.to_ascii_uppercase()]
        .into_iter()
        .map(|ext| path.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

fn detect_srid(path: &Path, default_srid: u32) -> Result<u32, IngestError> {
    let Some(prj_path) = sibling(path, "prj") else {
        log::info!(
            "{}: no .prj, assuming EPSG:{default_srid}",
            path.display()
        );
        return Ok(default_srid);
    };

    let wkt = std::fs::read(&prj_path).map_err(|source| IngestError::Io {
        path: prj_path.display().to_string(),
        source,
    })?;
    Ok(srid_from_wkt(&String::from_utf8_lossy(&wkt)).unwrap_or_else(|| {
        log::warn!(
            "{}: unrecognized spatial reference, assuming EPSG:{default_srid}",
            prj_path.display()
        );
        default_srid
    }))
}

/// Planar position of a shapefile point, ignoring Z and M.
trait Planar {
    fn coord(&self) -> Coord<f64>;
}

impl Planar for shapefile::Point {
    fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

impl Planar for shapefile::PointM {
    fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

impl Planar for shapefile::PointZ {
    fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

/// Converts a shape to a `geo` geometry, `None` for null or empty shapes.
fn to_geometry(shape: &Shape) -> Result<Option<geo::Geometry<f64>>, IngestError> {
    Ok(match shape {
        Shape::NullShape => None,
        Shape::Point(p) => Some(Point(p.coord()).into()),
        Shape::PointM(p) => Some(Point(p.coord()).into()),
        Shape::PointZ(p) => Some(Point(p.coord()).into()),
        Shape::Multipoint(m) => multipoint(m.points()),
        Shape::MultipointM(m) => multipoint(m.points()),
        Shape::MultipointZ(m) => multipoint(m.points()),
        Shape::Polyline(l) => polyline(l.parts()),
        Shape::PolylineM(l) => polyline(l.parts()),
        Shape::PolylineZ(l) => polyline(l.parts()),
        Shape::Polygon(p) => polygon(p.rings()),
        Shape::PolygonM(p) => polygon(p.rings()),
        Shape::PolygonZ(p) => polygon(p.rings()),
        Shape::Multipatch(_) => {
            return Err(IngestError::UnsupportedGeometry {
                kind: "Multipatch".to_string(),
            });
        }
    })
}

fn ring<P: Planar>(points: &[P]) -> LineString<f64> {
    let mut line: LineString<f64> = points.iter().map(Planar::coord).collect();
    line.close();
    line
}

fn multipoint<P: Planar>(points: &[P]) -> Option<geo::Geometry<f64>> {
    if points.is_empty() {
        return None;
    }
    Some(MultiPoint(points.iter().map(|p| Point(p.coord())).collect()).into())
}

fn polyline<P: Planar>(parts: &[Vec<P>]) -> Option<geo::Geometry<f64>> {
    let mut lines: Vec<LineString<f64>> = parts
        .iter()
        .filter(|part| !part.is_empty())
        .map(|part| part.iter().map(Planar::coord).collect())
        .collect();
    match lines.len() {
        0 => None,
        1 => lines.pop().map(Into::into),
        _ => Some(MultiLineString(lines).into()),
    }
}

/// Groups rings into polygons: every outer ring starts a polygon and inner
/// rings belong to the outer ring preceding them. An inner ring with no
/// preceding outer ring is promoted to an exterior.
fn polygon<P: Planar>(rings: &[PolygonRing<P>]) -> Option<geo::Geometry<f64>> {
    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    for shape_ring in rings {
        match shape_ring {
            PolygonRing::Outer(points) => polygons.push((ring(points), Vec::new())),
            PolygonRing::Inner(points) => match polygons.last_mut() {
                Some((_, holes)) => holes.push(ring(points)),
                None => polygons.push((ring(points), Vec::new())),
            },
        }
    }

    let mut polygons: Vec<Polygon<f64>> = polygons
        .into_iter()
        .map(|(exterior, holes)| Polygon::new(exterior, holes))
        .collect();
    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Into::into),
        _ => Some(MultiPolygon(polygons).into()),
    }
}
