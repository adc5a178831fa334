//! Byte-level builders for `.shp` and `.dbf` test files.

use std::path::{Path, PathBuf};

/// `(name, type letter, width, decimals)`.
pub type DbfColumn = (&'static str, u8, u8, u8);

pub const WGS84_PRJ: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]]"#;

pub const SHAPE_POINT: i32 = 1;
pub const SHAPE_POLYGON: i32 = 5;
pub const SHAPE_MULTIPATCH: i32 = 31;

/// Builds a dBase III table. Values are left-aligned and space padded to
/// their column width.
pub fn dbf_bytes(columns: &[DbfColumn], records: &[(bool, &[&[u8]])]) -> Vec<u8> {
    let header_length = 32 + 32 * columns.len() + 1;
    let record_length = 1 + columns
        .iter()
        .map(|(_, _, width, _)| usize::from(*width))
        .sum::<usize>();

    let mut out = vec![0x03, 124, 1, 1];
    out.extend_from_slice(&u32::try_from(records.len()).unwrap().to_le_bytes());
    out.extend_from_slice(&u16::try_from(header_length).unwrap().to_le_bytes());
    out.extend_from_slice(&u16::try_from(record_length).unwrap().to_le_bytes());
    out.extend_from_slice(&[0; 20]);

    for (name, kind, width, decimals) in columns {
        let mut descriptor = [0u8; 32];
        descriptor[..name.len()].copy_from_slice(name.as_bytes());
        descriptor[11] = *kind;
        descriptor[16] = *width;
        descriptor[17] = *decimals;
        out.extend_from_slice(&descriptor);
    }
    out.push(0x0D);

    for (deleted, values) in records {
        out.push(if *deleted { b'*' } else { b' ' });
        for ((_, _, width, _), value) in columns.iter().zip(values.iter()) {
            let mut cell = value.to_vec();
            cell.resize(usize::from(*width), b' ');
            out.extend_from_slice(&cell);
        }
    }
    out.push(0x1A);
    out
}

/// Builds a `.shp` file from record contents (shape type included).
pub fn shp_bytes(shape_type: i32, contents: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, content) in contents.iter().enumerate() {
        body.extend_from_slice(&i32::try_from(i + 1).unwrap().to_be_bytes());
        body.extend_from_slice(&i32::try_from(content.len() / 2).unwrap().to_be_bytes());
        body.extend_from_slice(content);
    }

    let mut out = Vec::new();
    out.extend_from_slice(&9994_i32.to_be_bytes());
    out.extend_from_slice(&[0; 20]);
    out.extend_from_slice(&i32::try_from((100 + body.len()) / 2).unwrap().to_be_bytes());
    out.extend_from_slice(&1000_i32.to_le_bytes());
    out.extend_from_slice(&shape_type.to_le_bytes());
    for _ in 0..8 {
        out.extend_from_slice(&0_f64.to_le_bytes());
    }
    out.extend(body);
    out
}

pub fn null_shape() -> Vec<u8> {
    0_i32.to_le_bytes().to_vec()
}

pub fn point_shape(x: f64, y: f64) -> Vec<u8> {
    let mut out = SHAPE_POINT.to_le_bytes().to_vec();
    out.extend_from_slice(&x.to_le_bytes());
    out.extend_from_slice(&y.to_le_bytes());
    out
}

/// Polygon record. Outer rings must be clockwise and holes
/// counter-clockwise.
pub fn polygon_shape(rings: &[&[(f64, f64)]]) -> Vec<u8> {
    let points: Vec<(f64, f64)> = rings.iter().flat_map(|ring| ring.iter().copied()).collect();
    let min_x = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let min_y = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_x = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let max_y = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    let mut out = SHAPE_POLYGON.to_le_bytes().to_vec();
    for v in [min_x, min_y, max_x, max_y] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&i32::try_from(rings.len()).unwrap().to_le_bytes());
    out.extend_from_slice(&i32::try_from(points.len()).unwrap().to_le_bytes());
    let mut start = 0;
    for ring in rings {
        out.extend_from_slice(&i32::try_from(start).unwrap().to_le_bytes());
        start += ring.len();
    }
    for (x, y) in points {
        out.extend_from_slice(&x.to_le_bytes());
        out.extend_from_slice(&y.to_le_bytes());
    }
    out
}

/// Clockwise square with its lower-left corner at `(x, y)`.
pub fn square(x: f64, y: f64, size: f64) -> Vec<(f64, f64)> {
    vec![
        (x, y),
        (x, y + size),
        (x + size, y + size),
        (x + size, y),
        (x, y),
    ]
}

/// Writes `<name>.shp`, `<name>.dbf`, and, when given, `<name>.prj` into
/// `dir` and returns the `.shp` path.
pub fn write_shapefile(
    dir: &Path,
    name: &str,
    shp: &[u8],
    dbf: &[u8],
    prj: Option<&str>,
) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let shp_path = dir.join(format!("{name}.shp"));
    std::fs::write(&shp_path, shp).unwrap();
    std::fs::write(dir.join(format!("{name}.dbf")), dbf).unwrap();
    if let Some(prj) = prj {
        std::fs::write(dir.join(format!("{name}.prj")), prj).unwrap();
    }
    shp_path
}

pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cartoforge_ingest_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
