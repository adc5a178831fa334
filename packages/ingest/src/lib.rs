#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shapefile ingestion.
//!
//! [`ShapefileLayer`] reads one shapefile (geometry from `.shp`, attributes
//! from `.dbf`, spatial reference from `.prj`) as a lazy stream of
//! reprojected, size-limited features. [`ingest_dataset_version`] drives a
//! whole uploaded archive through validation, sanitizing, extraction, and
//! per-layer storage.

pub mod config;
pub mod dbf;
pub mod pipeline;
pub mod progress;
pub mod reader;

#[cfg(test)]
pub(crate) mod fixtures;

pub use config::IngestConfig;
pub use pipeline::{IngestReport, LayerReport, ingest_dataset_version};
pub use reader::{ReadStats, ShapefileLayer};

use cartoforge_archive::ArchiveError;
use cartoforge_database_models::StoreError;
use cartoforge_dataset_models::TextEncoding;
use cartoforge_geometry::GeometryError;

/// Errors raised while reading or ingesting shapefiles.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The shapefile or its attribute table is malformed.
    #[error("Cannot parse {path}: {message}")]
    Parse {
        /// File being read.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    /// The shapefile holds a geometry kind a layer cannot store.
    #[error("Unsupported geometry type: {kind}")]
    UnsupportedGeometry {
        /// Name of the geometry kind.
        kind: String,
    },

    /// Attribute text is not valid under the declared encoding.
    #[error("Cannot decode {path} as {encoding}: {message}")]
    Encoding {
        /// Attribute table being read.
        path: String,
        /// Declared encoding.
        encoding: TextEncoding,
        /// Which value failed.
        message: String,
    },

    /// Reprojection failed or the spatial reference is unknown.
    #[error(transparent)]
    Geometry(GeometryError),

    /// The uploaded archive was rejected.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// A repository operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is invalid.
    #[error("Invalid ingestion settings: {message}")]
    Config {
        /// Parser message.
        message: String,
    },
}

impl From<GeometryError> for IngestError {
    fn from(e: GeometryError) -> Self {
        match e {
            GeometryError::UnsupportedGeometry { kind } => Self::UnsupportedGeometry { kind },
            other => Self::Geometry(other),
        }
    }
}
