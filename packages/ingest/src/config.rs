//! Ingestion settings.
//!
//! Settings are read from a TOML file named by [`CONFIG_ENV`]. Any key
//! left out of the file keeps its default, so an empty file is valid.
//!
//! ```toml
//! polygon_point_limit = 1000
//! sub_polygon_limit = 2500
//! sub_polygon_point_limit = 1000
//! batch_size = 5000
//! default_srid = 2154
//! output_srid = 4326
//! ```

use std::path::Path;

use cartoforge_dataset_models::{DEFAULT_SOURCE_SRID, OUTPUT_SRID};
use cartoforge_geometry::DecimationLimits;
use serde::{Deserialize, Serialize};

use crate::IngestError;

/// Environment variable holding the path of the settings file.
pub const CONFIG_ENV: &str = "CARTOFORGE_CONFIG";

/// Tunables for shapefile ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum points per ring of a polygon, `0` for no limit.
    pub polygon_point_limit: usize,
    /// Maximum parts of a multipolygon before it is rejected, `0` for no
    /// limit.
    pub sub_polygon_limit: usize,
    /// Maximum points per ring of a multipolygon part, `0` for no limit.
    pub sub_polygon_point_limit: usize,
    /// Number of features between progress reports.
    pub batch_size: usize,
    /// SRID assumed when a shapefile has no usable `.prj`.
    pub default_srid: u32,
    /// SRID every stored coordinate is transformed to.
    pub output_srid: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let limits = DecimationLimits::default();
        Self {
            polygon_point_limit: limits.polygon_point_limit,
            sub_polygon_limit: limits.sub_polygon_limit,
            sub_polygon_point_limit: limits.sub_polygon_point_limit,
            batch_size: 5_000,
            default_srid: DEFAULT_SOURCE_SRID,
            output_srid: OUTPUT_SRID,
        }
    }
}

impl IngestConfig {
    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if the text is not valid TOML or a
    /// key has the wrong type.
    pub fn parse(s: &str) -> Result<Self, IngestError> {
        let config: Self = toml::de::from_str(s).map_err(|e| IngestError::Config {
            message: e.to_string(),
        })?;
        if config.batch_size == 0 {
            return Err(IngestError::Config {
                message: "batch_size must be greater than 0".to_string(),
            });
        }
        Ok(config)
    }

    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the file cannot be read, or
    /// [`IngestError::Config`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let text = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Reads settings from the file named by [`CONFIG_ENV`], or returns the
    /// defaults when the variable is unset.
    ///
    /// # Errors
    ///
    /// Same as [`IngestConfig::load`].
    pub fn from_env() -> Result<Self, IngestError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                log::info!("Loading ingestion settings from {path}");
                Self::load(Path::new(path.trim()))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Decimation limits derived from these settings.
    #[must_use]
    pub const fn limits(&self) -> DecimationLimits {
        DecimationLimits {
            polygon_point_limit: self.polygon_point_limit,
            sub_polygon_limit: self.sub_polygon_limit,
            sub_polygon_point_limit: self.sub_polygon_point_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = IngestConfig::parse("").unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.limits(), DecimationLimits::default());
        assert_eq!(config.default_srid, 2154);
        assert_eq!(config.output_srid, 4326);
    }

    #[test]
    fn partial_files_override_only_their_keys() {
        let config = IngestConfig::parse("sub_polygon_limit = 0\nbatch_size = 250\n").unwrap();
        assert_eq!(config.sub_polygon_limit, 0);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.polygon_point_limit, 1000);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            IngestConfig::parse("polygon_point_limit = \"many\""),
            Err(IngestError::Config { .. })
        ));
        assert!(matches!(
            IngestConfig::parse("batch_size = 0"),
            Err(IngestError::Config { .. })
        ));
    }
}
