#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the `DuckDB` data directory.
//!
//! Everything lives under [`data_dir`], which is `CARTOFORGE_DATA_DIR` when
//! set and the project root's `data/` directory otherwise.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CARTOFORGE_DATA_DIR";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
#[must_use]
pub fn project_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest
        .ancestors()
        .nth(2)
        .unwrap_or(manifest)
        .to_path_buf()
}

/// Returns the data directory.
#[must_use]
pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .filter(|dir| !dir.is_empty())
        .map_or_else(|| project_root().join("data"), PathBuf::from)
}

/// Returns the path of the main `DuckDB` file.
#[must_use]
pub fn database_path() -> PathBuf {
    data_dir().join("cartoforge.duckdb")
}

/// Returns the directory uploaded dataset archives are extracted into.
#[must_use]
pub fn datasets_dir() -> PathBuf {
    data_dir().join("datasets")
}

/// Returns the directory exported renders are written to.
#[must_use]
pub fn renders_dir() -> PathBuf {
    data_dir().join("renders")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
