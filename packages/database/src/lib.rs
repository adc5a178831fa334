#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage for datasets, features, map templates, and renders.
//!
//! A single [`DuckDbStore`] implements every repository trait from
//! `cartoforge_database_models`. Geometries are stored as `GeoJSON` text
//! and feature attributes as JSON objects; multi-statement writes run in a
//! transaction so readers never see them half-applied.

mod datasets;
mod features;
pub mod paths;
mod schema;
mod templates;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cartoforge_database_models::StoreError;
use duckdb::Connection;

/// Number of rows per multi-row INSERT.
const CHUNK_SIZE: usize = 5_000;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// A repository-level error, usually raised by a caller's feature
    /// stream.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored geometry could not be decoded.
    #[error("Geometry error: {0}")]
    Geometry(#[from] cartoforge_geometry::GeometryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Database connection lock poisoned")]
    Poisoned,

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl From<DbError> for StoreError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::Store(e) => e,
            DbError::Json(e) => Self::Json(e),
            DbError::Io(e) => Self::Io(e),
            DbError::Geometry(e) => Self::Conversion {
                message: e.to_string(),
            },
            DbError::Conversion { message } => Self::Conversion { message },
            DbError::DuckDb(_) | DbError::Poisoned => Self::Database {
                message: error.to_string(),
            },
        }
    }
}

/// Repository implementation on a single `DuckDB` connection.
///
/// The connection is guarded by a mutex; every operation holds it for its
/// whole duration.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore").finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Opens (or creates) the database at `path` and ensures the schema
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "SET threads = 4;
             SET memory_limit = '512MB';",
        )?;

        log::debug!("Opened database at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens the database at [`paths::database_path`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&paths::database_path())
    }

    /// Opens a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        schema::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }
}

/// Runs `f` inside a transaction, rolling back when it fails.
fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, DbError>,
) -> Result<T, DbError> {
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::error!("Rollback failed after {e}: {rollback}");
            }
            Err(e)
        }
    }
}

/// Converts a stored `BIGINT` count.
fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
