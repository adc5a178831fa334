//! Dataset versions.

use cartoforge_database_models::{DatasetVersionStore, StoreError};
use cartoforge_dataset_models::{DatasetVersion, IngestionStatus};
use duckdb::params;

use crate::features::parse_tag;
use crate::{DbError, DuckDbStore};

impl DuckDbStore {
    fn insert_version(&self, version: &DatasetVersion) -> Result<DatasetVersion, DbError> {
        let conn = self.conn()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dataset_versions WHERE dataset_name = ? AND version_number = ?",
            params![version.dataset_name, version.version_number],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(StoreError::Conflict {
                message: format!(
                    "dataset {} already has version {}",
                    version.dataset_name, version.version_number
                ),
            }
            .into());
        }

        let id: i64 = conn.query_row(
            "INSERT INTO dataset_versions
                (dataset_name, version_number, archive_path, encoding, ingestion_status,
                 task_id, error)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
            params![
                version.dataset_name,
                version.version_number,
                version.archive_path,
                version.encoding.as_ref(),
                version.ingestion_status.as_ref(),
                version.task_id,
                version.error,
            ],
            |row| row.get(0),
        )?;
        log::info!(
            "Registered {} version {} (id {id})",
            version.dataset_name,
            version.version_number
        );

        Ok(DatasetVersion {
            id: Some(id),
            ..version.clone()
        })
    }

    fn load_version(&self, id: i64) -> Result<Option<DatasetVersion>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT dataset_name, version_number, archive_path, encoding, ingestion_status,
                    task_id, error
             FROM dataset_versions
             WHERE id = ?",
        )?;
        let mut rows = stmt.query([id])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let encoding: String = row.get(3)?;
        let status: String = row.get(4)?;
        Ok(Some(DatasetVersion {
            id: Some(id),
            dataset_name: row.get(0)?,
            version_number: row.get(1)?,
            archive_path: row.get(2)?,
            encoding: parse_tag(&encoding, "encoding")?,
            ingestion_status: parse_tag(&status, "ingestion status")?,
            task_id: row.get(5)?,
            error: row.get(6)?,
        }))
    }

    fn write_ingestion(
        &self,
        id: i64,
        status: IngestionStatus,
        task_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE dataset_versions SET ingestion_status = ?, task_id = ?, error = ? WHERE id = ?",
            params![status.as_ref(), task_id, error, id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("dataset version", id).into());
        }
        Ok(())
    }
}

impl DatasetVersionStore for DuckDbStore {
    fn create_version(&self, version: &DatasetVersion) -> Result<DatasetVersion, StoreError> {
        Ok(self.insert_version(version)?)
    }

    fn get_version(&self, id: i64) -> Result<Option<DatasetVersion>, StoreError> {
        Ok(self.load_version(id)?)
    }

    fn update_ingestion(
        &self,
        id: i64,
        status: IngestionStatus,
        task_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(self.write_ingestion(id, status, task_id, error)?)
    }
}
