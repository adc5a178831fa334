//! Table definitions.
//!
//! Feature ids come from `features_id_seq`, bound explicitly on insert
//! rather than as a column default so the sequence can be recreated once
//! the table is empty.

use duckdb::Connection;

use crate::DbError;

pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE SEQUENCE IF NOT EXISTS dataset_versions_id_seq START 1;
        CREATE TABLE IF NOT EXISTS dataset_versions (
            id BIGINT PRIMARY KEY DEFAULT nextval('dataset_versions_id_seq'),
            dataset_name TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            archive_path TEXT NOT NULL,
            encoding TEXT NOT NULL,
            ingestion_status TEXT NOT NULL,
            task_id TEXT,
            error TEXT
        );

        CREATE SEQUENCE IF NOT EXISTS dataset_layers_id_seq START 1;
        CREATE TABLE IF NOT EXISTS dataset_layers (
            id BIGINT PRIMARY KEY DEFAULT nextval('dataset_layers_id_seq'),
            dataset_version_id BIGINT NOT NULL,
            name TEXT NOT NULL,
            srid INTEGER NOT NULL,
            bounding_box TEXT,
            feature_count BIGINT NOT NULL DEFAULT 0,
            geometry_type TEXT NOT NULL,
            generation_status TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS layer_fields (
            layer_id BIGINT NOT NULL,
            ordinal INTEGER NOT NULL,
            name TEXT NOT NULL,
            field_type TEXT NOT NULL,
            max_length INTEGER NOT NULL,
            decimals INTEGER NOT NULL
        );

        CREATE SEQUENCE IF NOT EXISTS features_id_seq START 1;
        CREATE TABLE IF NOT EXISTS features (
            id BIGINT NOT NULL,
            layer_id BIGINT NOT NULL,
            geometry TEXT NOT NULL,
            properties TEXT NOT NULL
        );

        CREATE SEQUENCE IF NOT EXISTS map_templates_id_seq START 1;
        CREATE TABLE IF NOT EXISTS map_templates (
            id BIGINT PRIMARY KEY DEFAULT nextval('map_templates_id_seq'),
            name TEXT NOT NULL,
            zoom_start BIGINT NOT NULL,
            layer_control BOOLEAN NOT NULL,
            zoom_control BOOLEAN NOT NULL,
            center_lon DOUBLE NOT NULL,
            center_lat DOUBLE NOT NULL,
            tiles TEXT NOT NULL,
            features TEXT NOT NULL,
            generation_status TEXT NOT NULL,
            task_id TEXT,
            regenerate BOOLEAN NOT NULL DEFAULT FALSE,
            last_error TEXT
        );

        CREATE SEQUENCE IF NOT EXISTS map_renders_id_seq START 1;
        CREATE TABLE IF NOT EXISTS map_renders (
            id BIGINT PRIMARY KEY DEFAULT nextval('map_renders_id_seq'),
            template_id BIGINT NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            embed_html TEXT NOT NULL,
            full_html TEXT NOT NULL,
            generated_at TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Restarts the feature id sequence. Only valid while `features` is
/// empty.
pub fn reset_feature_sequence(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "DROP SEQUENCE IF EXISTS features_id_seq;
         CREATE SEQUENCE features_id_seq START 1;",
    )?;
    Ok(())
}
