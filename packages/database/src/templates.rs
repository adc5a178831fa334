//! Map templates, their generation state, and their renders.
//!
//! A template's tiles and feature tree are stored as JSON documents next to
//! its scalar columns. Generation transitions are single conditional
//! `UPDATE`s so two workers can never both win the same template.

use cartoforge_database_models::{
    RenderRecord, RenderStore, StoreError, TemplateRecord, TemplateRepository, TemplateState,
};
use cartoforge_dataset_models::GenerationStatus;
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};

use crate::features::parse_tag;
use crate::{DbError, DuckDbStore, in_transaction};

const TEMPLATE_COLUMNS: &str = "id, name, zoom_start, layer_control, zoom_control, center_lon, \
                                center_lat, tiles, features, generation_status, task_id, \
                                regenerate, last_error";

const STATE_COLUMNS: &str = "id, name, generation_status, task_id, regenerate, last_error";

const RENDER_COLUMNS: &str = "id, template_id, name, slug, embed_html, full_html, generated_at";

fn query_templates(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn duckdb::ToSql],
) -> Result<Vec<TemplateRecord>, DbError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM map_templates WHERE {where_clause} ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params)?;

    let mut templates = Vec::new();
    while let Some(row) = rows.next()? {
        let tiles: String = row.get(7)?;
        let features: String = row.get(8)?;
        let status: String = row.get(9)?;
        templates.push(TemplateRecord {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            zoom_start: row.get(2)?,
            layer_control: row.get(3)?,
            zoom_control: row.get(4)?,
            center_lon: row.get(5)?,
            center_lat: row.get(6)?,
            tiles: serde_json::from_str(&tiles)?,
            features: serde_json::from_str(&features)?,
            generation_status: parse_tag(&status, "generation status")?,
            task_id: row.get(10)?,
            regenerate: row.get(11)?,
            last_error: row.get(12)?,
        });
    }
    Ok(templates)
}

fn query_states(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn duckdb::ToSql],
) -> Result<Vec<TemplateState>, DbError> {
    let sql = format!("SELECT {STATE_COLUMNS} FROM map_templates WHERE {where_clause} ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params)?;

    let mut states = Vec::new();
    while let Some(row) = rows.next()? {
        let status: String = row.get(2)?;
        states.push(TemplateState {
            id: row.get(0)?,
            name: row.get(1)?,
            generation_status: parse_tag(&status, "generation status")?,
            task_id: row.get(3)?,
            regenerate: row.get(4)?,
            last_error: row.get(5)?,
        });
    }
    Ok(states)
}

fn template_exists(conn: &Connection, id: i64) -> Result<bool, DbError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM map_templates WHERE id = ?",
        [id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Ends the generation owned by `task_id`. Returns `false` when the
/// template is not RUNNING under that task.
fn finish_owned(
    conn: &Connection,
    id: i64,
    task_id: &str,
    status: GenerationStatus,
    error: Option<&str>,
) -> Result<bool, DbError> {
    let updated = conn.execute(
        "UPDATE map_templates
         SET generation_status = ?, task_id = NULL, regenerate = FALSE, last_error = ?
         WHERE id = ? AND task_id = ? AND generation_status = ?",
        params![
            status.as_ref(),
            error,
            id,
            task_id,
            GenerationStatus::Running.as_ref(),
        ],
    )?;
    Ok(updated > 0)
}

/// Inserts a render, or overwrites it when `id` is set.
fn upsert_render(conn: &Connection, render: &RenderRecord) -> Result<i64, DbError> {
    let clash: i64 = conn.query_row(
        "SELECT COUNT(*) FROM map_renders WHERE name = ? AND id IS DISTINCT FROM ?",
        params![render.name, render.id],
        |row| row.get(0),
    )?;
    if clash > 0 {
        return Err(StoreError::Conflict {
            message: format!("render name {} is already used", render.name),
        }
        .into());
    }

    let generated_at = render.generated_at.to_rfc3339();
    if let Some(id) = render.id {
        let updated = conn.execute(
            "UPDATE map_renders
             SET template_id = ?, name = ?, slug = ?, embed_html = ?, full_html = ?,
                 generated_at = ?
             WHERE id = ?",
            params![
                render.template_id,
                render.name,
                render.slug,
                render.embed_html,
                render.full_html,
                generated_at,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("render", id).into());
        }
        return Ok(id);
    }

    Ok(conn.query_row(
        "INSERT INTO map_renders
            (template_id, name, slug, embed_html, full_html, generated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id",
        params![
            render.template_id,
            render.name,
            render.slug,
            render.embed_html,
            render.full_html,
            generated_at,
        ],
        |row| row.get(0),
    )?)
}

fn parse_generated_at(text: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("invalid render timestamp {text:?}: {e}"),
        })
}

fn query_renders(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn duckdb::ToSql],
) -> Result<Vec<RenderRecord>, DbError> {
    let sql = format!("SELECT {RENDER_COLUMNS} FROM map_renders WHERE {where_clause} ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params)?;

    let mut renders = Vec::new();
    while let Some(row) = rows.next()? {
        let generated_at: String = row.get(6)?;
        renders.push(RenderRecord {
            id: Some(row.get(0)?),
            template_id: row.get(1)?,
            name: row.get(2)?,
            slug: row.get(3)?,
            embed_html: row.get(4)?,
            full_html: row.get(5)?,
            generated_at: parse_generated_at(&generated_at)?,
        });
    }
    Ok(renders)
}

impl DuckDbStore {
    fn write_template(&self, template: &TemplateRecord) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let clash: i64 = conn.query_row(
            "SELECT COUNT(*) FROM map_templates WHERE name = ? AND id IS DISTINCT FROM ?",
            params![template.name, template.id],
            |row| row.get(0),
        )?;
        if clash > 0 {
            return Err(StoreError::Conflict {
                message: format!("template name {} is already used", template.name),
            }
            .into());
        }

        let tiles = serde_json::to_string(&template.tiles)?;
        let features = serde_json::to_string(&template.features)?;

        if let Some(id) = template.id {
            let updated = conn.execute(
                "UPDATE map_templates
                 SET name = ?, zoom_start = ?, layer_control = ?, zoom_control = ?,
                     center_lon = ?, center_lat = ?, tiles = ?, features = ?
                 WHERE id = ?",
                params![
                    template.name,
                    template.zoom_start,
                    template.layer_control,
                    template.zoom_control,
                    template.center_lon,
                    template.center_lat,
                    tiles,
                    features,
                    id,
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::not_found("template", id).into());
            }
            return Ok(id);
        }

        let id: i64 = conn.query_row(
            "INSERT INTO map_templates
                (name, zoom_start, layer_control, zoom_control, center_lon, center_lat,
                 tiles, features, generation_status, task_id, regenerate, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
            params![
                template.name,
                template.zoom_start,
                template.layer_control,
                template.zoom_control,
                template.center_lon,
                template.center_lat,
                tiles,
                features,
                template.generation_status.as_ref(),
                template.task_id,
                template.regenerate,
                template.last_error,
            ],
            |row| row.get(0),
        )?;
        log::info!("Created template {} (id {id})", template.name);
        Ok(id)
    }

    fn begin_generation(&self, id: i64, task_id: &str) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE map_templates
             SET generation_status = ?, task_id = ?, regenerate = FALSE, last_error = NULL
             WHERE id = ? AND generation_status = ?",
            params![
                GenerationStatus::Running.as_ref(),
                task_id,
                id,
                GenerationStatus::Pending.as_ref(),
            ],
        )?;
        if updated == 0 && !template_exists(&conn, id)? {
            return Err(StoreError::not_found("template", id).into());
        }
        Ok(updated > 0)
    }

    fn end_generation(
        &self,
        id: i64,
        task_id: &str,
        status: GenerationStatus,
        error: Option<&str>,
    ) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let updated = finish_owned(&conn, id, task_id, status, error)?;
        if !updated && !template_exists(&conn, id)? {
            return Err(StoreError::not_found("template", id).into());
        }
        Ok(updated)
    }

    fn publish_render(
        &self,
        id: i64,
        task_id: &str,
        render: &RenderRecord,
    ) -> Result<Option<i64>, DbError> {
        let conn = self.conn()?;
        let published = in_transaction(&conn, |tx| {
            let owned: i64 = tx.query_row(
                "SELECT COUNT(*) FROM map_templates
                 WHERE id = ? AND task_id = ? AND generation_status = ?",
                params![id, task_id, GenerationStatus::Running.as_ref()],
                |row| row.get(0),
            )?;
            if owned == 0 {
                return Ok(None);
            }
            let render_id = upsert_render(tx, render)?;
            finish_owned(tx, id, task_id, GenerationStatus::Completed, None)?;
            Ok(Some(render_id))
        })?;
        if published.is_none() && !template_exists(&conn, id)? {
            return Err(StoreError::not_found("template", id).into());
        }
        Ok(published)
    }

    fn flag_regeneration(&self, id: i64) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE map_templates
             SET generation_status = ?, regenerate = TRUE
             WHERE id = ? AND generation_status <> ?",
            params![
                GenerationStatus::Pending.as_ref(),
                id,
                GenerationStatus::Running.as_ref(),
            ],
        )?;
        if updated == 0 && !template_exists(&conn, id)? {
            return Err(StoreError::not_found("template", id).into());
        }
        Ok(updated > 0)
    }

    fn write_render(&self, render: &RenderRecord) -> Result<i64, DbError> {
        upsert_render(&*self.conn()?, render)
    }
}

impl TemplateRepository for DuckDbStore {
    fn save_template(&self, template: &TemplateRecord) -> Result<i64, StoreError> {
        Ok(self.write_template(template)?)
    }

    fn get_template(&self, id: i64) -> Result<Option<TemplateRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(query_templates(&conn, "id = ?", params![id])?.into_iter().next())
    }

    fn find_template_by_name(&self, name: &str) -> Result<Option<TemplateRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(query_templates(&conn, "name = ?", params![name])?
            .into_iter()
            .next())
    }

    fn templates_with_status(
        &self,
        status: GenerationStatus,
    ) -> Result<Vec<TemplateState>, StoreError> {
        let conn = self.conn()?;
        Ok(query_states(
            &conn,
            "generation_status = ?",
            params![status.as_ref()],
        )?)
    }

    fn template_state(&self, id: i64) -> Result<Option<TemplateState>, StoreError> {
        let conn = self.conn()?;
        Ok(query_states(&conn, "id = ?", params![id])?.into_iter().next())
    }

    fn try_begin_generation(&self, id: i64, task_id: &str) -> Result<bool, StoreError> {
        Ok(self.begin_generation(id, task_id)?)
    }

    fn finish_generation(
        &self,
        id: i64,
        task_id: &str,
        status: GenerationStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(self.end_generation(id, task_id, status, error)?)
    }

    fn complete_generation(
        &self,
        id: i64,
        task_id: &str,
        render: &RenderRecord,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self.publish_render(id, task_id, render)?)
    }

    fn request_regeneration(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.flag_regeneration(id)?)
    }
}

impl RenderStore for DuckDbStore {
    fn render_for_template(&self, template_id: i64) -> Result<Option<RenderRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(query_renders(&conn, "template_id = ?", params![template_id])?
            .into_iter()
            .next())
    }

    fn render_name_taken(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(!query_renders(&conn, "name = ?", params![name])?.is_empty())
    }

    fn save_render(&self, render: &RenderRecord) -> Result<i64, StoreError> {
        Ok(self.write_render(render)?)
    }
}
