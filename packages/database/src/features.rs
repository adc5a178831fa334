//! Dataset layers, their fields, and their features.

use std::collections::BTreeSet;
use std::str::FromStr;

use cartoforge_database_models::{
    FeatureFilter, FeatureStore, FeatureStream, LayerStore, StoreError, check_geometry_type,
};
use cartoforge_dataset_models::{
    AttributeValue, Attributes, BoundingBox, DatasetLayer, DatasetLayerField, GenerationStatus,
    GeographicFeature, GeometryType,
};
use cartoforge_geometry::codec::{from_geojson, to_geojson};
use duckdb::{Connection, params, params_from_iter};

use crate::{CHUNK_SIZE, DbError, DuckDbStore, in_transaction, schema, to_u64};

const LAYER_COLUMNS: &str = "id, dataset_version_id, name, srid, bounding_box, feature_count, \
                             geometry_type, generation_status";

/// Parses a text tag stored for a strum enum.
pub(crate) fn parse_tag<T>(value: &str, what: &str) -> Result<T, DbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(value).map_err(|e| DbError::Conversion {
        message: format!("invalid {what} {value:?}: {e}"),
    })
}

fn encode_bbox(bbox: BoundingBox) -> String {
    to_geojson(&geo::Geometry::Polygon(bbox.to_polygon()))
}

fn decode_bbox(text: &str) -> Result<BoundingBox, DbError> {
    BoundingBox::of(&from_geojson(text)?).ok_or_else(|| DbError::Conversion {
        message: "empty bounding box polygon".to_string(),
    })
}

fn query_layers(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn duckdb::ToSql],
) -> Result<Vec<DatasetLayer>, DbError> {
    let sql =
        format!("SELECT {LAYER_COLUMNS} FROM dataset_layers WHERE {where_clause} ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params)?;

    let mut layers = Vec::new();
    while let Some(row) = rows.next()? {
        let bbox: Option<String> = row.get(4)?;
        let geometry_type: String = row.get(6)?;
        let status: String = row.get(7)?;
        layers.push(DatasetLayer {
            id: Some(row.get(0)?),
            dataset_version_id: row.get(1)?,
            name: row.get(2)?,
            srid: row.get(3)?,
            bounding_box: bbox.as_deref().map(decode_bbox).transpose()?,
            feature_count: to_u64(row.get(5)?),
            geometry_type: parse_tag(&geometry_type, "geometry type")?,
            fields: Vec::new(),
            generation_status: parse_tag(&status, "generation status")?,
        });
    }

    for layer in &mut layers {
        if let Some(id) = layer.id {
            layer.fields = load_fields(conn, id)?;
        }
    }
    Ok(layers)
}

fn load_layer(conn: &Connection, id: i64) -> Result<Option<DatasetLayer>, DbError> {
    Ok(query_layers(conn, "id = ?", params![id])?.into_iter().next())
}

fn find_layer_id(
    conn: &Connection,
    dataset_version_id: i64,
    name: &str,
) -> Result<Option<i64>, DbError> {
    let result = conn.query_row(
        "SELECT id FROM dataset_layers WHERE dataset_version_id = ? AND name = ?",
        params![dataset_version_id, name],
        |row| row.get(0),
    );
    match result {
        Ok(id) => Ok(Some(id)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

fn insert_layer(conn: &Connection, layer: &DatasetLayer) -> Result<i64, DbError> {
    Ok(conn.query_row(
        "INSERT INTO dataset_layers
            (dataset_version_id, name, srid, geometry_type, generation_status)
         VALUES (?, ?, ?, ?, ?)
         RETURNING id",
        params![
            layer.dataset_version_id,
            layer.name,
            layer.srid,
            layer.geometry_type.as_ref(),
            layer.generation_status.as_ref(),
        ],
        |row| row.get(0),
    )?)
}

fn load_fields(conn: &Connection, layer_id: i64) -> Result<Vec<DatasetLayerField>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT name, field_type, max_length, decimals
         FROM layer_fields
         WHERE layer_id = ?
         ORDER BY ordinal",
    )?;
    let mut rows = stmt.query([layer_id])?;

    let mut fields = Vec::new();
    while let Some(row) = rows.next()? {
        let field_type: String = row.get(1)?;
        fields.push(DatasetLayerField {
            name: row.get(0)?,
            field_type: parse_tag(&field_type, "field type")?,
            max_length: row.get(2)?,
            precision: row.get(3)?,
        });
    }
    Ok(fields)
}

fn write_fields(
    conn: &Connection,
    layer_id: i64,
    fields: &[DatasetLayerField],
) -> Result<(), DbError> {
    conn.execute("DELETE FROM layer_fields WHERE layer_id = ?", [layer_id])?;

    let mut stmt = conn.prepare(
        "INSERT INTO layer_fields (layer_id, ordinal, name, field_type, max_length, decimals)
         VALUES (?, ?, ?, ?, ?, ?)",
    )?;
    for (ordinal, field) in (0_i64..).zip(fields) {
        stmt.execute(params![
            layer_id,
            ordinal,
            field.name,
            field.field_type.as_ref(),
            field.max_length,
            field.precision,
        ])?;
    }
    Ok(())
}

fn insert_feature_chunk(
    conn: &Connection,
    layer_id: i64,
    chunk: &[(String, String)],
) -> Result<(), DbError> {
    let mut sql = String::from("INSERT INTO features (id, layer_id, geometry, properties) VALUES ");
    for i in 0..chunk.len() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str("(nextval('features_id_seq'), ?, ?, ?)");
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut param_idx = 1usize;
    for (geometry, properties) in chunk {
        stmt.raw_bind_parameter(param_idx, layer_id)?;
        stmt.raw_bind_parameter(param_idx + 1, geometry)?;
        stmt.raw_bind_parameter(param_idx + 2, properties)?;
        param_idx += 3;
    }
    stmt.raw_execute()?;
    Ok(())
}

/// Deletes a layer's features and streams the new set in, in chunks of
/// [`CHUNK_SIZE`]. Must run inside a transaction.
fn write_features(
    conn: &Connection,
    layer_id: i64,
    geometry_type: GeometryType,
    features: &mut FeatureStream<'_>,
) -> Result<(u64, Option<BoundingBox>), DbError> {
    conn.execute("DELETE FROM features WHERE layer_id = ?", [layer_id])?;

    let mut buffer = Vec::with_capacity(CHUNK_SIZE);
    let mut count = 0u64;
    let mut bbox: Option<BoundingBox> = None;

    for feature in features {
        let feature = feature?;
        check_geometry_type(geometry_type, &feature)?;
        if let Some(envelope) = BoundingBox::of(&feature.geometry) {
            bbox = Some(bbox.map_or(envelope, |b| b.union(envelope)));
        }
        buffer.push((
            to_geojson(&feature.geometry),
            serde_json::to_string(&feature.attributes)?,
        ));
        count += 1;

        if buffer.len() == CHUNK_SIZE {
            insert_feature_chunk(conn, layer_id, &buffer)?;
            buffer.clear();
            log::debug!("Layer {layer_id}: {count} features written");
        }
    }
    if !buffer.is_empty() {
        insert_feature_chunk(conn, layer_id, &buffer)?;
    }

    conn.execute(
        "UPDATE dataset_layers SET feature_count = ?, bounding_box = ? WHERE id = ?",
        params![
            i64::try_from(count).unwrap_or(i64::MAX),
            bbox.map(encode_bbox),
            layer_id,
        ],
    )?;

    Ok((count, bbox))
}

/// Builds the `WHERE` clause and parameters selecting the features in
/// `filter`.
fn feature_scope(filter: &FeatureFilter) -> (String, Vec<i64>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(layer_id) = filter.layer_id {
        clauses.push("layer_id = ?");
        params.push(layer_id);
    }
    if let Some(version_id) = filter.dataset_version_id {
        clauses.push("layer_id IN (SELECT id FROM dataset_layers WHERE dataset_version_id = ?)");
        params.push(version_id);
    }
    if clauses.is_empty() {
        ("TRUE".to_string(), params)
    } else {
        (clauses.join(" AND "), params)
    }
}

fn count_features(conn: &Connection, filter: &FeatureFilter) -> Result<u64, DbError> {
    let (scope, params) = feature_scope(filter);
    let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM features WHERE {scope}"))?;
    let count: i64 = stmt.query_row(params_from_iter(params.iter()), |row| row.get(0))?;
    Ok(to_u64(count))
}

fn temporal_fields(conn: &Connection, layer_id: i64) -> Result<BTreeSet<String>, DbError> {
    Ok(load_fields(conn, layer_id)?
        .into_iter()
        .filter(|field| field.field_type.is_temporal())
        .map(|field| field.name)
        .collect())
}

/// Restores `Date` values, which JSON storage flattens to strings.
fn retype_attributes(attributes: &mut Attributes, temporal: &BTreeSet<String>) {
    for (key, value) in attributes.values_mut() {
        if temporal.contains(key)
            && let AttributeValue::String(text) = value
        {
            *value = AttributeValue::Date(std::mem::take(text));
        }
    }
}

impl DuckDbStore {
    fn replace_layer_features(
        &self,
        layer_id: i64,
        features: &mut FeatureStream<'_>,
    ) -> Result<u64, DbError> {
        let conn = self.conn()?;
        let layer = load_layer(&conn, layer_id)?
            .ok_or_else(|| StoreError::not_found("layer", layer_id))?;

        let (count, _) = in_transaction(&conn, |conn| {
            write_features(conn, layer_id, layer.geometry_type, features)
        })?;
        log::info!("Replaced features of layer {} ({count} features)", layer.name);
        Ok(count)
    }

    fn clear_features(&self, filter: &FeatureFilter) -> Result<u64, DbError> {
        let conn = self.conn()?;
        in_transaction(&conn, |conn| {
            let (scope, params) = feature_scope(filter);
            conn.execute(
                &format!(
                    "UPDATE dataset_layers SET feature_count = 0, bounding_box = NULL
                     WHERE id IN (SELECT DISTINCT layer_id FROM features WHERE {scope})"
                ),
                params_from_iter(params.iter()),
            )?;
            let deleted = conn.execute(
                &format!("DELETE FROM features WHERE {scope}"),
                params_from_iter(params.iter()),
            )?;

            if count_features(conn, &FeatureFilter::all())? == 0 {
                log::debug!("Feature table is empty, restarting features_id_seq");
                schema::reset_feature_sequence(conn)?;
            }
            Ok(deleted as u64)
        })
    }

    fn load_features(&self, layer_id: i64) -> Result<Vec<GeographicFeature>, DbError> {
        let conn = self.conn()?;
        let temporal = temporal_fields(&conn, layer_id)?;

        let mut stmt = conn.prepare(
            "SELECT id, geometry, properties FROM features WHERE layer_id = ? ORDER BY id",
        )?;
        let mut rows = stmt.query([layer_id])?;

        let mut features = Vec::new();
        while let Some(row) = rows.next()? {
            let geometry: String = row.get(1)?;
            let properties: String = row.get(2)?;
            let mut attributes: Attributes = serde_json::from_str(&properties)?;
            retype_attributes(&mut attributes, &temporal);
            features.push(GeographicFeature {
                id: Some(row.get(0)?),
                geometry: from_geojson(&geometry)?,
                attributes,
            });
        }
        Ok(features)
    }

    fn ensure_layer_row(&self, layer: &DatasetLayer) -> Result<DatasetLayer, DbError> {
        let conn = self.conn()?;
        let id = match find_layer_id(&conn, layer.dataset_version_id, &layer.name)? {
            Some(id) => id,
            None => in_transaction(&conn, |conn| {
                let id = insert_layer(conn, layer)?;
                write_fields(conn, id, &layer.fields)?;
                Ok(id)
            })?,
        };
        load_layer(&conn, id)?.ok_or_else(|| StoreError::not_found("layer", id).into())
    }

    fn replace_layer_row(
        &self,
        layer: &DatasetLayer,
        features: &mut FeatureStream<'_>,
    ) -> Result<DatasetLayer, DbError> {
        let conn = self.conn()?;
        let stored = in_transaction(&conn, |conn| {
            let id = match find_layer_id(conn, layer.dataset_version_id, &layer.name)? {
                Some(id) => {
                    conn.execute(
                        "UPDATE dataset_layers
                         SET srid = ?, geometry_type = ?, generation_status = ?
                         WHERE id = ?",
                        params![
                            layer.srid,
                            layer.geometry_type.as_ref(),
                            layer.generation_status.as_ref(),
                            id,
                        ],
                    )?;
                    id
                }
                None => insert_layer(conn, layer)?,
            };
            write_fields(conn, id, &layer.fields)?;
            let (count, bbox) = write_features(conn, id, layer.geometry_type, features)?;
            Ok(DatasetLayer {
                id: Some(id),
                bounding_box: bbox,
                feature_count: count,
                ..layer.clone()
            })
        })?;

        log::info!(
            "Stored layer {} ({} features, {} fields)",
            stored.name,
            stored.feature_count,
            stored.fields.len()
        );
        Ok(stored)
    }

    fn update_layer_status(&self, id: i64, status: GenerationStatus) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE dataset_layers SET generation_status = ? WHERE id = ?",
            params![status.as_ref(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("layer", id).into());
        }
        Ok(())
    }
}

impl FeatureStore for DuckDbStore {
    fn replace_features(
        &self,
        layer_id: i64,
        features: &mut FeatureStream<'_>,
    ) -> Result<u64, StoreError> {
        Ok(self.replace_layer_features(layer_id, features)?)
    }

    fn count(&self, filter: &FeatureFilter) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        Ok(count_features(&conn, filter)?)
    }

    fn clear(&self, filter: &FeatureFilter) -> Result<u64, StoreError> {
        Ok(self.clear_features(filter)?)
    }

    fn features_for_layer(&self, layer_id: i64) -> Result<Vec<GeographicFeature>, StoreError> {
        Ok(self.load_features(layer_id)?)
    }
}

impl LayerStore for DuckDbStore {
    fn ensure_layer(&self, layer: &DatasetLayer) -> Result<DatasetLayer, StoreError> {
        Ok(self.ensure_layer_row(layer)?)
    }

    fn replace_layer(
        &self,
        layer: &DatasetLayer,
        features: &mut FeatureStream<'_>,
    ) -> Result<DatasetLayer, StoreError> {
        Ok(self.replace_layer_row(layer, features)?)
    }

    fn get_layer(&self, id: i64) -> Result<Option<DatasetLayer>, StoreError> {
        let conn = self.conn()?;
        Ok(load_layer(&conn, id)?)
    }

    fn layers_for_version(&self, dataset_version_id: i64) -> Result<Vec<DatasetLayer>, StoreError> {
        let conn = self.conn()?;
        Ok(query_layers(
            &conn,
            "dataset_version_id = ?",
            params![dataset_version_id],
        )?)
    }

    fn set_layer_status(&self, id: i64, status: GenerationStatus) -> Result<(), StoreError> {
        Ok(self.update_layer_status(id, status)?)
    }
}

#[cfg(test)]
mod tests {
    use cartoforge_dataset_models::FieldType;

    use super::*;

    fn field(name: &str, field_type: FieldType) -> DatasetLayerField {
        DatasetLayerField {
            name: name.to_string(),
            field_type,
            max_length: 10,
            precision: 0,
        }
    }

    fn layer(version_id: i64, name: &str) -> DatasetLayer {
        DatasetLayer {
            id: None,
            dataset_version_id: version_id,
            name: name.to_string(),
            srid: 2154,
            bounding_box: None,
            feature_count: 0,
            geometry_type: GeometryType::Point,
            fields: vec![
                field("name", FieldType::String),
                field("planted", FieldType::Date),
            ],
            generation_status: GenerationStatus::Completed,
        }
    }

    fn tree(x: f64, y: f64, planted: &str) -> GeographicFeature {
        let mut attributes = Attributes::new();
        attributes.insert("name", "oak");
        attributes.insert("planted", AttributeValue::Date(planted.to_string()));
        GeographicFeature::new(geo::Geometry::Point(geo::Point::new(x, y)), attributes)
    }

    fn stream(
        features: Vec<GeographicFeature>,
    ) -> impl Iterator<Item = Result<GeographicFeature, StoreError>> {
        features.into_iter().map(Ok)
    }

    #[test]
    fn layers_round_trip_with_fields_and_envelope() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let stored = store
            .replace_layer(
                &layer(1, "trees"),
                &mut stream(vec![tree(6.1, 49.1, "2020-03-01"), tree(6.3, 49.0, "2021-04-02")]),
            )
            .unwrap();

        let loaded = store.get_layer(stored.id.unwrap()).unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.feature_count, 2);
        let bbox = loaded.bounding_box.unwrap();
        assert!((bbox.min_x - 6.1).abs() < 1e-9);
        assert!((bbox.max_y - 49.1).abs() < 1e-9);
        assert_eq!(loaded.fields[1].field_type, FieldType::Date);
    }

    #[test]
    fn date_attributes_are_restored_from_field_types() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let stored = store
            .replace_layer(&layer(1, "trees"), &mut stream(vec![tree(6.1, 49.1, "2020-03-01")]))
            .unwrap();

        let features = store.features_for_layer(stored.id.unwrap()).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0].attributes.get("planted"),
            Some(&AttributeValue::Date("2020-03-01".to_string()))
        );
        assert_eq!(
            features[0].attributes.get("name"),
            Some(&AttributeValue::String("oak".to_string()))
        );
    }

    #[test]
    fn aborted_replace_rolls_back() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let stored = store
            .replace_layer(&layer(1, "trees"), &mut stream(vec![tree(6.1, 49.1, "2020-03-01")]))
            .unwrap();
        let id = stored.id.unwrap();

        let mut failing = vec![
            Ok(tree(1.0, 1.0, "2022-01-01")),
            Ok(tree(2.0, 2.0, "2022-01-01")),
            Err(StoreError::Aborted {
                message: "unexpected end of record".to_string(),
            }),
        ]
        .into_iter();
        assert!(matches!(
            store.replace_features(id, &mut failing),
            Err(StoreError::Aborted { .. })
        ));

        let features = store.features_for_layer(id).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0].geometry,
            geo::Geometry::Point(geo::Point::new(6.1, 49.1))
        );
        assert_eq!(store.get_layer(id).unwrap().unwrap().feature_count, 1);
    }

    #[test]
    fn wrong_geometry_type_is_rejected() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let polygon = GeographicFeature::new(
            geo::Geometry::Polygon(
                BoundingBox {
                    min_x: 0.0,
                    min_y: 0.0,
                    max_x: 1.0,
                    max_y: 1.0,
                }
                .to_polygon(),
            ),
            Attributes::new(),
        );
        assert!(matches!(
            store.replace_layer(&layer(1, "trees"), &mut stream(vec![polygon])),
            Err(StoreError::Conflict { .. })
        ));
        assert!(store.layers_for_version(1).unwrap().is_empty());
    }

    #[test]
    fn replacing_an_existing_layer_keeps_its_id() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let first = store
            .replace_layer(&layer(1, "trees"), &mut stream(vec![tree(0.0, 0.0, "2020-01-01")]))
            .unwrap();
        let second = store
            .replace_layer(
                &layer(1, "trees"),
                &mut stream(vec![tree(1.0, 1.0, "2020-01-01"), tree(2.0, 2.0, "2020-01-01")]),
            )
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.count(&FeatureFilter::all()).unwrap(), 2);
        assert_eq!(store.layers_for_version(1).unwrap().len(), 1);
        assert_eq!(store.layers_for_version(1).unwrap()[0].fields.len(), 2);
    }

    #[test]
    fn clear_restarts_ids_only_when_empty() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let a = store
            .replace_layer(&layer(1, "a"), &mut stream(vec![tree(0.0, 0.0, "2020-01-01")]))
            .unwrap();
        let b = store
            .replace_layer(&layer(2, "b"), &mut stream(vec![tree(0.0, 0.0, "2020-01-01")]))
            .unwrap();

        assert_eq!(store.clear(&FeatureFilter::dataset_version(1)).unwrap(), 1);
        assert_eq!(store.get_layer(a.id.unwrap()).unwrap().unwrap().feature_count, 0);
        store
            .replace_features(a.id.unwrap(), &mut stream(vec![tree(1.0, 1.0, "2020-01-01")]))
            .unwrap();
        assert_eq!(store.features_for_layer(a.id.unwrap()).unwrap()[0].id, Some(3));

        assert_eq!(store.clear(&FeatureFilter::all()).unwrap(), 2);
        store
            .replace_features(b.id.unwrap(), &mut stream(vec![tree(1.0, 1.0, "2020-01-01")]))
            .unwrap();
        assert_eq!(store.features_for_layer(b.id.unwrap()).unwrap()[0].id, Some(1));
    }

    #[test]
    fn status_updates_require_an_existing_layer() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let ensured = store.ensure_layer(&layer(1, "trees")).unwrap();
        assert_eq!(ensured.feature_count, 0);
        assert_eq!(ensured.fields.len(), 2);

        store
            .set_layer_status(ensured.id.unwrap(), GenerationStatus::Running)
            .unwrap();
        assert_eq!(
            store.ensure_layer(&layer(1, "trees")).unwrap().generation_status,
            GenerationStatus::Running
        );
        assert!(matches!(
            store.set_layer_status(999, GenerationStatus::Failed),
            Err(StoreError::NotFound { .. })
        ));
    }
}
