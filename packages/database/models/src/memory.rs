//! Mutex-guarded in-memory implementation of every repository.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use cartoforge_dataset_models::{
    BoundingBox, DatasetLayer, DatasetVersion, GenerationStatus, GeographicFeature, GeometryType,
    IngestionStatus,
};

use crate::{
    DatasetVersionStore, FeatureFilter, FeatureStore, FeatureStream, LayerStore, RenderRecord,
    RenderStore, StoreError, TemplateRecord, TemplateRepository, TemplateState,
    check_geometry_type,
};

#[derive(Debug)]
struct State {
    next_id: i64,
    next_feature_id: i64,
    versions: BTreeMap<i64, DatasetVersion>,
    layers: BTreeMap<i64, DatasetLayer>,
    features: BTreeMap<i64, Vec<GeographicFeature>>,
    templates: BTreeMap<i64, TemplateRecord>,
    renders: BTreeMap<i64, RenderRecord>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_id: 1,
            next_feature_id: 1,
            versions: BTreeMap::new(),
            layers: BTreeMap::new(),
            features: BTreeMap::new(),
            templates: BTreeMap::new(),
            renders: BTreeMap::new(),
        }
    }
}

impl State {
    const fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn layer_matches(&self, layer_id: i64, filter: &FeatureFilter) -> bool {
        if filter.layer_id.is_some_and(|id| id != layer_id) {
            return false;
        }
        filter.dataset_version_id.is_none_or(|version_id| {
            self.layers
                .get(&layer_id)
                .is_some_and(|layer| layer.dataset_version_id == version_id)
        })
    }

    /// Whether `task_id` is the task currently generating template `id`.
    fn owns_template(&self, id: i64, task_id: &str) -> Result<bool, StoreError> {
        let template = self
            .templates
            .get(&id)
            .ok_or_else(|| StoreError::not_found("template", id))?;
        Ok(template.generation_status == GenerationStatus::Running
            && template.task_id.as_deref() == Some(task_id))
    }

    fn end_generation(&mut self, id: i64, status: GenerationStatus, error: Option<&str>) {
        if let Some(template) = self.templates.get_mut(&id) {
            template.generation_status = status;
            template.task_id = None;
            template.regenerate = false;
            template.last_error = error.map(str::to_string);
        }
    }

    fn put_render(&mut self, render: &RenderRecord) -> Result<i64, StoreError> {
        if self
            .renders
            .values()
            .any(|r| r.name == render.name && r.id != render.id)
        {
            return Err(StoreError::Conflict {
                message: format!("render name {} is already used", render.name),
            });
        }

        let id = match render.id {
            Some(id) if self.renders.contains_key(&id) => id,
            Some(id) => return Err(StoreError::not_found("render", id)),
            None => self.allocate_id(),
        };
        self.renders.insert(
            id,
            RenderRecord {
                id: Some(id),
                ..render.clone()
            },
        );
        Ok(id)
    }

    /// Swaps in a new feature set for `layer_id`, assigning ids.
    fn store_features(&mut self, layer_id: i64, mut features: Vec<GeographicFeature>) -> u64 {
        for feature in &mut features {
            feature.id = Some(self.next_feature_id);
            self.next_feature_id += 1;
        }
        let count = features.len() as u64;
        self.features.insert(layer_id, features);
        count
    }
}

/// Keeps every record in process memory.
///
/// Writes are staged outside the lock and swapped in whole, so readers
/// never see a half-written layer.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|e| StoreError::Database {
            message: format!("in-memory store poisoned: {e}"),
        })
    }
}

/// Drains a feature stream, checking every geometry against the layer's
/// type and accumulating the envelope.
fn collect_features(
    geometry_type: GeometryType,
    features: &mut FeatureStream<'_>,
) -> Result<(Vec<GeographicFeature>, Option<BoundingBox>), StoreError> {
    let mut collected = Vec::new();
    let mut bbox: Option<BoundingBox> = None;
    for feature in features {
        let feature = feature?;
        check_geometry_type(geometry_type, &feature)?;
        if let Some(envelope) = BoundingBox::of(&feature.geometry) {
            bbox = Some(bbox.map_or(envelope, |b| b.union(envelope)));
        }
        collected.push(feature);
    }
    Ok((collected, bbox))
}

impl FeatureStore for InMemoryStore {
    fn replace_features(
        &self,
        layer_id: i64,
        features: &mut FeatureStream<'_>,
    ) -> Result<u64, StoreError> {
        let geometry_type = self
            .lock()?
            .layers
            .get(&layer_id)
            .map(|layer| layer.geometry_type)
            .ok_or_else(|| StoreError::not_found("layer", layer_id))?;

        let (features, bbox) = collect_features(geometry_type, features)?;

        let mut state = self.lock()?;
        if !state.layers.contains_key(&layer_id) {
            return Err(StoreError::not_found("layer", layer_id));
        }
        let count = state.store_features(layer_id, features);
        if let Some(layer) = state.layers.get_mut(&layer_id) {
            layer.feature_count = count;
            layer.bounding_box = bbox;
        }
        Ok(count)
    }

    fn count(&self, filter: &FeatureFilter) -> Result<u64, StoreError> {
        let state = self.lock()?;
        Ok(state
            .features
            .iter()
            .filter(|(layer_id, _)| state.layer_matches(**layer_id, filter))
            .map(|(_, features)| features.len() as u64)
            .sum())
    }

    fn clear(&self, filter: &FeatureFilter) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let cleared: Vec<i64> = state
            .features
            .keys()
            .copied()
            .filter(|layer_id| state.layer_matches(*layer_id, filter))
            .collect();

        let mut deleted = 0;
        for layer_id in cleared {
            if let Some(features) = state.features.remove(&layer_id) {
                deleted += features.len() as u64;
            }
            if let Some(layer) = state.layers.get_mut(&layer_id) {
                layer.feature_count = 0;
                layer.bounding_box = None;
            }
        }

        if state.features.values().all(Vec::is_empty) {
            log::debug!("Feature store is empty, restarting feature ids");
            state.next_feature_id = 1;
        }
        Ok(deleted)
    }

    fn features_for_layer(&self, layer_id: i64) -> Result<Vec<GeographicFeature>, StoreError> {
        Ok(self
            .lock()?
            .features
            .get(&layer_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl LayerStore for InMemoryStore {
    fn ensure_layer(&self, layer: &DatasetLayer) -> Result<DatasetLayer, StoreError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .layers
            .values()
            .find(|l| l.dataset_version_id == layer.dataset_version_id && l.name == layer.name)
        {
            return Ok(existing.clone());
        }

        let id = state.allocate_id();
        let created = DatasetLayer {
            id: Some(id),
            bounding_box: None,
            feature_count: 0,
            ..layer.clone()
        };
        state.layers.insert(id, created.clone());
        Ok(created)
    }

    fn replace_layer(
        &self,
        layer: &DatasetLayer,
        features: &mut FeatureStream<'_>,
    ) -> Result<DatasetLayer, StoreError> {
        let (features, bbox) = collect_features(layer.geometry_type, features)?;

        let mut state = self.lock()?;
        let existing = state
            .layers
            .values()
            .find(|l| l.dataset_version_id == layer.dataset_version_id && l.name == layer.name)
            .and_then(|l| l.id);
        let id = match existing {
            Some(id) => id,
            None => state.allocate_id(),
        };

        let count = state.store_features(id, features);
        let stored = DatasetLayer {
            id: Some(id),
            bounding_box: bbox,
            feature_count: count,
            ..layer.clone()
        };
        state.layers.insert(id, stored.clone());
        Ok(stored)
    }

    fn get_layer(&self, id: i64) -> Result<Option<DatasetLayer>, StoreError> {
        Ok(self.lock()?.layers.get(&id).cloned())
    }

    fn layers_for_version(&self, dataset_version_id: i64) -> Result<Vec<DatasetLayer>, StoreError> {
        let mut layers: Vec<_> = self
            .lock()?
            .layers
            .values()
            .filter(|l| l.dataset_version_id == dataset_version_id)
            .cloned()
            .collect();
        layers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(layers)
    }

    fn set_layer_status(&self, id: i64, status: GenerationStatus) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let layer = state
            .layers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("layer", id))?;
        layer.generation_status = status;
        Ok(())
    }
}

impl DatasetVersionStore for InMemoryStore {
    fn create_version(&self, version: &DatasetVersion) -> Result<DatasetVersion, StoreError> {
        let mut state = self.lock()?;
        if state.versions.values().any(|v| {
            v.dataset_name == version.dataset_name && v.version_number == version.version_number
        }) {
            return Err(StoreError::Conflict {
                message: format!(
                    "dataset {} already has version {}",
                    version.dataset_name, version.version_number
                ),
            });
        }
        let id = state.allocate_id();
        let created = DatasetVersion {
            id: Some(id),
            ..version.clone()
        };
        state.versions.insert(id, created.clone());
        Ok(created)
    }

    fn get_version(&self, id: i64) -> Result<Option<DatasetVersion>, StoreError> {
        Ok(self.lock()?.versions.get(&id).cloned())
    }

    fn update_ingestion(
        &self,
        id: i64,
        status: IngestionStatus,
        task_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let version = state
            .versions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("dataset version", id))?;
        version.ingestion_status = status;
        version.task_id = task_id.map(str::to_string);
        version.error = error.map(str::to_string);
        Ok(())
    }
}

impl TemplateRepository for InMemoryStore {
    fn save_template(&self, template: &TemplateRecord) -> Result<i64, StoreError> {
        let mut state = self.lock()?;
        if state
            .templates
            .values()
            .any(|t| t.name == template.name && t.id != template.id)
        {
            return Err(StoreError::Conflict {
                message: format!("template name {} is already used", template.name),
            });
        }

        match template.id {
            Some(id) => {
                let existing = state
                    .templates
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::not_found("template", id))?;
                *existing = TemplateRecord {
                    generation_status: existing.generation_status,
                    task_id: existing.task_id.take(),
                    regenerate: existing.regenerate,
                    last_error: existing.last_error.take(),
                    ..template.clone()
                };
                Ok(id)
            }
            None => {
                let id = state.allocate_id();
                state.templates.insert(
                    id,
                    TemplateRecord {
                        id: Some(id),
                        ..template.clone()
                    },
                );
                Ok(id)
            }
        }
    }

    fn get_template(&self, id: i64) -> Result<Option<TemplateRecord>, StoreError> {
        Ok(self.lock()?.templates.get(&id).cloned())
    }

    fn find_template_by_name(&self, name: &str) -> Result<Option<TemplateRecord>, StoreError> {
        Ok(self
            .lock()?
            .templates
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    fn templates_with_status(
        &self,
        status: GenerationStatus,
    ) -> Result<Vec<TemplateState>, StoreError> {
        Ok(self
            .lock()?
            .templates
            .values()
            .filter(|t| t.generation_status == status)
            .filter_map(TemplateRecord::state)
            .collect())
    }

    fn template_state(&self, id: i64) -> Result<Option<TemplateState>, StoreError> {
        Ok(self
            .lock()?
            .templates
            .get(&id)
            .and_then(TemplateRecord::state))
    }

    fn try_begin_generation(&self, id: i64, task_id: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let template = state
            .templates
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("template", id))?;
        if template.generation_status != GenerationStatus::Pending {
            return Ok(false);
        }
        template.generation_status = GenerationStatus::Running;
        template.task_id = Some(task_id.to_string());
        template.regenerate = false;
        template.last_error = None;
        Ok(true)
    }

    fn finish_generation(
        &self,
        id: i64,
        task_id: &str,
        status: GenerationStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if !state.owns_template(id, task_id)? {
            return Ok(false);
        }
        state.end_generation(id, status, error);
        Ok(true)
    }

    fn complete_generation(
        &self,
        id: i64,
        task_id: &str,
        render: &RenderRecord,
    ) -> Result<Option<i64>, StoreError> {
        let mut state = self.lock()?;
        if !state.owns_template(id, task_id)? {
            return Ok(None);
        }
        let render_id = state.put_render(render)?;
        state.end_generation(id, GenerationStatus::Completed, None);
        Ok(Some(render_id))
    }

    fn request_regeneration(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let template = state
            .templates
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("template", id))?;
        if template.generation_status == GenerationStatus::Running {
            return Ok(false);
        }
        template.generation_status = GenerationStatus::Pending;
        template.regenerate = true;
        Ok(true)
    }
}

impl RenderStore for InMemoryStore {
    fn render_for_template(&self, template_id: i64) -> Result<Option<RenderRecord>, StoreError> {
        Ok(self
            .lock()?
            .renders
            .values()
            .find(|r| r.template_id == template_id)
            .cloned())
    }

    fn render_name_taken(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.renders.values().any(|r| r.name == name))
    }

    fn save_render(&self, render: &RenderRecord) -> Result<i64, StoreError> {
        self.lock()?.put_render(render)
    }
}

#[cfg(test)]
mod tests {
    use cartoforge_dataset_models::{Attributes, TextEncoding};

    use super::*;

    fn point_feature(x: f64, y: f64) -> GeographicFeature {
        let mut attributes = Attributes::new();
        attributes.insert("name", format!("{x},{y}"));
        GeographicFeature::new(geo::Geometry::Point(geo::Point::new(x, y)), attributes)
    }

    fn point_layer(version_id: i64, name: &str) -> DatasetLayer {
        DatasetLayer {
            id: None,
            dataset_version_id: version_id,
            name: name.to_string(),
            srid: 2154,
            bounding_box: None,
            feature_count: 0,
            geometry_type: GeometryType::Point,
            fields: vec![],
            generation_status: GenerationStatus::Completed,
        }
    }

    fn stream(
        features: Vec<GeographicFeature>,
    ) -> impl Iterator<Item = Result<GeographicFeature, StoreError>> {
        features.into_iter().map(Ok)
    }

    fn template(name: &str) -> TemplateRecord {
        TemplateRecord {
            id: None,
            name: name.to_string(),
            zoom_start: 13,
            layer_control: true,
            zoom_control: true,
            center_lon: 6.175_715,
            center_lat: 49.119_308,
            tiles: vec![],
            features: vec![],
            generation_status: GenerationStatus::Pending,
            task_id: None,
            regenerate: false,
            last_error: None,
        }
    }

    #[test]
    fn replace_layer_computes_envelope_and_count() {
        let store = InMemoryStore::new();
        let layer = store
            .replace_layer(
                &point_layer(1, "trees"),
                &mut stream(vec![point_feature(1.0, 2.0), point_feature(3.0, -1.0)]),
            )
            .unwrap();
        assert_eq!(layer.feature_count, 2);
        assert_eq!(
            layer.bounding_box,
            Some(BoundingBox {
                min_x: 1.0,
                min_y: -1.0,
                max_x: 3.0,
                max_y: 2.0,
            })
        );
        assert_eq!(store.count(&FeatureFilter::all()).unwrap(), 2);
    }

    #[test]
    fn failed_replace_keeps_previous_features() {
        let store = InMemoryStore::new();
        let layer = store
            .replace_layer(&point_layer(1, "trees"), &mut stream(vec![point_feature(1.0, 1.0)]))
            .unwrap();
        let id = layer.id.unwrap();

        let mut failing = vec![
            Ok(point_feature(5.0, 5.0)),
            Err(StoreError::Aborted {
                message: "truncated record".to_string(),
            }),
        ]
        .into_iter();
        assert!(matches!(
            store.replace_features(id, &mut failing),
            Err(StoreError::Aborted { .. })
        ));

        let kept = store.features_for_layer(id).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].geometry, geo::Geometry::Point(geo::Point::new(1.0, 1.0)));
        assert_eq!(store.get_layer(id).unwrap().unwrap().feature_count, 1);
    }

    #[test]
    fn mismatched_geometry_is_a_conflict() {
        let store = InMemoryStore::new();
        let line = GeographicFeature::new(
            geo::Geometry::LineString(geo::LineString::from(vec![(0.0, 0.0), (1.0, 1.0)])),
            Attributes::new(),
        );
        assert!(matches!(
            store.replace_layer(&point_layer(1, "trees"), &mut stream(vec![line])),
            Err(StoreError::Conflict { .. })
        ));
        assert!(store.layers_for_version(1).unwrap().is_empty());
    }

    #[test]
    fn replace_features_requires_a_layer() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.replace_features(42, &mut stream(vec![])),
            Err(StoreError::NotFound { entity: "layer", .. })
        ));
    }

    #[test]
    fn clear_resets_ids_only_when_empty() {
        let store = InMemoryStore::new();
        let a = store
            .replace_layer(&point_layer(1, "a"), &mut stream(vec![point_feature(0.0, 0.0)]))
            .unwrap();
        let b = store
            .replace_layer(&point_layer(2, "b"), &mut stream(vec![point_feature(0.0, 0.0)]))
            .unwrap();

        assert_eq!(store.clear(&FeatureFilter::dataset_version(1)).unwrap(), 1);
        store
            .replace_features(a.id.unwrap(), &mut stream(vec![point_feature(1.0, 1.0)]))
            .unwrap();
        let ids: Vec<_> = store
            .features_for_layer(a.id.unwrap())
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![Some(3)]);

        assert_eq!(store.clear(&FeatureFilter::all()).unwrap(), 2);
        store
            .replace_features(b.id.unwrap(), &mut stream(vec![point_feature(1.0, 1.0)]))
            .unwrap();
        assert_eq!(store.features_for_layer(b.id.unwrap()).unwrap()[0].id, Some(1));
    }

    #[test]
    fn count_scopes_by_layer_and_version() {
        let store = InMemoryStore::new();
        let a = store
            .replace_layer(
                &point_layer(1, "a"),
                &mut stream(vec![point_feature(0.0, 0.0), point_feature(1.0, 0.0)]),
            )
            .unwrap();
        store
            .replace_layer(&point_layer(2, "b"), &mut stream(vec![point_feature(0.0, 0.0)]))
            .unwrap();

        assert_eq!(store.count(&FeatureFilter::layer(a.id.unwrap())).unwrap(), 2);
        assert_eq!(store.count(&FeatureFilter::dataset_version(2)).unwrap(), 1);
        assert_eq!(store.count(&FeatureFilter::all()).unwrap(), 3);
    }

    #[test]
    fn generation_starts_only_from_pending() {
        let store = InMemoryStore::new();
        let id = store.save_template(&template("metz")).unwrap();

        assert!(store.try_begin_generation(id, "task-1").unwrap());
        assert!(!store.try_begin_generation(id, "task-2").unwrap());
        let state = store.template_state(id).unwrap().unwrap();
        assert_eq!(state.generation_status, GenerationStatus::Running);
        assert_eq!(state.task_id.as_deref(), Some("task-1"));

        assert!(!store.request_regeneration(id).unwrap());

        assert!(
            store
                .finish_generation(id, "task-1", GenerationStatus::Failed, Some("boom"))
                .unwrap()
        );
        let state = store.template_state(id).unwrap().unwrap();
        assert_eq!(state.task_id, None);
        assert_eq!(state.last_error.as_deref(), Some("boom"));

        assert!(store.request_regeneration(id).unwrap());
        let state = store.template_state(id).unwrap().unwrap();
        assert_eq!(state.generation_status, GenerationStatus::Pending);
        assert!(state.regenerate);
    }

    #[test]
    fn saving_content_keeps_generation_state() {
        let store = InMemoryStore::new();
        let id = store.save_template(&template("metz")).unwrap();
        store.try_begin_generation(id, "task-1").unwrap();

        let mut edited = store.get_template(id).unwrap().unwrap();
        edited.zoom_start = 9;
        edited.generation_status = GenerationStatus::Completed;
        edited.task_id = None;
        store.save_template(&edited).unwrap();

        let stored = store.get_template(id).unwrap().unwrap();
        assert_eq!(stored.zoom_start, 9);
        assert_eq!(stored.generation_status, GenerationStatus::Running);
        assert_eq!(stored.task_id.as_deref(), Some("task-1"));
    }

    fn render(template_id: i64, html: &str) -> RenderRecord {
        RenderRecord {
            id: None,
            template_id,
            name: "metz".to_string(),
            slug: "metz".to_string(),
            embed_html: html.to_string(),
            full_html: html.to_string(),
            generated_at: chrono::DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn stale_task_cannot_finish_a_newer_run() {
        let store = InMemoryStore::new();
        let id = store.save_template(&template("metz")).unwrap();

        assert!(store.try_begin_generation(id, "task-a").unwrap());
        assert!(
            store
                .finish_generation(id, "task-a", GenerationStatus::Failed, Some("revoked"))
                .unwrap()
        );
        assert!(store.request_regeneration(id).unwrap());
        assert!(store.try_begin_generation(id, "task-b").unwrap());

        assert!(
            !store
                .finish_generation(id, "task-a", GenerationStatus::Failed, Some("late"))
                .unwrap()
        );
        assert_eq!(store.complete_generation(id, "task-a", &render(id, "a")).unwrap(), None);

        let state = store.template_state(id).unwrap().unwrap();
        assert_eq!(state.generation_status, GenerationStatus::Running);
        assert_eq!(state.task_id.as_deref(), Some("task-b"));
        assert_eq!(state.last_error, None);
        assert!(store.render_for_template(id).unwrap().is_none());
    }

    #[test]
    fn completing_publishes_the_render_for_the_owning_task_only() {
        let store = InMemoryStore::new();
        let id = store.save_template(&template("metz")).unwrap();
        assert!(store.try_begin_generation(id, "task-a").unwrap());

        let render_id = store
            .complete_generation(id, "task-a", &render(id, "first"))
            .unwrap()
            .unwrap();
        let state = store.template_state(id).unwrap().unwrap();
        assert_eq!(state.generation_status, GenerationStatus::Completed);
        assert_eq!(state.task_id, None);

        // Finished runs cannot be completed again.
        assert_eq!(
            store.complete_generation(id, "task-a", &render(id, "second")).unwrap(),
            None
        );
        let stored = store.render_for_template(id).unwrap().unwrap();
        assert_eq!(stored.id, Some(render_id));
        assert_eq!(stored.full_html, "first");
    }

    #[test]
    fn template_names_are_unique() {
        let store = InMemoryStore::new();
        store.save_template(&template("metz")).unwrap();
        assert!(matches!(
            store.save_template(&template("metz")),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn versions_record_ingestion_outcome() {
        let store = InMemoryStore::new();
        let version = store
            .create_version(&DatasetVersion {
                id: None,
                dataset_name: "cadastre".to_string(),
                version_number: 1,
                archive_path: "/tmp/cadastre.zip".to_string(),
                encoding: TextEncoding::Latin1,
                ingestion_status: IngestionStatus::Pending,
                task_id: None,
                error: None,
            })
            .unwrap();
        let id = version.id.unwrap();
        store
            .update_ingestion(id, IngestionStatus::Failure, None, Some("bad dbf"))
            .unwrap();

        let stored = store.get_version(id).unwrap().unwrap();
        assert_eq!(stored.ingestion_status, IngestionStatus::Failure);
        assert_eq!(stored.error.as_deref(), Some("bad dbf"));
        assert!(matches!(
            store.create_version(&version),
            Err(StoreError::Conflict { .. })
        ));
    }
}
