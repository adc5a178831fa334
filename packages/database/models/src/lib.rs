#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persisted record types and repository interfaces.
//!
//! The ingestion pipeline and the generation orchestrator only talk to
//! storage through the traits defined here, so they can be driven by the
//! `DuckDB` implementation in `cartoforge_database` or by the
//! [`InMemoryStore`] used in tests and dry runs.

pub mod memory;
pub mod records;

pub use memory::InMemoryStore;
pub use records::{
    FeatureGroupRecord, FeatureRecord, FilterRecord, LayerRecord, PatternRecord,
    PropertyStyleRecord, RenderRecord, StyleRecord, TemplateRecord, TemplateState,
    TileLayerRecord, TooltipRecord,
};

use cartoforge_dataset_models::{
    DatasetLayer, DatasetVersion, GenerationStatus, GeographicFeature, GeometryType,
    IngestionStatus,
};

/// Errors that can occur in a repository.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage engine rejected an operation.
    #[error("Database error: {message}")]
    Database {
        /// Engine error message.
        message: String,
    },

    /// A stored JSON document could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of row that was looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A write would break a uniqueness or consistency rule.
    #[error("Conflict: {message}")]
    Conflict {
        /// What the write conflicted with.
        message: String,
    },

    /// The caller's feature stream failed mid-write; nothing was stored.
    #[error("Write aborted: {message}")]
    Aborted {
        /// Why the stream failed.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be converted to its model type.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Streams features into a write. An `Err` item aborts the whole write.
pub type FeatureStream<'a> = dyn Iterator<Item = Result<GeographicFeature, StoreError>> + 'a;

/// Rejects features whose geometry does not belong in a layer of
/// `geometry_type`.
///
/// # Errors
///
/// Returns [`StoreError::Conflict`] on a mismatch.
pub fn check_geometry_type(
    geometry_type: GeometryType,
    feature: &GeographicFeature,
) -> Result<(), StoreError> {
    match GeometryType::of(&feature.geometry) {
        Some(kind) if geometry_type.accepts(kind) => Ok(()),
        Some(kind) => Err(StoreError::Conflict {
            message: format!("{kind} feature in a {geometry_type} layer"),
        }),
        None => Err(StoreError::Conflict {
            message: format!("unclassifiable geometry in a {geometry_type} layer"),
        }),
    }
}

/// Scope of a feature count or clear. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFilter {
    /// Restrict to one dataset layer.
    pub layer_id: Option<i64>,
    /// Restrict to the layers of one dataset version.
    pub dataset_version_id: Option<i64>,
}

impl FeatureFilter {
    /// Matches every feature in the store.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            layer_id: None,
            dataset_version_id: None,
        }
    }

    /// Matches the features of one layer.
    #[must_use]
    pub const fn layer(layer_id: i64) -> Self {
        Self {
            layer_id: Some(layer_id),
            dataset_version_id: None,
        }
    }

    /// Matches the features of every layer of one dataset version.
    #[must_use]
    pub const fn dataset_version(dataset_version_id: i64) -> Self {
        Self {
            layer_id: None,
            dataset_version_id: Some(dataset_version_id),
        }
    }
}

/// Storage of geographic features, scoped by layer.
pub trait FeatureStore: Send + Sync {
    /// Replaces every feature of a layer with the streamed set.
    ///
    /// Readers observe either the old set or the new one, never a mix and
    /// never an empty layer in between. The layer's feature count and
    /// bounding box are updated in the same write.
    ///
    /// # Errors
    ///
    /// * [`StoreError::NotFound`] if the layer does not exist
    /// * [`StoreError::Conflict`] if a feature's geometry type does not
    ///   match the layer's
    /// * [`StoreError::Aborted`] (or the stream's own error) if the stream
    ///   yields an error; the previous features are kept
    fn replace_features(&self, layer_id: i64, features: &mut FeatureStream<'_>)
    -> Result<u64, StoreError>;

    /// Counts the features matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn count(&self, filter: &FeatureFilter) -> Result<u64, StoreError>;

    /// Deletes the features matching `filter` and returns how many were
    /// deleted. The feature key sequence restarts only when the store ends
    /// up empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn clear(&self, filter: &FeatureFilter) -> Result<u64, StoreError>;

    /// Loads every feature of a layer, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails or a stored feature cannot
    /// be decoded.
    fn features_for_layer(&self, layer_id: i64) -> Result<Vec<GeographicFeature>, StoreError>;
}

/// Storage of dataset layers and their field schemas.
pub trait LayerStore: Send + Sync {
    /// Returns the layer named `layer.name` in `layer.dataset_version_id`,
    /// creating an empty one from `layer` when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn ensure_layer(&self, layer: &DatasetLayer) -> Result<DatasetLayer, StoreError>;

    /// Atomically replaces a layer's metadata, fields, and features.
    ///
    /// The layer is matched by dataset version and name and created when
    /// missing. Its bounding box and feature count are computed from the
    /// streamed features, ignoring what `layer` carries.
    ///
    /// # Errors
    ///
    /// Same as [`FeatureStore::replace_features`].
    fn replace_layer(
        &self,
        layer: &DatasetLayer,
        features: &mut FeatureStream<'_>,
    ) -> Result<DatasetLayer, StoreError>;

    /// Looks up a layer by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn get_layer(&self, id: i64) -> Result<Option<DatasetLayer>, StoreError>;

    /// Lists the layers of a dataset version, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn layers_for_version(&self, dataset_version_id: i64) -> Result<Vec<DatasetLayer>, StoreError>;

    /// Sets a layer's generation status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the layer does not exist.
    fn set_layer_status(&self, id: i64, status: GenerationStatus) -> Result<(), StoreError>;
}

/// Storage of dataset versions.
pub trait DatasetVersionStore: Send + Sync {
    /// Inserts a new dataset version and returns it with its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the dataset already has that
    /// version number.
    fn create_version(&self, version: &DatasetVersion) -> Result<DatasetVersion, StoreError>;

    /// Looks up a dataset version by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn get_version(&self, id: i64) -> Result<Option<DatasetVersion>, StoreError>;

    /// Records the state of a version's ingestion job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the version does not exist.
    fn update_ingestion(
        &self,
        id: i64,
        status: IngestionStatus,
        task_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Storage of map templates and their generation state.
///
/// Generation fields are only written through the dedicated transition
/// methods, each of which is atomic.
pub trait TemplateRepository: Send + Sync {
    /// Inserts a template (when `id` is `None`) or updates its content.
    ///
    /// Updating leaves the stored generation state untouched.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Conflict`] if another template has the same name
    /// * [`StoreError::NotFound`] if `id` is set but unknown
    fn save_template(&self, template: &TemplateRecord) -> Result<i64, StoreError>;

    /// Looks up a template by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn get_template(&self, id: i64) -> Result<Option<TemplateRecord>, StoreError>;

    /// Looks up a template by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn find_template_by_name(&self, name: &str) -> Result<Option<TemplateRecord>, StoreError>;

    /// Returns the generation state of every template in `status`, ordered
    /// by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn templates_with_status(
        &self,
        status: GenerationStatus,
    ) -> Result<Vec<TemplateState>, StoreError>;

    /// Returns a template's generation state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn template_state(&self, id: i64) -> Result<Option<TemplateState>, StoreError>;

    /// Moves a PENDING template to RUNNING under `task_id`, clearing the
    /// regenerate flag and any previous error.
    ///
    /// Returns `false`, without writing, when the template is not PENDING.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the template does not exist.
    fn try_begin_generation(&self, id: i64, task_id: &str) -> Result<bool, StoreError>;

    /// Records the outcome of a generation run by `task_id`: sets
    /// `status`, stores `error`, and clears the task id and the regenerate
    /// flag.
    ///
    /// Returns `false`, without writing, when the template is no longer
    /// RUNNING under `task_id` (the task was revoked, or a newer task has
    /// claimed the template since).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the template does not exist.
    fn finish_generation(
        &self,
        id: i64,
        task_id: &str,
        status: GenerationStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Publishes the render of a generation run by `task_id` and moves the
    /// template to COMPLETED, as one atomic write.
    ///
    /// Returns the render id, or `None` without writing anything when the
    /// template is no longer RUNNING under `task_id`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::NotFound`] if the template does not exist, or the
    ///   render's `id` is set but unknown
    /// * [`StoreError::Conflict`] if another render has the same name
    fn complete_generation(
        &self,
        id: i64,
        task_id: &str,
        render: &RenderRecord,
    ) -> Result<Option<i64>, StoreError>;

    /// Flags a template for regeneration and moves it back to PENDING.
    ///
    /// Returns `false`, without writing, when the template is RUNNING.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the template does not exist.
    fn request_regeneration(&self, id: i64) -> Result<bool, StoreError>;
}

/// Storage of emitted map renders.
pub trait RenderStore: Send + Sync {
    /// Returns the render previously generated from a template.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn render_for_template(&self, template_id: i64) -> Result<Option<RenderRecord>, StoreError>;

    /// Whether any render already uses `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn render_name_taken(&self, name: &str) -> Result<bool, StoreError>;

    /// Inserts a render (when `id` is `None`) or overwrites it.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Conflict`] if another render has the same name
    /// * [`StoreError::NotFound`] if `id` is set but unknown
    fn save_render(&self, render: &RenderRecord) -> Result<i64, StoreError>;
}

/// Every repository the generation pipeline needs.
pub trait Repositories:
    FeatureStore + LayerStore + DatasetVersionStore + TemplateRepository + RenderStore
{
}

impl<T> Repositories for T where
    T: FeatureStore + LayerStore + DatasetVersionStore + TemplateRepository + RenderStore
{
}
