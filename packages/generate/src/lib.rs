#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Map template generation.
//!
//! The [`Orchestrator`] drives a template through its generation state
//! machine (PENDING, RUNNING, then COMPLETED or FAILED). A run loads and
//! validates the template, checks that every dataset layer it references
//! finished ingesting, assembles each layer's features (boundary policy,
//! then filters, then style resolution), and emits a Leaflet map as an
//! embeddable fragment plus a standalone document.
//!
//! Jobs are tracked by task id in a [`JobQueue`], which is the only handle
//! needed to revoke one. Runs observe revocation at three checkpoints:
//! before validation, before assembly, and before emission.

pub mod assemble;
pub mod jobs;
pub mod orchestrator;
pub mod render;

pub use assemble::{AssembledFeature, AssembledGroup, AssembledLayer, AssembledNode, assemble};
pub use jobs::{CancelHandle, JobQueue};
pub use orchestrator::{GenerationReport, Orchestrator};
pub use render::{RenderedMap, render_map, slugify};

use cartoforge_database_models::StoreError;
use cartoforge_dataset_models::GenerationStatus;
use cartoforge_template::ValidationError;

/// Errors that can occur while generating a map.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// A referenced dataset layer has not finished ingesting.
    #[error("Layer {layer} depends on dataset layer {dataset_layer_id}, which is {state}")]
    DependencyNotReady {
        /// Template layer holding the reference.
        layer: String,
        /// Referenced dataset layer.
        dataset_layer_id: i64,
        /// Generation status of the dataset layer, or `missing`.
        state: String,
    },

    /// Another job is already generating the template.
    #[error("Template {template_id} is already being generated")]
    AlreadyRunning {
        /// Template identifier.
        template_id: i64,
    },

    /// The template is not waiting to be generated.
    #[error("Template {template_id} is {status}, not PENDING")]
    NotPending {
        /// Template identifier.
        template_id: i64,
        /// Current generation status.
        status: GenerationStatus,
    },

    /// The job was revoked before it finished.
    #[error("Generation task {task_id} was revoked")]
    Cancelled {
        /// Revoked task.
        task_id: String,
    },

    /// The stored template is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A repository call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Assembly or emission failed for another reason.
    #[error("Generation failed: {message}")]
    Failure {
        /// Description of what went wrong.
        message: String,
    },
}

impl GenerationError {
    /// Shorthand for [`GenerationError::Failure`].
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }
}
