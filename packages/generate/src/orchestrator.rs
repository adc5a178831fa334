//! Template generation state machine.
//!
//! A template moves PENDING to RUNNING when a job claims it, then to
//! COMPLETED or FAILED. Every outcome of a claimed run is written back, so
//! a template is never left RUNNING by a failed job. FAILED and COMPLETED
//! templates stay put until [`Orchestrator::request_regeneration`] moves
//! them back to PENDING.

use std::sync::Arc;
use std::time::Instant;

use cartoforge_database_models::{RenderRecord, Repositories, StoreError};
use cartoforge_dataset_models::GenerationStatus;
use cartoforge_template::MapTemplate;
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::GenerationError;
use crate::assemble::{AssembledNode, assemble};
use crate::jobs::{CancelHandle, JobQueue};
use crate::render::{RenderedMap, render_map, slugify};

/// Attempts at finding a free render name: `name`, then `name-1` up to
/// `name-99`.
const RENDER_NAME_ATTEMPTS: usize = 100;

/// Outcome of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub template_id: i64,
    /// Task id the run was recorded under.
    pub task_id: String,
    pub render_id: i64,
    pub render_name: String,
    /// Layers drawn, nested ones included.
    pub layers: usize,
    /// Features drawn across every layer.
    pub features: usize,
}

/// Outcome of one template run by [`Orchestrator::generate_pending`].
#[derive(Debug)]
pub struct PendingRun {
    pub template_id: i64,
    pub name: String,
    pub result: Result<GenerationReport, GenerationError>,
}

/// Unregisters a job however its run ends.
struct Registration<'a> {
    jobs: &'a JobQueue,
    handle: CancelHandle,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.jobs.finish(self.handle.task_id());
    }
}

/// A rendered template waiting to be published.
struct PreparedRender {
    render: RenderRecord,
    layers: usize,
    features: usize,
}

/// Runs and revokes template generations against a set of repositories.
pub struct Orchestrator<S: ?Sized> {
    store: Arc<S>,
    jobs: JobQueue,
}

impl<S> Orchestrator<S>
where
    S: Repositories + ?Sized + 'static,
{
    /// Creates an orchestrator with its own job registry.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_jobs(store, JobQueue::new())
    }

    /// Creates an orchestrator sharing an existing job registry.
    #[must_use]
    pub const fn with_jobs(store: Arc<S>, jobs: JobQueue) -> Self {
        Self { store, jobs }
    }

    /// Registry of the jobs started by this orchestrator.
    #[must_use]
    pub const fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    /// Generates a PENDING template on the current thread.
    ///
    /// # Errors
    ///
    /// * [`GenerationError::AlreadyRunning`] or
    ///   [`GenerationError::NotPending`] if the template cannot be claimed;
    ///   nothing is written
    /// * any error of the run itself, after the template was moved to
    ///   FAILED with the error recorded
    pub fn generate(&self, template_id: i64) -> Result<GenerationReport, GenerationError> {
        let registration = Registration {
            jobs: &self.jobs,
            handle: self.jobs.register(),
        };
        self.generate_with(template_id, &registration.handle)
    }

    /// Generates a PENDING template on the blocking thread pool.
    ///
    /// A run that panics is recorded as FAILED like any other error.
    pub fn spawn(
        self: &Arc<Self>,
        template_id: i64,
    ) -> JoinHandle<Result<GenerationReport, GenerationError>> {
        let orchestrator = Arc::clone(self);
        let handle = self.jobs.register();
        tokio::spawn(async move {
            let worker = Arc::clone(&orchestrator);
            let task_id = handle.task_id().to_string();
            let job = tokio::task::spawn_blocking(move || {
                let registration = Registration {
                    jobs: &worker.jobs,
                    handle,
                };
                worker.generate_with(template_id, &registration.handle)
            });
            match job.await {
                Ok(result) => result,
                Err(e) => {
                    orchestrator.jobs.finish(&task_id);
                    let error = GenerationError::failure(format!("generation job crashed: {e}"));
                    orchestrator.record_failure(template_id, &task_id, &error);
                    Err(error)
                }
            }
        })
    }

    /// Generates every PENDING template, in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Store`] if the pending templates cannot
    /// be listed. Failures of individual runs are reported per template.
    pub async fn generate_pending(self: &Arc<Self>) -> Result<Vec<PendingRun>, GenerationError> {
        let pending = self.store.templates_with_status(GenerationStatus::Pending)?;
        log::info!("{} pending templates", pending.len());

        let jobs: Vec<_> = pending
            .into_iter()
            .map(|state| (state.id, state.name, self.spawn(state.id)))
            .collect();

        let mut runs = Vec::with_capacity(jobs.len());
        for (template_id, name, job) in jobs {
            let result = job.await.unwrap_or_else(|e| {
                Err(GenerationError::failure(format!("generation job crashed: {e}")))
            });
            runs.push(PendingRun {
                template_id,
                name,
                result,
            });
        }
        Ok(runs)
    }

    /// Revokes a template's in-flight generation and marks it FAILED.
    ///
    /// Returns `false`, writing nothing, when the template has no recorded
    /// task id or the task finished before the revocation landed.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Store`] if the template does not exist or
    /// the write fails.
    pub fn revoke(&self, template_id: i64) -> Result<bool, GenerationError> {
        let state = self
            .store
            .template_state(template_id)?
            .ok_or_else(|| StoreError::not_found("template", template_id))?;
        let Some(task_id) = state.task_id else {
            log::debug!("Template '{}' has no running task", state.name);
            return Ok(false);
        };

        let signalled = self.jobs.cancel(&task_id);
        let revoked = self.store.finish_generation(
            template_id,
            &task_id,
            GenerationStatus::Failed,
            Some(&format!("Generation task {task_id} was revoked")),
        )?;
        if !revoked {
            log::debug!("Task {task_id} of template '{}' already finished", state.name);
            return Ok(false);
        }
        log::warn!(
            "Revoked task {task_id} of template '{}'{}",
            state.name,
            if signalled {
                ""
            } else {
                " (not running in this process)"
            }
        );
        Ok(true)
    }

    /// Revokes every RUNNING template that has a task id.
    ///
    /// Returns the ids of the revoked templates.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Store`] if a read or write fails.
    pub fn kill_running(&self) -> Result<Vec<i64>, GenerationError> {
        let mut revoked = Vec::new();
        for state in self.store.templates_with_status(GenerationStatus::Running)? {
            if self.revoke(state.id)? {
                revoked.push(state.id);
            }
        }
        log::info!("Revoked {} running templates", revoked.len());
        Ok(revoked)
    }

    /// Flags a template for regeneration, moving it back to PENDING.
    ///
    /// Returns `false` when the template is RUNNING and was left alone.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Store`] if the template does not exist.
    pub fn request_regeneration(&self, template_id: i64) -> Result<bool, GenerationError> {
        let queued = self.store.request_regeneration(template_id)?;
        if queued {
            log::info!("Template {template_id} queued for regeneration");
        } else {
            log::warn!("Template {template_id} is running; regeneration not queued");
        }
        Ok(queued)
    }

    fn generate_with(
        &self,
        template_id: i64,
        handle: &CancelHandle,
    ) -> Result<GenerationReport, GenerationError> {
        self.claim(template_id, handle)?;

        let task_id = handle.task_id();
        log::info!("Generating template {template_id} as task {task_id}");
        let start = Instant::now();

        let outcome = self
            .prepare(template_id, handle)
            .and_then(|prepared| self.publish(template_id, handle, prepared));
        match outcome {
            Ok(report) => {
                log::info!(
                    "Template {template_id} rendered as '{}': {} features in {} layers ({:.1}s)",
                    report.render_name,
                    report.features,
                    report.layers,
                    start.elapsed().as_secs_f64()
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("Template {template_id} failed: {e}");
                self.record_failure(template_id, task_id, &e);
                Err(e)
            }
        }
    }

    /// Moves a PENDING template to RUNNING under the handle's task id.
    fn claim(&self, template_id: i64, handle: &CancelHandle) -> Result<(), GenerationError> {
        if self.store.try_begin_generation(template_id, handle.task_id())? {
            return Ok(());
        }
        let status = self
            .store
            .template_state(template_id)?
            .map_or(GenerationStatus::Pending, |s| s.generation_status);
        Err(match status {
            GenerationStatus::Running => GenerationError::AlreadyRunning { template_id },
            status => GenerationError::NotPending {
                template_id,
                status,
            },
        })
    }

    /// Writes FAILED unless the task no longer owns the template.
    fn record_failure(&self, template_id: i64, task_id: &str, error: &GenerationError) {
        match self.store.finish_generation(
            template_id,
            task_id,
            GenerationStatus::Failed,
            Some(&error.to_string()),
        ) {
            Ok(true) => {}
            Ok(false) => log::debug!("Task {task_id} no longer owns template {template_id}"),
            Err(status_error) => log::error!("Failed to record generation failure: {status_error}"),
        }
    }

    /// Renders the template without writing anything.
    fn prepare(
        &self,
        template_id: i64,
        handle: &CancelHandle,
    ) -> Result<PreparedRender, GenerationError> {
        handle.checkpoint()?;
        let record = self
            .store
            .get_template(template_id)?
            .ok_or_else(|| StoreError::not_found("template", template_id))?;
        let template = MapTemplate::from_persisted(&record)?;
        self.check_dependencies(&template)?;

        handle.checkpoint()?;
        let nodes = assemble(&*self.store, template.features())?;
        let layers: Vec<_> = nodes.iter().flat_map(AssembledNode::layers).collect();
        let features = layers.iter().map(|l| l.features.len()).sum();
        let layer_count = layers.len();

        handle.checkpoint()?;
        let rendered = render_map(&template, &nodes)?;
        Ok(PreparedRender {
            render: self.render_record(template_id, &template.name, rendered)?,
            layers: layer_count,
            features,
        })
    }

    /// Stores the render and COMPLETED in one step, only while the handle's
    /// task still owns the template.
    fn publish(
        &self,
        template_id: i64,
        handle: &CancelHandle,
        prepared: PreparedRender,
    ) -> Result<GenerationReport, GenerationError> {
        handle.checkpoint()?;
        let task_id = handle.task_id();
        let render_id = self
            .store
            .complete_generation(template_id, task_id, &prepared.render)?
            .ok_or_else(|| GenerationError::Cancelled {
                task_id: task_id.to_string(),
            })?;

        Ok(GenerationReport {
            template_id,
            task_id: task_id.to_string(),
            render_id,
            render_name: prepared.render.name,
            layers: prepared.layers,
            features: prepared.features,
        })
    }

    /// Fails unless every dataset layer the template draws finished
    /// ingesting.
    fn check_dependencies(&self, template: &MapTemplate) -> Result<(), GenerationError> {
        for layer in template.layers() {
            let state = match self.store.get_layer(layer.dataset_layer_id)? {
                Some(dataset_layer)
                    if dataset_layer.generation_status == GenerationStatus::Completed =>
                {
                    continue;
                }
                Some(dataset_layer) => dataset_layer.generation_status.to_string(),
                None => "missing".to_string(),
            };
            return Err(GenerationError::DependencyNotReady {
                layer: layer.name.clone(),
                dataset_layer_id: layer.dataset_layer_id,
                state,
            });
        }
        Ok(())
    }

    /// Builds the record replacing the template's previous render, or a new
    /// one under the first free name.
    fn render_record(
        &self,
        template_id: i64,
        template_name: &str,
        rendered: RenderedMap,
    ) -> Result<RenderRecord, GenerationError> {
        let (id, name) = match self.store.render_for_template(template_id)? {
            Some(existing) => (existing.id, existing.name),
            None => (None, self.free_render_name(template_name)?),
        };

        Ok(RenderRecord {
            id,
            template_id,
            slug: slugify(&name),
            name,
            embed_html: rendered.embed_html,
            full_html: rendered.full_html,
            generated_at: Utc::now(),
        })
    }

    fn free_render_name(&self, template_name: &str) -> Result<String, GenerationError> {
        for i in 0..RENDER_NAME_ATTEMPTS {
            let candidate = if i == 0 {
                template_name.to_string()
            } else {
                format!("{template_name}-{i}")
            };
            if !self.store.render_name_taken(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(GenerationError::failure(format!(
            "no free render name for {template_name:?} after {RENDER_NAME_ATTEMPTS} attempts"
        )))
    }
}
