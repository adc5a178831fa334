//! Dataset version ingestion.
//!
//! Runs an uploaded archive through validate, sanitize, and extract, then
//! replaces one layer per shapefile. The version's ingestion status moves
//! STARTED then SUCCESS or FAILURE; each layer's generation status moves
//! PENDING, RUNNING, then COMPLETED or FAILED.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cartoforge_archive::{ArchiveError, is_hidden_entry};
use cartoforge_database_models::{DatasetVersionStore, LayerStore, StoreError};
use cartoforge_dataset_models::{
    DatasetLayer, DatasetVersion, GenerationStatus, GeometryType, IngestionStatus,
};

use crate::IngestError;
use crate::config::IngestConfig;
use crate::progress::ProgressCallback;
use crate::reader::ShapefileLayer;

/// Outcome of one ingested layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerReport {
    /// Layer name.
    pub name: String,
    /// Stored layer id.
    pub layer_id: i64,
    /// Geometry family of the layer.
    pub geometry_type: GeometryType,
    /// SRID the source was declared in.
    pub srid: u32,
    /// Features stored.
    pub ingested: u64,
    /// Multipolygons rejected for having too many parts.
    pub rejected: u64,
    /// Null shapes and deleted records skipped.
    pub skipped: u64,
}

/// Outcome of a dataset version ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Ingested dataset version.
    pub dataset_version_id: i64,
    /// Hidden entries removed from the archive.
    pub removed_entries: usize,
    /// One report per shapefile, in path order.
    pub layers: Vec<LayerReport>,
}

/// Ingests every shapefile of a dataset version's archive.
///
/// The archive is extracted under `work_dir/version-<id>`. The first layer
/// that fails aborts the run; layers ingested before it stay stored. The
/// outcome is recorded on the version either way.
///
/// # Errors
///
/// * [`IngestError::Store`] if the version does not exist or a write fails
/// * [`IngestError::Archive`] if the archive is rejected
/// * any reader error of the failing layer
pub fn ingest_dataset_version<S>(
    store: &S,
    version_id: i64,
    work_dir: &Path,
    task_id: Option<&str>,
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<IngestReport, IngestError>
where
    S: DatasetVersionStore + LayerStore + ?Sized,
{
    let version = store
        .get_version(version_id)?
        .ok_or_else(|| StoreError::not_found("dataset version", version_id))?;

    let start = Instant::now();
    log::info!(
        "Ingesting {} v{} from {}",
        version.dataset_name,
        version.version_number,
        version.archive_path
    );
    store.update_ingestion(version_id, IngestionStatus::Started, task_id, None)?;

    match ingest_archive(store, version_id, &version, work_dir, config, progress) {
        Ok(report) => {
            store.update_ingestion(version_id, IngestionStatus::Success, None, None)?;
            log::info!(
                "{} v{}: {} layers ingested in {:.1}s",
                version.dataset_name,
                version.version_number,
                report.layers.len(),
                start.elapsed().as_secs_f64()
            );
            Ok(report)
        }
        Err(e) => {
            log::error!(
                "{} v{}: ingestion failed: {e}",
                version.dataset_name,
                version.version_number
            );
            if let Err(status_error) = store.update_ingestion(
                version_id,
                IngestionStatus::Failure,
                None,
                Some(&e.to_string()),
            ) {
                log::error!("Failed to record ingestion failure: {status_error}");
            }
            Err(e)
        }
    }
}

fn ingest_archive<S>(
    store: &S,
    version_id: i64,
    version: &DatasetVersion,
    work_dir: &Path,
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<IngestReport, IngestError>
where
    S: LayerStore + ?Sized,
{
    let archive = Path::new(&version.archive_path);
    cartoforge_archive::validate(archive)?;
    let removed_entries = cartoforge_archive::sanitize(archive)?;
    if removed_entries > 0 {
        log::info!("Removed {removed_entries} hidden entries from {}", archive.display());
    }

    let dest = work_dir.join(format!("version-{version_id}"));
    if dest.exists() {
        std::fs::remove_dir_all(&dest).map_err(|source| IngestError::Io {
            path: dest.display().to_string(),
            source,
        })?;
    }
    let shapefiles = shapefile_paths(&dest, cartoforge_archive::extract(archive, &dest)?);
    if shapefiles.is_empty() {
        return Err(ArchiveError::MissingShapefile(archive.display().to_string()).into());
    }

    progress.set_total(shapefiles.len() as u64);
    progress.set_position(0);

    let mut layers = Vec::with_capacity(shapefiles.len());
    for path in &shapefiles {
        progress.set_message(path.display().to_string());
        layers.push(ingest_layer(store, version_id, path, version, config)?);
        progress.inc(1);
    }
    progress.finish(format!("{} layers ingested", layers.len()));

    Ok(IngestReport {
        dataset_version_id: version_id,
        removed_entries,
        layers,
    })
}

/// Keeps the extracted `.shp` files outside hidden directories, sorted.
fn shapefile_paths(root: &Path, extracted: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = extracted
        .into_iter()
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"))
        })
        .filter(|path| {
            let relative = path.strip_prefix(root).unwrap_or(path);
            !is_hidden_entry(&relative.to_string_lossy())
        })
        .collect();
    paths.sort();
    paths
}

fn ingest_layer<S>(
    store: &S,
    version_id: i64,
    path: &Path,
    version: &DatasetVersion,
    config: &IngestConfig,
) -> Result<LayerReport, IngestError>
where
    S: LayerStore + ?Sized,
{
    let mut shapefile = ShapefileLayer::open(path, version.encoding, config)?;
    let layer = store.ensure_layer(&shapefile.to_layer(version_id))?;
    let layer_id = layer.id.ok_or_else(|| StoreError::Conversion {
        message: format!("layer {} was stored without an id", layer.name),
    })?;
    store.set_layer_status(layer_id, GenerationStatus::Running)?;

    match write_layer(store, &mut shapefile, version_id, config) {
        Ok(report) => {
            store.set_layer_status(layer_id, GenerationStatus::Completed)?;
            log::info!(
                "{}: {} features stored, {} rejected, {} skipped",
                report.name,
                report.ingested,
                report.rejected,
                report.skipped
            );
            Ok(report)
        }
        Err(e) => {
            if let Err(status_error) = store.set_layer_status(layer_id, GenerationStatus::Failed)
            {
                log::error!("Failed to mark layer {layer_id} as failed: {status_error}");
            }
            Err(e)
        }
    }
}

/// Streams a shapefile into the store, replacing the layer atomically.
///
/// A reader error aborts the store write; it is kept aside and returned
/// in place of the store's [`StoreError::Aborted`].
fn write_layer<S>(
    store: &S,
    shapefile: &mut ShapefileLayer,
    version_id: i64,
    config: &IngestConfig,
) -> Result<LayerReport, IngestError>
where
    S: LayerStore + ?Sized,
{
    let metadata = shapefile.to_layer(version_id);
    let mut stream_error: Option<IngestError> = None;
    let mut streamed = 0_usize;

    let stored = {
        let name = metadata.name.as_str();
        let mut stream = shapefile.features().map(|item| {
            item.inspect(|_| {
                streamed += 1;
                if streamed.is_multiple_of(config.batch_size) {
                    log::info!("{name}: {streamed} features read");
                }
            })
            .map_err(|e| {
                let message = e.to_string();
                stream_error = Some(e);
                StoreError::Aborted { message }
            })
        });
        store.replace_layer(
            &DatasetLayer {
                generation_status: GenerationStatus::Running,
                ..metadata.clone()
            },
            &mut stream,
        )
    };

    let stored = stored.map_err(|e| stream_error.take().unwrap_or_else(|| e.into()))?;
    let stats = shapefile.stats();

    Ok(LayerReport {
        name: stored.name,
        layer_id: stored.id.unwrap_or_default(),
        geometry_type: stored.geometry_type,
        srid: stored.srid,
        ingested: stored.feature_count,
        rejected: stats.rejected,
        skipped: stats.skipped,
    })
}
