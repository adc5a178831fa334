#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the cartoforge toolchain.
//!
//! ```text
//! cartoforge archive validate <zip>
//! cartoforge dataset add <name> <zip> [--version 1] [--encoding utf-8]
//! cartoforge ingest <version_id>...
//! cartoforge features count [--layer <id>] [--version <id>]
//! cartoforge template import <json>
//! cartoforge generate <template_id> [--force]
//! cartoforge generate-pending
//! cartoforge render export <template_id> [--out <dir>]
//! ```
//!
//! Everything is stored in the `DuckDB` file under `CARTOFORGE_DATA_DIR`
//! (default `data/`). Log output goes through
//! [`cartoforge_cli_utils::init_logger`] so it never tears progress bars.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cartoforge_cli_utils::{IndicatifProgress, MultiProgress};
use cartoforge_database::{DbError, DuckDbStore, paths};
use cartoforge_database_models::{
    DatasetVersionStore as _, FeatureFilter, FeatureStore as _, LayerStore as _,
    RenderStore as _, TemplateRepository as _,
};
use cartoforge_dataset_models::{DatasetVersion, IngestionStatus, TextEncoding};
use cartoforge_generate::Orchestrator;
use cartoforge_ingest::IngestConfig;
use cartoforge_template::{MapTemplate, from_json, to_json_pretty};
use clap::{Parser, Subcommand};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "cartoforge", about = "Shapefile ingestion and web map generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or clean an uploaded zip archive
    Archive {
        #[command(subcommand)]
        command: ArchiveCommand,
    },
    /// Register dataset versions and inspect their layers
    Dataset {
        #[command(subcommand)]
        command: DatasetCommand,
    },
    /// Ingest the archives of one or more dataset versions
    Ingest {
        /// Dataset version ids
        #[arg(required = true)]
        version_ids: Vec<i64>,
    },
    /// Count or delete stored features
    Features {
        #[command(subcommand)]
        command: FeaturesCommand,
    },
    /// Import, export, or requeue map templates
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },
    /// Generate one PENDING template
    Generate {
        /// Template id
        template_id: i64,
        /// Requeue a COMPLETED or FAILED template first
        #[arg(long)]
        force: bool,
    },
    /// Generate every PENDING template
    GeneratePending,
    /// Revoke a template's running generation
    Revoke {
        /// Template id
        template_id: i64,
    },
    /// Revoke every running generation
    Kill,
    /// Work with generated maps
    Render {
        #[command(subcommand)]
        command: RenderCommand,
    },
}

#[derive(Subcommand)]
enum ArchiveCommand {
    /// Check that a zip archive holds usable shapefiles
    Validate {
        /// Path to the zip archive
        path: PathBuf,
    },
    /// Remove hidden and system entries from a zip archive in place
    Sanitize {
        /// Path to the zip archive
        path: PathBuf,
    },
    /// List the shapefiles of a zip archive
    List {
        /// Path to the zip archive
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum DatasetCommand {
    /// Register an uploaded archive as a new dataset version
    Add {
        /// Dataset name
        name: String,
        /// Path to the zip archive
        archive: PathBuf,
        /// Version number within the dataset
        #[arg(long, default_value = "1")]
        version: u32,
        /// Encoding of the attribute tables
        #[arg(long, default_value = "utf-8", value_parser = parse_encoding)]
        encoding: TextEncoding,
    },
    /// List the layers of a dataset version
    Layers {
        /// Dataset version id
        version_id: i64,
    },
}

#[derive(Subcommand)]
enum FeaturesCommand {
    /// Count stored features
    Count {
        /// Only features of this layer
        #[arg(long)]
        layer: Option<i64>,
        /// Only features of this dataset version
        #[arg(long)]
        version: Option<i64>,
    },
    /// Delete stored features
    Clear {
        /// Only features of this layer
        #[arg(long)]
        layer: Option<i64>,
        /// Only features of this dataset version
        #[arg(long)]
        version: Option<i64>,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Store a template from its JSON form, replacing one with the same name
    Import {
        /// Path to the JSON file
        path: PathBuf,
    },
    /// Print a stored template as JSON
    Export {
        /// Template id
        template_id: i64,
    },
    /// Queue a template for regeneration
    Regenerate {
        /// Template id
        template_id: i64,
    },
}

#[derive(Subcommand)]
enum RenderCommand {
    /// Write a template's generated map to HTML files
    Export {
        /// Template id
        template_id: i64,
        /// Output directory (defaults to `<data dir>/renders`)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn parse_encoding(s: &str) -> Result<TextEncoding, String> {
    s.parse().map_err(|_| format!("unknown encoding: {s}"))
}

#[tokio::main]
async fn main() -> CliResult {
    let multi = cartoforge_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Archive { command } => run_archive(command)?,
        Commands::Dataset { command } => run_dataset(&*open_store()?, command)?,
        Commands::Ingest { version_ids } => run_ingest(&open_store()?, &multi, version_ids).await?,
        Commands::Features { command } => run_features(&*open_store()?, &command)?,
        Commands::Template { command } => run_template(&*open_store()?, command)?,
        Commands::Generate { template_id, force } => {
            let orchestrator = Arc::new(Orchestrator::new(open_store()?));
            if force {
                orchestrator.request_regeneration(template_id)?;
            }
            let report = orchestrator.spawn(template_id).await??;
            println!(
                "Generated '{}' (render {}): {} layers, {} features",
                report.render_name, report.render_id, report.layers, report.features
            );
        }
        Commands::GeneratePending => {
            let orchestrator = Arc::new(Orchestrator::new(open_store()?));
            let runs = orchestrator.generate_pending().await?;
            if runs.is_empty() {
                println!("No pending templates.");
                return Ok(());
            }

            let mut failed = 0;
            for run in &runs {
                match &run.result {
                    Ok(report) => println!(
                        "{:<6} {:<30} OK     render {}",
                        run.template_id, run.name, report.render_id
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("{:<6} {:<30} FAILED {e}", run.template_id, run.name);
                    }
                }
            }
            println!("\n{} generated, {failed} failed", runs.len() - failed);
        }
        Commands::Revoke { template_id } => {
            let orchestrator = Orchestrator::new(open_store()?);
            if orchestrator.revoke(template_id)? {
                println!("Revoked generation of template {template_id}");
            } else {
                println!("Template {template_id} has no running generation");
            }
        }
        Commands::Kill => {
            let orchestrator = Orchestrator::new(open_store()?);
            let revoked = orchestrator.kill_running()?;
            println!("Revoked {} generation(s)", revoked.len());
        }
        Commands::Render { command } => run_render(&*open_store()?, command)?,
    }

    Ok(())
}

fn open_store() -> Result<Arc<DuckDbStore>, DbError> {
    let store = DuckDbStore::open_default()?;
    log::debug!("Using database {}", paths::database_path().display());
    Ok(Arc::new(store))
}

fn run_archive(command: ArchiveCommand) -> CliResult {
    match command {
        ArchiveCommand::Validate { path } => {
            cartoforge_archive::validate(&path)?;
            println!("{} is a valid shapefile archive", path.display());
        }
        ArchiveCommand::Sanitize { path } => {
            let removed = cartoforge_archive::sanitize(&path)?;
            println!("Removed {removed} entries from {}", path.display());
        }
        ArchiveCommand::List { path } => {
            for shapefile in cartoforge_archive::list_shapefiles(&path)? {
                println!("{shapefile}");
            }
        }
    }
    Ok(())
}

fn run_dataset(store: &DuckDbStore, command: DatasetCommand) -> CliResult {
    match command {
        DatasetCommand::Add {
            name,
            archive,
            version,
            encoding,
        } => {
            cartoforge_archive::validate(&archive)?;
            let created = store.create_version(&DatasetVersion {
                id: None,
                dataset_name: name,
                version_number: version,
                archive_path: archive.display().to_string(),
                encoding,
                ingestion_status: IngestionStatus::Pending,
                task_id: None,
                error: None,
            })?;
            println!(
                "Registered {} v{} as dataset version {}",
                created.dataset_name,
                created.version_number,
                created.id.unwrap_or_default()
            );
        }
        DatasetCommand::Layers { version_id } => {
            let layers = store.layers_for_version(version_id)?;
            if layers.is_empty() {
                println!("No layers found.");
                return Ok(());
            }

            println!(
                "{:<6} {:<30} {:<18} {:<10} STATUS",
                "ID", "NAME", "GEOMETRY", "FEATURES"
            );
            println!("{}", "-".repeat(80));
            for layer in &layers {
                println!(
                    "{:<6} {:<30} {:<18} {:<10} {}",
                    layer.id.unwrap_or_default(),
                    layer.name,
                    layer.geometry_type.to_string(),
                    layer.feature_count,
                    layer.generation_status
                );
            }
        }
    }
    Ok(())
}

async fn run_ingest(
    store: &Arc<DuckDbStore>,
    multi: &MultiProgress,
    version_ids: Vec<i64>,
) -> CliResult {
    let config = IngestConfig::from_env()?;
    let work_dir = paths::datasets_dir();

    let steps = IndicatifProgress::steps_bar(multi, "Dataset versions", version_ids.len() as u64);
    for version_id in version_ids {
        let progress = IndicatifProgress::layers_bar(multi, &format!("Version {version_id}"));
        let store = Arc::clone(store);
        let config = config.clone();
        let work_dir = work_dir.clone();
        let task_id = uuid::Uuid::new_v4().to_string();

        let report = tokio::task::spawn_blocking(move || {
            cartoforge_ingest::ingest_dataset_version(
                store.as_ref(),
                version_id,
                &work_dir,
                Some(&task_id),
                &config,
                &progress,
            )
        })
        .await??;

        for layer in &report.layers {
            log::info!(
                "{}: {} features ({} rejected, {} skipped) from EPSG:{}",
                layer.name,
                layer.ingested,
                layer.rejected,
                layer.skipped,
                layer.srid
            );
        }
        steps.inc(1);
    }
    steps.finish("Ingestion complete".to_string());

    Ok(())
}

fn run_features(store: &DuckDbStore, command: &FeaturesCommand) -> CliResult {
    let (FeaturesCommand::Count { layer, version } | FeaturesCommand::Clear { layer, version }) =
        command;
    let filter = FeatureFilter {
        layer_id: *layer,
        dataset_version_id: *version,
    };

    match command {
        FeaturesCommand::Count { .. } => println!("{}", store.count(&filter)?),
        FeaturesCommand::Clear { .. } => {
            let deleted = store.clear(&filter)?;
            println!("Deleted {deleted} features");
        }
    }
    Ok(())
}

fn run_template(store: &DuckDbStore, command: TemplateCommand) -> CliResult {
    match command {
        TemplateCommand::Import { path } => {
            let text = std::fs::read_to_string(&path)?;
            let template: MapTemplate = from_json(&text)?;
            let mut record = template.to_persisted();
            record.id = store
                .find_template_by_name(&record.name)?
                .and_then(|existing| existing.id);
            let replacing = record.id.is_some();

            let id = store.save_template(&record)?;
            if replacing {
                println!("Updated template '{}' ({id})", record.name);
            } else {
                println!("Imported template '{}' ({id})", record.name);
            }
        }
        TemplateCommand::Export { template_id } => {
            let record = store
                .get_template(template_id)?
                .ok_or_else(|| format!("Template not found: {template_id}"))?;
            let template = MapTemplate::from_persisted(&record)?;
            println!("{}", to_json_pretty(&template)?);
        }
        TemplateCommand::Regenerate { template_id } => {
            if store.request_regeneration(template_id)? {
                println!("Template {template_id} queued for regeneration");
            } else {
                println!("Template {template_id} is running; try again once it finishes");
            }
        }
    }
    Ok(())
}

fn run_render(store: &DuckDbStore, command: RenderCommand) -> CliResult {
    let RenderCommand::Export { template_id, out } = command;
    let render = store
        .render_for_template(template_id)?
        .ok_or_else(|| format!("Template {template_id} has no render yet"))?;

    let dir = out.unwrap_or_else(paths::renders_dir);
    paths::ensure_dir(&dir)?;

    let full = write_html(&dir, &format!("{}.html", render.slug), &render.full_html)?;
    let embed = write_html(&dir, &format!("{}.embed.html", render.slug), &render.embed_html)?;
    println!("Wrote {} and {}", full.display(), embed.display());
    Ok(())
}

fn write_html(dir: &Path, file_name: &str, html: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(file_name);
    std::fs::write(&path, html)?;
    Ok(path)
}
