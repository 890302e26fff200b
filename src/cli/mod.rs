//! Command-line entry point: argument parsing, subcommand dispatch, and the
//! shared application context every command operates against. One
//! `Cli`/`Commands` pair, global `--data-dir`/`--verbose` flags, and a flat
//! `run()` dispatcher matching each variant to a `cmd_*` function defined
//! under `commands/`.

pub mod commands;
pub mod helpers;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::archive::{ArchiveClient, ArchiveClientConfig};
use crate::config::Settings;
use crate::connector::Connector;
use crate::error::Result;
use crate::ocr::OcrEngine;
use crate::repository::migrations::{run_migrations, MAIN_MIGRATIONS, REPOSITORY_MIGRATIONS};
use crate::repository::pool::DbPool;
use crate::repository::queue::WorkQueue;
use crate::repository::RepositoryStore;
use crate::search::SearchIndex;

#[derive(Parser)]
#[command(name = "chronpipe")]
#[command(about = "Historical newspaper acquisition, OCR, and enrichment pipeline")]
#[command(version)]
pub struct Cli {
    /// Root data directory; overrides the config file's own paths.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to a JSON or YAML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Checked before logging is configured, since `tracing_subscriber` isn't
/// set up yet when `main` decides the default filter.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create data directories and apply database migrations.
    Setup,

    /// Fetch pages from the archive for a publication and enqueue OCR.
    Download {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        publication: String,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
        #[arg(long)]
        max_items: Option<usize>,
    },

    /// Enqueue OCR for a publication's pages (segmentation follows automatically).
    Process {
        #[arg(long)]
        publication: String,
        /// Re-enqueue OCR even for pages already past the `new` status.
        #[arg(long)]
        reprocess: bool,
    },

    /// Enqueue segmentation directly for pages whose OCR is already done.
    ExtractEntities {
        #[arg(long)]
        publication: String,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },

    /// Query the full-text search index.
    Search {
        query: String,
        #[arg(long, default_value = "all")]
        source: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        fuzzy: bool,
        #[arg(long, default_value_t = 70)]
        threshold: u8,
    },

    /// List pages held by the repository store.
    List {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        publication: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Export pages and their segments to a file.
    Export {
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "json")]
        format: String,
        #[arg(long)]
        publication: Option<String>,
    },

    /// Import pages from an external CSV or SQLite source.
    Import {
        #[arg(long)]
        source_type: String,
        #[arg(long)]
        source_path: PathBuf,
        #[arg(long)]
        mapping: Option<String>,
    },

    /// Run queue and search-index maintenance.
    Maintenance {
        #[arg(long)]
        vacuum: bool,
        #[arg(long)]
        analyze: bool,
        #[arg(long)]
        rebuild_index: bool,
    },

    /// Copy the repository and main databases to a backup directory.
    Backup {
        #[arg(long)]
        output: PathBuf,
    },

    /// Control the pipeline worker service.
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Manage bulk task groups in the work queue.
    Bulk {
        #[command(subcommand)]
        command: BulkCommands,
    },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Run the worker pool in the foreground until interrupted.
    Start,
    /// Request a running service to shut down.
    Stop,
    /// Report whether a service is running, paused, and queue health.
    Status,
    /// Pause a running service's workers.
    Pause,
    /// Resume a paused service.
    Resume,
}

#[derive(Subcommand)]
enum BulkCommands {
    Create {
        description: String,
        operation: String,
    },
    /// Add more tasks to an existing bulk group, sourced from a
    /// publication's pages eligible for the bulk's own operation.
    Add {
        bulk_id: String,
        #[arg(long)]
        publication: String,
    },
    Status {
        bulk_id: String,
    },
    Pause {
        bulk_id: String,
    },
    Resume {
        bulk_id: String,
    },
    Cancel {
        bulk_id: String,
    },
    RetryFailed {
        bulk_id: String,
    },
}

/// Everything a command needs: settings plus the five long-lived
/// components, built once per invocation.
pub struct AppContext {
    pub settings: Settings,
    pub repo: Arc<RepositoryStore>,
    pub queue: WorkQueue,
    pub search: Arc<SearchIndex>,
    pub connector: Arc<Connector>,
    pub archive: Arc<ArchiveClient>,
    pub ocr: Arc<dyn OcrEngine>,
    pub main_pool: DbPool,
}

async fn build_context(data_dir: Option<PathBuf>, config: Option<PathBuf>) -> Result<AppContext> {
    let mut settings = match config {
        Some(path) => Settings::load(&path)?,
        None => {
            let mut s = Settings::default();
            s.apply_env_overrides();
            s
        }
    };
    if let Some(dir) = data_dir {
        settings.repository_path = dir.join("repository");
        settings.database_path = dir.join("repository.sqlite");
        settings.search_index_path = dir.join("search_index");
        settings.main_database_path = dir.join("main.sqlite");
    }
    settings.ensure_directories()?;

    let repo_pool = DbPool::from_path(&settings.database_path);
    run_migrations(repo_pool.database_url(), REPOSITORY_MIGRATIONS).await?;
    let main_pool = DbPool::from_path(&settings.main_database_path);
    run_migrations(main_pool.database_url(), MAIN_MIGRATIONS).await?;

    let repo = Arc::new(RepositoryStore::new(repo_pool.clone(), settings.repository_path.clone()));
    let queue = WorkQueue::new(repo_pool);
    let search = Arc::new(SearchIndex::open_or_create(&settings.search_index_path)?);
    let connector = Arc::new(Connector::new(repo.clone(), main_pool.clone()));
    let archive = Arc::new(ArchiveClient::new(ArchiveClientConfig {
        rate_limit_per_sec: settings.downloader.rate_limit,
        earliest_date_cache_path: Some(settings.repository_path.join("earliest_date_cache.json")),
        max_attempts: settings.downloader.retry_attempts,
        ..Default::default()
    })?);
    let ocr: Arc<dyn OcrEngine> = Arc::new(crate::ocr::ConcurrencyLimitedEngine::new(
        crate::ocr::default_engine(),
        settings.ocr.max_workers,
    ));

    Ok(AppContext {
        settings,
        repo,
        queue,
        search,
        connector,
        archive,
        ocr,
        main_pool,
    })
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ctx = build_context(cli.data_dir, cli.config).await?;

    let result = match cli.command {
        Commands::Setup => commands::setup::cmd_setup(&ctx).await,
        Commands::Download {
            source,
            publication,
            start_date,
            end_date,
            max_items,
        } => commands::download::cmd_download(&ctx, source, publication, start_date, end_date, max_items).await,
        Commands::Process { publication, reprocess } => {
            commands::process::cmd_process(&ctx, publication, reprocess).await
        }
        Commands::ExtractEntities {
            publication,
            start_date,
            end_date,
        } => commands::process::cmd_extract_entities(&ctx, publication, start_date, end_date).await,
        Commands::Search {
            query,
            source,
            limit,
            offset,
            fuzzy,
            threshold,
        } => commands::search_cmd::cmd_search(&ctx, query, source, limit, offset, fuzzy, threshold).await,
        Commands::List {
            source,
            publication,
            limit,
            offset,
        } => commands::list_cmd::cmd_list(&ctx, source, publication, limit, offset).await,
        Commands::Export { output, format, publication } => {
            commands::export_cmd::cmd_export(&ctx, output, format, publication).await
        }
        Commands::Import {
            source_type,
            source_path,
            mapping,
        } => commands::import_cmd::cmd_import(&ctx, source_type, source_path, mapping).await,
        Commands::Maintenance {
            vacuum,
            analyze,
            rebuild_index,
        } => commands::maintenance::cmd_maintenance(&ctx, vacuum, analyze, rebuild_index).await,
        Commands::Backup { output } => commands::backup::cmd_backup(&ctx, output).await,
        Commands::Service { command } => match command {
            ServiceCommands::Start => commands::service_cmd::cmd_start(&ctx).await,
            ServiceCommands::Stop => commands::service_cmd::cmd_stop(&ctx).await,
            ServiceCommands::Status => commands::service_cmd::cmd_status(&ctx).await,
            ServiceCommands::Pause => commands::service_cmd::cmd_pause(&ctx).await,
            ServiceCommands::Resume => commands::service_cmd::cmd_resume(&ctx).await,
        },
        Commands::Bulk { command } => match command {
            BulkCommands::Create { description, operation } => {
                commands::bulk_cmd::cmd_create(&ctx, description, operation).await
            }
            BulkCommands::Add { bulk_id, publication } => {
                commands::bulk_cmd::cmd_add(&ctx, bulk_id, publication).await
            }
            BulkCommands::Status { bulk_id } => commands::bulk_cmd::cmd_status(&ctx, bulk_id).await,
            BulkCommands::Pause { bulk_id } => commands::bulk_cmd::cmd_pause(&ctx, bulk_id).await,
            BulkCommands::Resume { bulk_id } => commands::bulk_cmd::cmd_resume(&ctx, bulk_id).await,
            BulkCommands::Cancel { bulk_id } => commands::bulk_cmd::cmd_cancel(&ctx, bulk_id).await,
            BulkCommands::RetryFailed { bulk_id } => commands::bulk_cmd::cmd_retry_failed(&ctx, bulk_id).await,
        },
    };

    result.map_err(Into::into)
}
