use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use disaster_lakehouse::app::{ExportUseCase, IngestReport, IngestUseCase};
use disaster_lakehouse::config::Config;
use disaster_lakehouse::domain::SourceKind;
use disaster_lakehouse::error::{exit_code, EXIT_TEMPFAIL};
use disaster_lakehouse::infra::{FileBatchSource, FsArchiver, JsonFileSink};
use disaster_lakehouse::logging;
use disaster_lakehouse::observability;
use disaster_lakehouse::pipeline::analysis::AnalysisEngine;
use disaster_lakehouse::pipeline::storage::{FsTableStore, TableStore, WriteMode};
use disaster_lakehouse::server;

#[derive(Parser)]
#[command(name = "disaster_lakehouse")]
#[command(about = "Disaster incident and farmer registry lakehouse")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./lakehouse.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest incident batches into the incident table
    Import {
        /// append or overwrite
        #[arg(long)]
        mode: Option<WriteMode>,
        /// Directory to read batches from
        #[arg(long)]
        input_dir: Option<PathBuf>,
    },
    /// Ingest farmer registry sheets, partitioned by province
    ImportRegistry {
        /// append, overwrite or dynamic_overwrite
        #[arg(long)]
        mode: Option<WriteMode>,
        #[arg(long)]
        input_dir: Option<PathBuf>,
    },
    /// Load the designated error file into the quarantine table
    ImportErrors {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Write the default analysis to a static JSON file
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the HTTP query service
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Drop old snapshots and unreferenced data files
    Vacuum {
        /// Only this table (default: every table)
        #[arg(long)]
        table: Option<String>,
        /// Snapshots to keep per table
        #[arg(long)]
        retain: Option<usize>,
    },
    /// Print table metadata as JSON
    Describe {
        #[arg(long)]
        table: Option<String>,
    },
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn TableStore>> {
    let store = FsTableStore::open(&config.storage.root, config.storage.lock_policy())
        .with_context(|| format!("opening storage root {}", config.storage.root.display()))?
        .with_vacuum_grace(config.storage.vacuum_grace());
    Ok(Arc::new(store))
}

async fn run_ingest(
    config: &Config,
    kind: SourceKind,
    mode: Option<WriteMode>,
) -> anyhow::Result<IngestReport> {
    let store = open_store(config)?;
    let use_case = IngestUseCase::new(
        Arc::new(FileBatchSource::from_config(&config.ingest)),
        Arc::new(FsArchiver),
        store,
        config.tables.clone(),
    );
    let report = use_case
        .run(kind, mode)
        .await
        .with_context(|| format!("{} ingestion failed", kind))?;

    println!("{} ingestion ({})", kind, report.mode);
    println!("   Files processed: {}", report.files_processed.len());
    println!("   Rows written:    {}", report.rows_written);
    println!("   Quarantined:     {}", report.rows_quarantined);
    println!("   Skipped:         {}", report.rows_skipped);
    if !report.files_failed.is_empty() {
        warn!("{} file(s) failed", report.files_failed.len());
        for failure in &report.files_failed {
            println!("   Failed: {} ({})", failure.file, failure.error);
        }
    }
    Ok(report)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Import { mode, input_dir } => {
            if let Some(dir) = input_dir {
                config.ingest.raw_data_dir = dir;
            }
            run_ingest(&config, SourceKind::Incident, mode).await?;
        }
        Commands::ImportRegistry { mode, input_dir } => {
            if let Some(dir) = input_dir {
                config.ingest.registry_input_dir = dir;
            }
            run_ingest(&config, SourceKind::Registry, mode).await?;
        }
        Commands::ImportErrors { file } => {
            if let Some(file) = file {
                config.ingest.error_input_file = file;
            }
            run_ingest(&config, SourceKind::ErrorFile, None).await?;
        }
        Commands::Export { output } => {
            let output = output.unwrap_or_else(|| config.export.output_file.clone());
            let engine = AnalysisEngine::with_tables(
                open_store(&config)?,
                &config.tables.incidents.name,
                &config.tables.registry.name,
            );
            let report = ExportUseCase::new(engine, Arc::new(JsonFileSink::new(output)))
                .run()
                .await
                .context("export failed")?;
            println!(
                "Exported {} group(s) ({} bytes) to {}",
                report.groups,
                report.bytes,
                report.path.display()
            );
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let handle = observability::init_metrics();
            server::serve(&config, handle).await?;
        }
        Commands::Vacuum { table, retain } => {
            let store = open_store(&config)?;
            let retain = retain.unwrap_or(config.storage.retain_versions);
            let tables = match table {
                Some(t) => vec![t],
                None => store.list_tables().await?,
            };
            for table in tables {
                let report = store
                    .vacuum(&table, retain)
                    .await
                    .with_context(|| format!("vacuuming {}", table))?;
                println!(
                    "{}: removed {} snapshot(s), {} file(s), {} bytes",
                    report.table, report.versions_removed, report.files_removed, report.bytes_freed
                );
            }
        }
        Commands::Describe { table } => {
            let store = open_store(&config)?;
            let tables = match table {
                Some(t) => vec![t],
                None => store.list_tables().await?,
            };
            let mut infos = Vec::new();
            for table in tables {
                match store.describe(&table).await? {
                    Some(info) => infos.push(info),
                    None => warn!("Table {} does not exist", table),
                }
            }
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();
    let _guard = logging::init_logging("logs");

    let cli = Cli::parse();
    info!("disaster_lakehouse {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        let code = exit_code(&e);
        if code == EXIT_TEMPFAIL {
            warn!("Another writer holds the table lock; retry later");
        }
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(code);
    }
}
