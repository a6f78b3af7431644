use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use service_archive::{
    detect_format, DuplicatePolicy, ImportConfig, ImportExecutor, ImportOptions, ImportStats,
    ServiceFilter, ServiceStore, SourceFormat, SqliteStore,
};

/// Command-line arguments for service-archive
#[derive(Parser, Debug)]
#[command(name = "service-archive")]
#[command(about = "Import historical tailoring-service records into the live database")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "SERVICE_ARCHIVE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides config)
    #[arg(long, global = true, env = "SERVICE_ARCHIVE_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import one legacy export (dry run unless --commit)
    Import {
        /// tab | space | rows (guessed from the file name when omitted)
        #[arg(short, long)]
        format: Option<String>,

        /// Source file (defaults to the configured path for the format)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Write records instead of previewing them
        #[arg(long)]
        commit: bool,

        /// Amount difference still treated as a duplicate
        #[arg(long)]
        tolerance: Option<f64>,

        /// Write every record without duplicate checks
        #[arg(long)]
        allow_duplicates: bool,
    },

    /// Print stored record counts by year and type
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "service_archive=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = ImportConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    let db_path = args.db.clone().unwrap_or_else(|| config.database_path.clone());

    match args.command {
        Command::Import {
            format,
            file,
            commit,
            tolerance,
            allow_duplicates,
        } => {
            let format = resolve_format(format.as_deref(), file.as_ref())?;
            let path = file.unwrap_or_else(|| config.default_paths.for_format(format).to_path_buf());

            let mut options = ImportOptions::from_config(&config);
            options.dry_run = !commit;
            if let Some(t) = tolerance {
                options.tolerance = t;
            }
            if allow_duplicates {
                options.policy = DuplicatePolicy::ImportAll;
            }

            let mut store = SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {}", db_path.display()))?;
            info!("Database opened: {}", db_path.display());

            let executor = ImportExecutor::from_config(&config);
            let report = executor.run(format, &path, &options, &mut store)?;

            info!("{}", report.summary());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats => {
            let store = SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {}", db_path.display()))?;
            let records = store.get_services(&ServiceFilter::all())?;
            let stats = ImportStats::from_records(&records);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

fn resolve_format(name: Option<&str>, file: Option<&PathBuf>) -> Result<SourceFormat> {
    match (name, file) {
        (Some(n), _) => SourceFormat::from_name(n).ok_or_else(|| anyhow!("unknown format '{}'", n)),
        (None, Some(path)) => Ok(detect_format(path)?),
        (None, None) => Err(anyhow!("either --format or --file is required")),
    }
}
