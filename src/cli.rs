use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use starload::config::{
    DbOverrides, DbSettings, PROCESSED_SCHEMA, PipelineConfig, RAW_SCHEMA, SinkConfig, SourceConfig,
};
use starload::dimension::KeyOrder;
use starload::ingest::{RAW_TABLE, ingest_raw};
use starload::pipeline;
use starload::plan::BuildPlan;
use starload::sink::{FileFormat, PostgresSink};
use starload::summary::{RunStatus, RunSummary};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "starload",
    version,
    about = "Load retail sales data and reshape it into a star schema"
)]
pub struct Cli {
    /// Directory for log files. Defaults to the platform data directory.
    #[arg(long, global = true, env = "STARLOAD_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the star schema from the raw record set and write it
    Transform(TransformArgs),

    /// Copy a raw sales file into the raw store (`raw.sales_raw`)
    Ingest {
        /// Excel workbook, CSV, Parquet or JSON file to load
        #[arg(short, long)]
        file: PathBuf,

        /// Target schema
        #[arg(long, default_value = RAW_SCHEMA)]
        schema: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Ingest a file into the raw store, then transform it into the
    /// processed schema
    Run {
        /// Excel workbook, CSV, Parquet or JSON file to load
        #[arg(short, long)]
        file: PathBuf,

        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum)]
        key_order: Option<KeyOrder>,

        #[arg(long)]
        max_unresolved_ratio: Option<f64>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Print the table build order
    Plan,
}

#[derive(Args)]
pub struct TransformArgs {
    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read the raw record set from a file instead of the database
    #[arg(short, long, conflicts_with = "from_db")]
    input: Option<PathBuf>,

    /// Read the raw record set from the `sales_raw` table
    #[arg(long)]
    from_db: bool,

    /// Schema holding `sales_raw` for --from-db. Defaults to the configured
    /// source schema, then `raw`.
    #[arg(long, requires = "from_db")]
    source_schema: Option<String>,

    /// Write one file per table into this directory
    #[arg(short, long, conflicts_with_all = ["to_db", "dry_run"])]
    output_dir: Option<PathBuf>,

    #[arg(long, value_enum, requires = "output_dir")]
    format: Option<FileFormat>,

    /// Write the tables into a Postgres schema
    #[arg(long, conflicts_with = "dry_run")]
    to_db: bool,

    /// Target schema for --to-db
    #[arg(long, requires = "to_db")]
    schema: Option<String>,

    /// Build every table in memory without writing it anywhere
    #[arg(long)]
    dry_run: bool,

    #[arg(long, value_enum)]
    key_order: Option<KeyOrder>,

    /// Largest tolerated share of rows with unresolved foreign keys (0.0 to 1.0)
    #[arg(long)]
    max_unresolved_ratio: Option<f64>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    db: DbArgs,
}

/// Connection flags. Unset flags fall back to the config file, then to the
/// `POSTGRES_*` environment variables.
#[derive(Args)]
pub struct DbArgs {
    #[arg(long)]
    db_host: Option<String>,

    #[arg(long)]
    db_port: Option<u16>,

    #[arg(long)]
    db_user: Option<String>,

    #[arg(long)]
    db_name: Option<String>,
}

impl DbArgs {
    fn resolve_with(self, file: &DbOverrides, env: DbSettings) -> DbSettings {
        let flags = DbOverrides {
            host: self.db_host,
            port: self.db_port,
            user: self.db_user,
            password: None,
            database: self.db_name,
        };
        flags.over(file.over(env))
    }

    fn resolve(self, file: &DbOverrides) -> DbSettings {
        self.resolve_with(file, DbSettings::from_env_defaults())
    }
}

impl TransformArgs {
    /// Apply the flags on top of the file configuration. The connection
    /// flags are handed back for resolution against the environment.
    fn apply(self, mut config: PipelineConfig) -> (PipelineConfig, DbArgs) {
        if let Some(input) = self.input {
            config.source = SourceConfig::File { path: input };
        } else if self.from_db {
            let configured = match config.source {
                SourceConfig::Postgres { schema, .. } => Some(schema),
                SourceConfig::File { .. } => None,
            };
            config.source = SourceConfig::Postgres {
                schema: self
                    .source_schema
                    .or(configured)
                    .unwrap_or_else(|| RAW_SCHEMA.to_owned()),
                table: RAW_TABLE.to_owned(),
            };
        }

        if let Some(dir) = self.output_dir {
            config.sink = SinkConfig::Directory {
                path: dir,
                format: self.format.unwrap_or_default(),
            };
        } else if self.to_db {
            config.sink = SinkConfig::Postgres {
                schema: self.schema.unwrap_or_else(|| PROCESSED_SCHEMA.to_owned()),
            };
        } else if self.dry_run {
            config.sink = SinkConfig::Memory;
        }

        if let Some(order) = self.key_order {
            config.key_order = order;
        }
        if let Some(ratio) = self.max_unresolved_ratio {
            config.max_unresolved_ratio = ratio;
        }
        (config, self.db)
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

pub fn log_dir_from_config(command: &Commands) -> Option<PathBuf> {
    let path = match command {
        Commands::Transform(args) => args.config.as_ref(),
        Commands::Run { config, .. } => config.as_ref(),
        Commands::Ingest { .. } | Commands::Plan => None,
    }?;
    load_config(Some(path)).ok()?.log_dir
}

pub async fn run_command(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Transform(args) => handle_transform(args).await,
        Commands::Ingest { file, schema, db } => handle_ingest(file, schema, db).await,
        Commands::Run {
            file,
            config,
            key_order,
            max_unresolved_ratio,
            json,
            db,
        } => handle_run(file, config, key_order, max_unresolved_ratio, json, db).await,
        Commands::Plan => {
            println!("{}", BuildPlan::new());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn handle_transform(args: TransformArgs) -> Result<ExitCode> {
    let file_config = load_config(args.config.as_ref())?;
    let json = args.json;
    let (config, db_args) = args.apply(file_config);
    let db = db_args.resolve(&config.database);

    let summary = pipeline::run_configured(&config, &db).await?;
    Ok(report(&summary, json))
}

async fn handle_ingest(file: PathBuf, schema: String, db: DbArgs) -> Result<ExitCode> {
    let settings = db.resolve(&DbOverrides::default());
    tracing::info!(database = %settings.describe(), "Connecting to raw store");
    let sink = PostgresSink::connect(settings.connect_options(), schema.clone()).await?;

    let rows = ingest_raw(&file, &sink).await?;
    println!("Loaded {rows} rows into {schema}.{RAW_TABLE}");
    Ok(ExitCode::SUCCESS)
}

async fn handle_run(
    file: PathBuf,
    config_path: Option<PathBuf>,
    key_order: Option<KeyOrder>,
    max_unresolved_ratio: Option<f64>,
    json: bool,
    db: DbArgs,
) -> Result<ExitCode> {
    let mut config = load_config(config_path.as_ref())?;
    let db = db.resolve(&config.database);
    if let Some(order) = key_order {
        config.key_order = order;
    }
    if let Some(ratio) = max_unresolved_ratio {
        config.max_unresolved_ratio = ratio;
    }

    tracing::info!(database = %db.describe(), "Connecting to raw store");
    let raw_sink = PostgresSink::connect(db.connect_options(), RAW_SCHEMA).await?;
    let rows = ingest_raw(&file, &raw_sink).await?;
    raw_sink.pool().close().await;
    println!("Loaded {rows} rows into {RAW_SCHEMA}.{RAW_TABLE}");

    config.source = SourceConfig::Postgres {
        schema: RAW_SCHEMA.to_owned(),
        table: RAW_TABLE.to_owned(),
    };
    if !matches!(config.sink, SinkConfig::Postgres { .. }) {
        config.sink = SinkConfig::default();
    }

    let summary = pipeline::run_configured(&config, &db).await?;
    Ok(report(&summary, json))
}

fn report(summary: &RunSummary, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize run summary"),
        }
    } else {
        println!("{}", summary.summary());
    }

    match summary.status {
        RunStatus::Failed => ExitCode::FAILURE,
        RunStatus::Success | RunStatus::Partial => ExitCode::SUCCESS,
    }
}
