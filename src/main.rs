//! CLI entry point for the flight KPI pipeline.
//!
//! `run` executes all four stages for one logical date. The per-stage
//! subcommands let an external scheduler invoke stages one process at a time;
//! they share the run's persisted handoff channel.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use flight_kpi_pipeline::artifacts::latest_artifact;
use flight_kpi_pipeline::config::{DEFAULT_API_URL, DEFAULT_CONN_ID, PipelineConfig};
use flight_kpi_pipeline::context::RunContext;
use flight_kpi_pipeline::fetch::BasicClient;
use flight_kpi_pipeline::pipeline::{Pipeline, Stage};
use flight_kpi_pipeline::stages::InputSource;
use flight_kpi_pipeline::warehouse::{ConnectionStore, SqliteConnector};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "flight_kpi_pipeline")]
#[command(about = "Daily flight-state ETL: bronze, silver, gold, warehouse", long_about = None)]
struct Cli {
    /// Root directory for all artifact tiers
    #[arg(long, env = "FLIGHT_DATA_DIR", default_value = "data", global = true)]
    data_dir: PathBuf,

    /// State-vector endpoint of the flight-tracking API
    #[arg(long, env = "OPENSKY_URL", default_value = DEFAULT_API_URL, global = true)]
    api_url: String,

    /// JSON file of named connection profiles
    #[arg(long, env = "FLIGHT_CONNECTIONS_FILE", default_value = "connections.json", global = true)]
    connections: PathBuf,

    /// Connection profile used by the load stage
    #[arg(long, env = "FLIGHT_CONN_ID", default_value = DEFAULT_CONN_ID, global = true)]
    conn_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Logical run date (defaults to the previous UTC day)
    #[arg(long, value_name = "YYYY-MM-DD")]
    date: Option<NaiveDate>,
}

#[derive(Args)]
struct StageArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Read the newest upstream artifact instead of the run's handoff value
    #[arg(long, default_value_t = false)]
    discover: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all four stages in order
    Run {
        #[command(flatten)]
        run: RunArgs,

        /// Retries per stage before the run is aborted
        #[arg(long, default_value_t = 1)]
        retries: u32,

        /// Seconds to wait between retries
        #[arg(long, default_value_t = 300)]
        retry_delay_secs: u64,
    },
    /// Fetch state vectors into the bronze tier
    Ingest {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Project bronze states into the silver tier
    Refine {
        #[command(flatten)]
        args: StageArgs,
    },
    /// Aggregate silver rows into per-country gold KPIs
    Aggregate {
        #[command(flatten)]
        args: StageArgs,
    },
    /// Insert gold KPIs into the warehouse
    Load {
        #[command(flatten)]
        args: StageArgs,
    },
    /// Print the artifact directory discovery would pick for a tier
    Latest {
        #[arg(value_enum)]
        tier: Tier,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Tier {
    Bronze,
    Silver,
    Gold,
}

impl RunArgs {
    fn context(&self) -> RunContext {
        self.date
            .map(RunContext::for_date)
            .unwrap_or_else(RunContext::previous_day)
    }
}

impl StageArgs {
    fn source(&self) -> InputSource {
        if self.discover {
            InputSource::Discover
        } else {
            InputSource::Handoff
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/flight_kpi_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("flight_kpi_pipeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::new(cli.data_dir);
    config.api_url = cli.api_url;
    config.connections_file = cli.connections;
    config.conn_id = cli.conn_id;

    if let Commands::Latest { tier } = cli.command {
        let dir = match tier {
            Tier::Bronze => config.bronze_dir(),
            Tier::Silver => config.silver_dir(),
            Tier::Gold => config.gold_dir(),
        };
        let extension = if matches!(tier, Tier::Bronze) { "json" } else { "csv" };
        match latest_artifact(&dir, extension)? {
            Some(path) => println!("{}", path.display()),
            None => info!(dir = %dir.display(), "No artifact found"),
        }
        return Ok(());
    }

    if let Commands::Run {
        retries,
        retry_delay_secs,
        ..
    } = &cli.command
    {
        config.retry.retries = *retries;
        config.retry.delay = Duration::from_secs(*retry_delay_secs);
    }

    let pipeline = Pipeline {
        client: BasicClient::new()?,
        connector: SqliteConnector::new(config.default_warehouse_path()),
        connections: ConnectionStore::load(&config.connections_file)?,
        config,
    };

    let (stage, args) = match cli.command {
        Commands::Run { run, .. } => {
            let ctx = run.context();
            info!(date = %ctx.logical_date, window_start = %ctx.window_start, "Starting run");
            pipeline.run(&ctx).await?;
            return Ok(());
        }
        Commands::Ingest { run } => (
            Stage::Ingest,
            StageArgs {
                run,
                discover: false,
            },
        ),
        Commands::Refine { args } => (Stage::Refine, args),
        Commands::Aggregate { args } => (Stage::Aggregate, args),
        Commands::Load { args } => (Stage::Load, args),
        Commands::Latest { .. } => return Ok(()),
    };

    let ctx = args.run.context();
    let mut handoff = pipeline.stage_handoff(stage, &ctx)?;
    let outcome = pipeline
        .run_stage(stage, &ctx, args.source(), &mut handoff)
        .await?;
    info!(%stage, ?outcome, "Task finished");

    Ok(())
}
