//! Brickline - production counter reconciliation engine
//!
//! Reconciles cumulative counter logs from brick/tile production lines into
//! stage totals, waste and live line metrics.
//!
//! # Usage
//!
//! ```bash
//! # Live engine + snapshot API (config from $BRICKLINE_CONFIG or ./brickline.toml)
//! brickline run
//!
//! # Recompute from scratch on every tick instead of tailing
//! brickline run --mode polling
//!
//! # One-off daily report of a line
//! brickline analyze --date 2025-11-21 --line DC1 --output dc1.json
//!
//! # Load datastore rows, then analyze from the store
//! brickline import rows.jsonl
//! brickline analyze --line DC1 --source store
//! ```
//!
//! # Environment Variables
//!
//! - `BRICKLINE_CONFIG`: path to the engine config TOML
//! - `BRICKLINE_LOG_FORMAT`: `json` for JSON log lines
//! - `BRICKLINE_CORS_ORIGINS`: comma-separated origins allowed by the API
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use axum::Router;
use chrono::NaiveDate;
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use brickline::acquisition::{IngestError, Ingestor, ReadingStore};
use brickline::api::{create_app, ApiState};
use brickline::config::{EngineConfig, RunMode};
use brickline::pipeline::scheduler::local_today;
use brickline::pipeline::{Engine, MemoryBus, Publisher, WebhookSink};
use brickline::report::{analyze_line, file_ingestor, store_ingestor, LineReport};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "brickline")]
#[command(about = "Production counter reconciliation for brick and tile lines")]
#[command(version)]
struct CliArgs {
    /// Emit JSON log lines (also BRICKLINE_LOG_FORMAT=json)
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (overrides $BRICKLINE_CONFIG and ./brickline.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the engine and the snapshot API until Ctrl+C
    Run {
        /// Override the configured run mode
        #[arg(long, value_enum)]
        mode: Option<RunMode>,
        /// Override the API bind address
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Full daily report of one line
    Analyze {
        #[command(flatten)]
        target: Target,
        /// Where the readings come from
        #[arg(long, value_enum, default_value_t = ReportSource::Files)]
        source: ReportSource,
        /// Quota product (defaults to the line's configured product)
        #[arg(long)]
        product: Option<String>,
        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stage totals and waste of one line
    Waste {
        #[command(flatten)]
        target: Target,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare a line's finished output with its daily quota
    Quota {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        product: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import JSON-lines measurement rows into the reading store
    Import {
        /// File with one `{"device_id", "timestamp", "payload"}` row per line
        file: PathBuf,
        /// Store directory (defaults to engine.data_dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Production date (YYYY-MM-DD, defaults to today)
    #[arg(short, long)]
    date: Option<NaiveDate>,
    /// Production line, e.g. DC1
    #[arg(short, long)]
    line: String,
}

impl Target {
    fn date(&self) -> NaiveDate {
        self.date.unwrap_or_else(local_today)
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ReportSource {
    Files,
    Store,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskName {
    HttpServer,
    Engine,
    SnapshotJanitor,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HttpServer"),
            Self::Engine => write!(f, "Engine"),
            Self::SnapshotJanitor => write!(f, "SnapshotJanitor"),
        }
    }
}

fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

fn spawn_engine(task_set: &mut JoinSet<Result<TaskName>>, engine: Engine, cancel_token: CancellationToken) {
    task_set.spawn(async move {
        info!("[Engine] Task starting");
        let stats = engine.run(cancel_token).await.context("engine stopped")?;
        info!(
            cycles = stats.cycles,
            failed_cycles = stats.failed_cycles,
            publish_failures = stats.publish_failures,
            change_events = stats.change_events,
            rollovers = stats.rollovers,
            "[Engine] Stopped"
        );
        Ok(TaskName::Engine)
    });
}

/// Drop expired snapshots so the store does not grow with retired lines.
fn spawn_snapshot_janitor(
    task_set: &mut JoinSet<Result<TaskName>>,
    bus: Arc<MemoryBus>,
    every: Duration,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = bus.purge_expired().await;
                    if purged > 0 {
                        info!(purged, "[SnapshotJanitor] Dropped expired snapshots");
                    }
                }
            }
        }
        Ok(TaskName::SnapshotJanitor)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring...");

    let mut shutting_down = false;
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => {
                info!("Supervisor: task {} completed", task_name);
                // Any task ending on its own takes the others down with it
                if !shutting_down {
                    shutting_down = true;
                    cancel_token.cancel();
                }
            }
            Ok(Err(e)) => {
                error!("Supervisor: task failed: {:#}", e);
                cancel_token.cancel();
                task_set.shutdown().await;
                return Err(e);
            }
            Err(e) => {
                error!("Supervisor: task panicked: {}", e);
                cancel_token.cancel();
                task_set.shutdown().await;
                return Err(anyhow::anyhow!("task panicked: {}", e));
            }
        }
    }

    info!("Supervisor: all tasks completed");
    Ok(())
}

// ============================================================================
// Subcommands
// ============================================================================

async fn run(mut engine_config: EngineConfig, mode: Option<RunMode>, addr: Option<String>) -> Result<()> {
    if let Some(mode) = mode {
        engine_config.engine.mode = mode;
    }
    if let Some(addr) = addr {
        engine_config.api.addr = addr;
    }
    let cfg = engine_config.clone();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Brickline - production counter reconciliation");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        root = %cfg.engine.log_root.display(),
        mode = %cfg.engine.mode,
        interval_secs = cfg.engine.interval_secs,
        namespace = %cfg.engine.namespace,
        "Engine configuration"
    );

    let bus = Arc::new(MemoryBus::new(cfg.publisher.bus_capacity));
    let mut publisher = Publisher::new(cfg.engine.namespace.clone(), &cfg.publisher).with_sink(bus.clone());
    if let Some(url) = &cfg.publisher.webhook_url {
        let sink = WebhookSink::new(url, Duration::from_millis(cfg.publisher.timeout_ms))
            .with_context(|| format!("building webhook sink for {url}"))?;
        info!(url = %url, "Publishing to webhook");
        publisher = publisher.with_sink(Arc::new(sink));
    }

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    if cfg.api.enabled {
        let listener = tokio::net::TcpListener::bind(&cfg.api.addr)
            .await
            .with_context(|| format!("binding API address {}", cfg.api.addr))?;
        info!("Snapshot API listening on http://{}/api/v1", cfg.api.addr);
        let app = create_app(ApiState::new(bus.clone()));
        spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    } else {
        info!("Snapshot API disabled");
    }

    spawn_snapshot_janitor(
        &mut task_set,
        bus,
        Duration::from_secs(cfg.publisher.snapshot_ttl_secs.max(1)),
        cancel_token.clone(),
    );
    spawn_engine(&mut task_set, Engine::new(engine_config, publisher), cancel_token.clone());

    run_supervisor(&mut task_set, cancel_token).await?;
    info!("Brickline shutdown complete");
    Ok(())
}

fn build_report(
    engine_config: &EngineConfig,
    target: &Target,
    source: ReportSource,
    product: Option<&str>,
) -> Result<LineReport> {
    let date = target.date();
    let ingestor: Box<dyn Ingestor> = match source {
        ReportSource::Files => Box::new(file_ingestor(engine_config, &target.line)),
        ReportSource::Store => {
            let store = ReadingStore::open(&engine_config.engine.data_dir)
                .with_context(|| format!("opening reading store at {}", engine_config.engine.data_dir.display()))?;
            Box::new(store_ingestor(engine_config, store, &target.line))
        }
    };
    match analyze_line(engine_config, ingestor.as_ref(), date, &target.line, product) {
        Ok(report) => Ok(report),
        Err(e @ IngestError::RootUnreadable { .. }) => {
            error!(error = %e, "Source root is unreadable");
            Err(e).context("analysis aborted")
        }
        Err(e) => Err(e).with_context(|| format!("analyzing {} for {}", target.line, date)),
    }
}

fn emit<T: Serialize>(value: &T, output: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing report")?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn import(engine_config: &EngineConfig, file: &PathBuf, data_dir: Option<PathBuf>) -> Result<()> {
    let dir = data_dir.unwrap_or_else(|| engine_config.engine.data_dir.clone());
    let store = ReadingStore::open(&dir).with_context(|| format!("opening reading store at {}", dir.display()))?;
    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    let (imported, skipped) = store
        .import_jsonl(reader)
        .with_context(|| format!("importing {}", file.display()))?;
    info!(imported, skipped, total = store.len(), store = %dir.display(), "Import complete");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = json
        || std::env::var("BRICKLINE_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from_file(path).with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::load()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let engine_config = load_config(args.config.as_ref())?;

    match args.command {
        SubCommand::Run { mode, addr } => run(engine_config, mode, addr).await,
        SubCommand::Analyze {
            target,
            source,
            product,
            output,
        } => {
            let report = build_report(&engine_config, &target, source, product.as_deref())?;
            if report.failed_sources > 0 {
                warn!(failed = report.failed_sources, "Some sources could not be read");
            }
            emit(&report, output.as_ref())
        }
        SubCommand::Waste { target, output } => {
            let report = build_report(&engine_config, &target, ReportSource::Files, None)?;
            for bucket in report.waste.alerts() {
                warn!(line = %report.line, bucket = %bucket.name, percent = bucket.percent, "Waste above alert threshold");
            }
            emit(&report.waste, output.as_ref())
        }
        SubCommand::Quota {
            target,
            product,
            output,
        } => {
            let report = build_report(&engine_config, &target, ReportSource::Files, product.as_deref())?;
            match report.quota {
                Some(quota) => emit(&quota, output.as_ref()),
                None => anyhow::bail!("no quota product known for line {}", report.line),
            }
        }
        SubCommand::Import { file, data_dir } => import(&engine_config, &file, data_dir),
    }
}
