//! Sentinel application binary - composition root.
//!
//! Ties together all Sentinel crates into a single executable:
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Build the embedder (ONNX model, or the degraded hash fallback)
//! 3. Build the hybrid index with an optional SQLite metadata mirror
//! 4. Build the ingestion pipeline, watchdog, and analysis service
//! 5. Dispatch the requested subcommand
//!
//! Structured output goes to stdout as JSON; logs go to stderr.

mod cli;
mod demos;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;

use cli::{CliArgs, Command};
use sentinel_core::config::SentinelConfig;
use sentinel_core::types::{Alert, Chunk, QueryFilter};
use sentinel_storage::{ChunkRepository, Database};
use sentinel_vector::{Embedder, HybridIndex, IngestResult, IngestionPipeline, PipelineStatus};
use sentinel_watchdog::{AnalysisService, Watchdog, WatchdogScheduler, WatchdogStatus};

/// Source tag stamped on bundled filings.
const DEMO_SOURCE: &str = "demo";

/// Every long-lived component, wired from one configuration.
struct Sentinel {
    config: SentinelConfig,
    index: Arc<HybridIndex>,
    mirror: Option<Arc<ChunkRepository>>,
    pipeline: Arc<IngestionPipeline>,
    analysis: Arc<AnalysisService>,
}

impl Sentinel {
    fn build(config: SentinelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let embedder = Arc::new(Embedder::from_config(&config.embedding));
        let status = embedder.status();
        tracing::info!(
            model = %status.model,
            dimensions = status.dimensions,
            degraded = status.degraded,
            "Embedder ready"
        );

        let mut index = HybridIndex::new(embedder, &config.index);
        let mut mirror = None;
        if config.index.persist_metadata {
            let data_dir = resolve_data_dir(&config.general.data_dir);
            if let Err(e) = std::fs::create_dir_all(&data_dir) {
                tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
                return Err(e.into());
            }
            let db_path = data_dir.join("sentinel.db");
            let db = Arc::new(Database::new(&db_path)?);
            let repository = Arc::new(ChunkRepository::new(db));
            let stale = repository.count()?;
            index = index.with_mirror(repository.clone());
            mirror = Some(repository);
            // The in-memory table starts empty, so rows from a previous run
            // no longer describe it.
            index.reconcile_mirror()?;
            tracing::info!(path = %db_path.display(), stale, "Metadata mirror ready");
        } else {
            tracing::info!("Metadata mirror disabled, running in memory");
        }
        let index = Arc::new(index);

        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&index),
            &config.chunking,
            &config.pipeline,
        ));
        let analysis = Arc::new(AnalysisService::rule_based(
            Arc::clone(&index),
            config.analyzer.clone(),
        ));

        Ok(Self {
            config,
            index,
            mirror,
            pipeline,
            analysis,
        })
    }

    fn watchdog(&self) -> Watchdog {
        Watchdog::new(Arc::clone(&self.index), self.config.watchdog.clone())
    }

    async fn ingest_demo(&self, filing: &demos::DemoFiling) -> IngestResult {
        let result = self
            .pipeline
            .ingest(filing.content.as_bytes(), filing.filename, DEMO_SOURCE)
            .await;
        log_ingest(&result);
        result
    }
}

#[derive(Serialize)]
struct SimulationReport {
    ingested: Vec<IngestResult>,
    alerts: Vec<Alert>,
    watchdog: WatchdogStatus,
    pipeline: PipelineStatus,
}

fn log_ingest(result: &IngestResult) {
    if result.is_success() {
        tracing::info!(
            filename = %result.filename,
            ticker = ?result.ticker,
            chunks = result.chunk_count,
            max_salience = result.max_salience,
            latency_ms = result.latency_ms,
            "Ingested"
        );
    } else {
        tracing::warn!(
            filename = %result.filename,
            kind = ?result.error_kind,
            message = ?result.message,
            "Ingest failed"
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Apply CLI overrides on top of the loaded configuration.
fn apply_overrides(config: &mut SentinelConfig, args: &CliArgs) {
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(watch_list) = args.resolve_watch_list() {
        config.watchdog.watch_list = watch_list;
    }
    if args.in_memory {
        config.index.persist_metadata = false;
    }
}

async fn simulate(sentinel: &Sentinel, filing: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let selected: Vec<&demos::DemoFiling> = match filing {
        Some(name) => match demos::find(name) {
            Some(f) => vec![f],
            None => return Err(format!("Unknown demo filing: {}", name).into()),
        },
        None => demos::FILINGS.iter().collect(),
    };

    let mut ingested = Vec::with_capacity(selected.len());
    for filing in selected {
        ingested.push(sentinel.ingest_demo(filing).await);
    }

    let mut watchdog = sentinel.watchdog();
    while let Some(event) = watchdog.tick().await {
        sentinel.analysis.process(&event).await;
    }

    let mut alerts = sentinel.analysis.recent_alerts(usize::MAX);
    alerts.reverse();
    print_json(&SimulationReport {
        ingested,
        alerts,
        watchdog: watchdog.status(),
        pipeline: sentinel.pipeline.status(),
    })
}

async fn ingest_files(
    sentinel: &Sentinel,
    paths: &[PathBuf],
    ticker: Option<&str>,
    source: &str,
) -> Result<Vec<IngestResult>, Box<dyn std::error::Error>> {
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path).await?;
        let filename = file_label(path);
        let result = sentinel
            .pipeline
            .ingest_with_ticker(&bytes, &filename, source, ticker)
            .await;
        log_ingest(&result);
        results.push(result);
    }
    Ok(results)
}

/// Metadata-only lookup against the SQLite mirror, newest first.
fn list_mirrored(
    sentinel: &Sentinel,
    filter: &QueryFilter,
    limit: u64,
) -> Result<Vec<Chunk>, Box<dyn std::error::Error>> {
    let Some(ref mirror) = sentinel.mirror else {
        return Err("--list needs the SQLite mirror; drop --in-memory".into());
    };
    Ok(mirror.find_filtered(filter, Utc::now(), limit)?)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run(sentinel: &Sentinel, feed_secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::channel(64);
    let scheduler = Arc::new(
        WatchdogScheduler::new(sentinel.watchdog(), sentinel.config.watchdog.cadence())
            .with_analysis(Arc::clone(&sentinel.analysis))
            .with_sink(tx),
    );

    let mut runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    let feeder = (feed_secs > 0).then(|| {
        let pipeline = Arc::clone(&sentinel.pipeline);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(feed_secs));
            for filing in demos::FILINGS.iter().cycle() {
                interval.tick().await;
                let result = pipeline
                    .ingest(filing.content.as_bytes(), filing.filename, DEMO_SOURCE)
                    .await;
                log_ingest(&result);
            }
        })
    });

    let printer = {
        let analysis = Arc::clone(&sentinel.analysis);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Analysis runs before the event reaches the sink.
                let alert = analysis
                    .recent_alerts(analysis.alert_count())
                    .into_iter()
                    .find(|a| a.id == event.chunk.id);
                match alert.map(|a| serde_json::to_string(&a)) {
                    Some(Ok(line)) => println!("{}", line),
                    Some(Err(e)) => tracing::warn!(error = %e, "Failed to encode alert"),
                    None => tracing::debug!(id = %event.chunk.id, "Alert already rotated out"),
                }
            }
        })
    };

    tracing::info!(
        watch_list = ?sentinel.config.watchdog.watch_list,
        cadence_secs = sentinel.config.watchdog.cadence().as_secs(),
        feed_secs,
        "Sentinel running, press Ctrl-C to stop"
    );

    let cycles = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutdown requested");
            scheduler.shutdown();
            runner.await?
        }
        joined = &mut runner => joined?,
    };

    if let Some(feeder) = feeder {
        feeder.abort();
    }
    drop(scheduler);
    printer.await?;

    let status = sentinel.pipeline.status();
    tracing::info!(
        cycles,
        processed = status.metrics.processed,
        failed = status.metrics.failed,
        alerts = sentinel.analysis.alert_count(),
        "Sentinel stopped"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so its log level applies.
    let config_file = args.resolve_config_path();
    let loaded = SentinelConfig::load(&config_file);
    let level = args.resolve_log_level(
        loaded
            .as_ref()
            .map(|c| c.general.log_level.as_str())
            .unwrap_or("info"),
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Sentinel v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(config) => {
            tracing::info!(path = %config_file.display(), "Configuration loaded");
            config
        }
        Err(e) => {
            if config_file.exists() {
                tracing::warn!(path = %config_file.display(), error = %e, "Invalid config, using defaults");
            } else {
                tracing::info!(path = %config_file.display(), "No config file, using defaults");
            }
            SentinelConfig::default()
        }
    };
    apply_overrides(&mut config, &args);

    if args.command == Command::Demos {
        return print_json(&demos::FILINGS);
    }

    let sentinel = Sentinel::build(config)?;

    match args.command {
        Command::Demos => Ok(()),
        Command::Simulate { ref filing } => simulate(&sentinel, filing.as_deref()).await,
        Command::Ingest {
            ref paths,
            ref ticker,
            ref source,
            ref query,
            k,
            min_salience,
            list,
            limit,
        } => {
            let results = ingest_files(&sentinel, paths, ticker.as_deref(), source).await?;
            print_json(&results)?;

            let mut filter = QueryFilter::new();
            if let Some(ref t) = ticker {
                filter = filter.with_ticker(t.to_uppercase());
            }
            if let Some(s) = min_salience {
                filter = filter.with_min_salience(s);
            }
            if let Some(ref text) = query {
                let hits = sentinel.index.query(text, k, &filter).await?;
                print_json(&hits)?;
            }
            if list {
                print_json(&list_mirrored(&sentinel, &filter, limit)?)?;
            }
            print_json(&sentinel.index.stats()?)
        }
        Command::Run { feed_secs } => run(&sentinel, feed_secs).await,
    }
}
