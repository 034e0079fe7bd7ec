//! End-to-end tests across ingestion, the hybrid index, the watchdog, and
//! analysis. Each test builds its own in-memory stack.

use std::sync::Arc;
use std::time::Duration;

use sentinel_core::config::{AnalyzerConfig, IndexConfig, WatchdogConfig};
use sentinel_core::types::{QueryFilter, RiskLevel};
use sentinel_storage::{ChunkRepository, Database};
use sentinel_vector::{Embedder, HybridIndex, IngestionPipeline};
use sentinel_watchdog::{AnalysisService, Watchdog, WatchdogScheduler};
use tokio::sync::mpsc;

// =============================================================================
// Helpers
// =============================================================================

struct Stack {
    index: Arc<HybridIndex>,
    pipeline: IngestionPipeline,
    repository: Arc<ChunkRepository>,
}

/// Hash-embedded index mirrored into an in-memory SQLite database.
fn make_stack() -> Stack {
    let db = Arc::new(Database::in_memory().unwrap());
    let repository = Arc::new(ChunkRepository::new(db));
    let index = Arc::new(
        HybridIndex::new(Arc::new(Embedder::hashed(64)), &IndexConfig::default())
            .with_mirror(repository.clone()),
    );
    let pipeline = IngestionPipeline::with_defaults(Arc::clone(&index));
    Stack {
        index,
        pipeline,
        repository,
    }
}

fn watchdog_for(index: &Arc<HybridIndex>, watch: &[&str]) -> Watchdog {
    Watchdog::new(
        Arc::clone(index),
        WatchdogConfig {
            watch_list: watch.iter().map(|s| s.to_string()).collect(),
            ..WatchdogConfig::default()
        },
    )
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_risky_ingest_escalates_once_and_is_analyzed() {
    let stack = make_stack();
    let result = stack
        .pipeline
        .ingest_with_ticker(
            b"Company X filed for class action lawsuit and SEC investigation",
            "x_8k.txt",
            "upload",
            Some("X"),
        )
        .await;
    assert!(result.is_success());
    assert_eq!(result.chunk_count, 1);
    assert!(result.max_salience >= 0.4);
    assert_eq!(stack.repository.count().unwrap(), 1);

    let analysis = AnalysisService::rule_based(Arc::clone(&stack.index), AnalyzerConfig::default());
    let mut watchdog = watchdog_for(&stack.index, &["X"]);

    let event = watchdog.tick().await.expect("risky chunk should escalate");
    assert_eq!(event.ticker(), Some("X"));
    assert_eq!(event.chunk.id, result.ids[0]);

    let alert = analysis.process(&event).await;
    assert_eq!(alert.id, event.chunk.id);
    assert_eq!(alert.ticker.as_deref(), Some("X"));
    assert_ne!(alert.analysis.risk_level, RiskLevel::Low);
    assert!(!alert.analysis.reasoning.is_empty());

    assert!(watchdog.tick().await.is_none());
    assert!(watchdog.tick().await.is_none());
    assert_eq!(watchdog.status().escalations, 1);
}

#[tokio::test]
async fn test_agency_abbreviation_keeps_issuer_on_watch_list() {
    let stack = make_stack();
    let result = stack
        .pipeline
        .ingest(
            b"Tesla disclosed that the Securities and Exchange Commission (SEC) opened an \
              investigation and a class action lawsuit was filed.",
            "8k_filing.txt",
            "upload",
        )
        .await;
    assert!(result.is_success());
    assert_eq!(result.ticker.as_deref(), Some("TSLA"));

    let mut watchdog = watchdog_for(&stack.index, &["TSLA"]);
    let event = watchdog.tick().await.expect("issuer filing should escalate");
    assert_eq!(event.ticker(), Some("TSLA"));
}

#[tokio::test]
async fn test_neutral_ingest_never_escalates() {
    let stack = make_stack();
    let result = stack
        .pipeline
        .ingest_with_ticker(b"quarterly report shows steady performance", "x.txt", "upload", Some("X"))
        .await;
    assert!(result.is_success());
    assert!(result.max_salience < 0.3);

    let mut watchdog = watchdog_for(&stack.index, &["X"]);
    for _ in 0..3 {
        assert!(watchdog.tick().await.is_none());
    }
    assert_eq!(watchdog.status().cycles, 3);
}

#[tokio::test]
async fn test_filtered_query_over_mixed_tickers() {
    let stack = make_stack();
    let filings: [(&[u8], &str); 3] = [
        (b"NVIDIA faces a patent infringement lawsuit.", "nvda_8k.txt"),
        (b"Tesla announced a recall of vehicles.", "tsla_8k.txt"),
        (b"Apple reported steady services growth.", "aapl_10q.txt"),
    ];
    for (bytes, name) in filings {
        assert!(stack.pipeline.ingest(bytes, name, "upload").await.is_success());
    }

    let stats = stack.index.stats().unwrap();
    assert_eq!(stats.total_documents, 3);
    assert_eq!(stats.unique_tickers, vec!["AAPL", "NVDA", "TSLA"]);

    let hits = stack
        .index
        .query("risk", 10, &QueryFilter::new().with_ticker("TSLA"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits.iter().all(|h| h.chunk.ticker.as_deref() == Some("TSLA")));

    let hits = stack
        .index
        .query("risk", 10, &QueryFilter::new().with_min_salience(0.2))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.chunk.salience >= 0.2));

    let mirrored = stack
        .repository
        .find_filtered(&QueryFilter::new().with_ticker("NVDA"), chrono::Utc::now(), 10)
        .unwrap();
    assert_eq!(mirrored.len(), 1);
}

#[tokio::test]
async fn test_clear_empties_index_and_mirror() {
    let stack = make_stack();
    stack
        .pipeline
        .ingest(b"TSLA is subject to an SEC investigation.", "tsla.txt", "upload")
        .await;
    assert_eq!(stack.index.clear().unwrap(), 1);

    assert_eq!(stack.index.stats().unwrap().total_documents, 0);
    assert!(stack
        .index
        .query("investigation", 10, &QueryFilter::new())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(stack.repository.count().unwrap(), 0);

    let mut watchdog = watchdog_for(&stack.index, &["TSLA"]);
    assert!(watchdog.tick().await.is_none());
}

#[tokio::test]
async fn test_corrupt_upload_leaves_detection_running() {
    let stack = make_stack();
    let failed = stack.pipeline.ingest(b"   \n\t  ", "empty.txt", "upload").await;
    assert!(!failed.is_success());
    assert_eq!(failed.error_kind.as_deref(), Some("extraction_empty"));

    let ok = stack
        .pipeline
        .ingest(b"NVIDIA disclosed a data breach and fraud probe.", "nvda.txt", "upload")
        .await;
    assert!(ok.is_success());

    let metrics = stack.pipeline.metrics();
    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.failed, 1);

    let mut watchdog = watchdog_for(&stack.index, &["NVDA"]);
    assert!(watchdog.tick().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_picks_up_later_ingest() {
    let stack = make_stack();
    let analysis = Arc::new(AnalysisService::rule_based(
        Arc::clone(&stack.index),
        AnalyzerConfig::default(),
    ));
    let (tx, mut rx) = mpsc::channel(4);
    let scheduler = Arc::new(
        WatchdogScheduler::new(watchdog_for(&stack.index, &["AAPL"]), Duration::from_secs(1))
            .with_analysis(Arc::clone(&analysis))
            .with_sink(tx),
    );
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(rx.try_recv().is_err());

    let result = stack
        .pipeline
        .ingest(b"Apple posted an earnings miss and guidance lowered.", "aapl_10q.txt", "upload")
        .await;
    assert!(result.is_success());

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.ticker(), Some("AAPL"));
    assert_eq!(analysis.alert_count(), 1);

    scheduler.shutdown();
    runner.await.unwrap();
}
