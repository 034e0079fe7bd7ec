//! Sentinel ingestion pipeline.
//!
//! Runs a document through extraction, chunking, salience scoring,
//! embedding, and index insertion. Every outcome, including failures, is
//! returned as an [`IngestResult`] and recorded in the pipeline metrics and
//! event log; no error escapes `ingest`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use sentinel_core::config::{ChunkingConfig, PipelineConfig};
use sentinel_core::error::SentinelError;
use sentinel_core::events::{IngestionEvent, IngestionStatus};
use sentinel_core::types::Chunk;

use crate::chunker::Chunker;
use crate::embedding::EmbedderStatus;
use crate::extract::{Extractor, PlainTextExtractor};
use crate::index::{HybridIndex, IndexStats};
use crate::metrics::{EventLog, MetricsSnapshot, PipelineMetrics};
use crate::salience::SalienceScorer;
use crate::ticker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Error,
}

/// Structured outcome of one ingest call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub status: IngestStatus,
    pub filename: String,
    pub chunk_count: usize,
    pub ticker: Option<String>,
    pub latency_ms: f64,
    pub max_salience: f64,
    pub ids: Vec<Uuid>,
    /// Human-readable failure message.
    pub message: Option<String>,
    /// Machine-readable failure kind (e.g. `extraction_empty`).
    pub error_kind: Option<String>,
}

impl IngestResult {
    pub fn is_success(&self) -> bool {
        self.status == IngestStatus::Success
    }
}

/// Observability snapshot of the whole ingest path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub metrics: MetricsSnapshot,
    pub index: Option<IndexStats>,
    pub embedder: EmbedderStatus,
    pub recent_events: Vec<IngestionEvent>,
}

struct Indexed {
    ids: Vec<Uuid>,
    ticker: Option<String>,
    max_salience: f64,
}

/// The main Sentinel ingestion pipeline.
///
/// Processes documents through:
/// 1. Text extraction
/// 2. Sentence chunking with overlap
/// 3. Salience scoring per chunk
/// 4. Batch embedding (outside the index lock)
/// 5. Hybrid index insertion
pub struct IngestionPipeline {
    index: Arc<HybridIndex>,
    extractor: Box<dyn Extractor>,
    chunker: Chunker,
    scorer: SalienceScorer,
    metrics: PipelineMetrics,
    events: EventLog,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("index", &self.index)
            .field("chunker", &self.chunker)
            .finish()
    }
}

impl IngestionPipeline {
    pub fn new(
        index: Arc<HybridIndex>,
        chunking: &ChunkingConfig,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            index,
            extractor: Box::new(PlainTextExtractor::new()),
            chunker: Chunker::new(chunking),
            scorer: SalienceScorer::new(),
            metrics: PipelineMetrics::new(pipeline.latency_window),
            events: EventLog::new(pipeline.event_log_capacity),
        }
    }

    /// Pipeline with default chunking and metrics settings.
    pub fn with_defaults(index: Arc<HybridIndex>) -> Self {
        Self::new(index, &ChunkingConfig::default(), &PipelineConfig::default())
    }

    /// Replace the default plain-text extractor.
    pub fn with_extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    /// Ingest a document, resolving its ticker from the filename or text.
    pub async fn ingest(&self, bytes: &[u8], filename: &str, source_tag: &str) -> IngestResult {
        self.ingest_with_ticker(bytes, filename, source_tag, None).await
    }

    /// Ingest a document with an explicit ticker that overrides resolution.
    pub async fn ingest_with_ticker(
        &self,
        bytes: &[u8],
        filename: &str,
        source_tag: &str,
        ticker_hint: Option<&str>,
    ) -> IngestResult {
        let start = Instant::now();
        let outcome = self.run(bytes, filename, source_tag, ticker_hint).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(indexed) => {
                self.metrics.record_success(latency_ms);
                self.events.push(IngestionEvent {
                    id: indexed.ids.first().copied().unwrap_or_else(Uuid::new_v4),
                    filename: filename.to_string(),
                    ticker: indexed.ticker.clone(),
                    chunk_count: indexed.ids.len(),
                    latency_ms,
                    max_salience: indexed.max_salience,
                    status: IngestionStatus::Indexed,
                    timestamp: Utc::now(),
                });
                info!(
                    filename,
                    ticker = indexed.ticker.as_deref().unwrap_or("-"),
                    chunks = indexed.ids.len(),
                    max_salience = indexed.max_salience,
                    latency_ms,
                    "Document ingested"
                );
                IngestResult {
                    status: IngestStatus::Success,
                    filename: filename.to_string(),
                    chunk_count: indexed.ids.len(),
                    ticker: indexed.ticker,
                    latency_ms,
                    max_salience: indexed.max_salience,
                    ids: indexed.ids,
                    message: None,
                    error_kind: None,
                }
            }
            Err(e) => {
                self.metrics.record_failure();
                self.events.push(IngestionEvent {
                    id: Uuid::new_v4(),
                    filename: filename.to_string(),
                    ticker: ticker_hint.map(str::to_uppercase),
                    chunk_count: 0,
                    latency_ms,
                    max_salience: 0.0,
                    status: IngestionStatus::Failed,
                    timestamp: Utc::now(),
                });
                warn!(filename, error = %e, kind = e.kind(), "Ingestion failed");
                IngestResult {
                    status: IngestStatus::Error,
                    filename: filename.to_string(),
                    chunk_count: 0,
                    ticker: ticker_hint.map(str::to_uppercase),
                    latency_ms,
                    max_salience: 0.0,
                    ids: Vec::new(),
                    message: Some(e.to_string()),
                    error_kind: Some(e.kind().to_string()),
                }
            }
        }
    }

    async fn run(
        &self,
        bytes: &[u8],
        filename: &str,
        source_tag: &str,
        ticker_hint: Option<&str>,
    ) -> Result<Indexed, SentinelError> {
        let extraction = self.extractor.extract(bytes, filename);
        if extraction.is_empty() {
            let reason = extraction
                .metadata
                .error
                .clone()
                .unwrap_or_else(|| "document contains no text".to_string());
            return Err(SentinelError::ExtractionEmpty(format!("{}: {}", filename, reason)));
        }

        let ticker = ticker::resolve(ticker_hint, filename, &extraction.text);
        let texts: Vec<String> = self
            .chunker
            .chunk(&extraction.text)
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect();

        let created_at = Utc::now();
        let mut attributes = extraction.metadata.to_attributes();
        attributes.insert("filename".to_string(), filename.to_string());

        let total = texts.len();
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: Uuid::new_v4(),
                text: text.clone(),
                source_tag: source_tag.to_string(),
                ticker: ticker.clone(),
                created_at,
                sequence_index: i,
                sequence_total: total,
                salience: self.scorer.score(text),
                attributes: attributes.clone(),
            })
            .collect();

        let max_salience = chunks.iter().map(|c| c.salience).fold(0.0, f64::max);
        let ids: Vec<Uuid> = chunks.iter().map(|c| c.id).collect();

        let embeddings = self.index.embedder().encode(&texts).await?;
        self.index.add(chunks, embeddings)?;

        Ok(Indexed {
            ids,
            ticker,
            max_salience,
        })
    }

    pub fn index(&self) -> &Arc<HybridIndex> {
        &self.index
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<IngestionEvent> {
        self.events.recent(limit)
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            metrics: self.metrics.snapshot(),
            index: self.index.stats().ok(),
            embedder: self.index.embedder().status().clone(),
            recent_events: self.events.recent(EventLog::DEFAULT_RECENT),
        }
    }
}
