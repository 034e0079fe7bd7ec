//! Sentinel vector crate - chunking, salience, embedding, hybrid index, and ingestion.
//!
//! Turns raw filings into scored chunks, embeds them (ONNX model or a
//! degraded hash fallback), and keeps them in a hybrid index that ranks in
//! memory and mirrors metadata to SQLite.

pub mod chunker;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod metrics;
pub mod pipeline;
pub mod salience;
pub mod ticker;

pub use chunker::Chunker;
pub use embedding::{Embedder, EmbedderStatus, EmbeddingBackend, EmbeddingService, HashEmbedding};
pub use extract::{Extraction, Extractor, ParseMetadata, PlainTextExtractor};
pub use index::{AddReport, HybridIndex, IndexStats, MetadataMirror, QueryHit};
pub use metrics::{EventLog, MetricsSnapshot, PipelineMetrics};
pub use pipeline::{IngestResult, IngestStatus, IngestionPipeline, PipelineStatus};
pub use salience::{SalienceBreakdown, SalienceScorer};
