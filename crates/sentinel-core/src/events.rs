use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome recorded for one ingest call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    /// Chunks were embedded and added to the index.
    Indexed,
    /// The document was rejected or indexing failed.
    Failed,
}

/// Entry in the ingestion event log, consumed by observability surfaces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestionEvent {
    /// Id of the first chunk, or a fresh id for failed ingests.
    pub id: Uuid,
    pub filename: String,
    pub ticker: Option<String>,
    pub chunk_count: usize,
    pub latency_ms: f64,
    pub max_salience: f64,
    pub status: IngestionStatus,
    pub timestamp: DateTime<Utc>,
}
