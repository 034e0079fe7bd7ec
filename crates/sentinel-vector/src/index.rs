//! Hybrid similarity index.
//!
//! An append-only in-memory table of unit vectors and their chunks is the
//! source of truth for ranking. An optional [`MetadataMirror`] (the SQLite
//! chunk repository in production) receives every committed batch as a
//! best-effort persistent copy; mirror failures are logged and counted but
//! never undo or block the in-memory append.
//!
//! Ranking is an exact f64 inner product over L2-normalised vectors, so it
//! equals cosine similarity. Queries over-fetch `k * overfetch_factor`
//! candidates and apply the [`QueryFilter`] in rank order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use sentinel_core::config::IndexConfig;
use sentinel_core::error::SentinelError;
use sentinel_core::types::{Chunk, QueryFilter};
use sentinel_storage::ChunkRepository;

use crate::embedding::{l2_normalize, Embedder};

/// Persistent, independently filterable copy of indexed chunks.
pub trait MetadataMirror: Send + Sync {
    /// Store chunks whose embeddings occupy consecutive offsets from `first_offset`.
    fn save_batch(&self, first_offset: usize, chunks: &[Chunk]) -> Result<(), SentinelError>;

    /// Replace the mirror contents with exactly these rows.
    fn replace_all(&self, rows: &[(usize, Chunk)]) -> Result<(), SentinelError>;

    /// Remove every row.
    fn clear(&self) -> Result<(), SentinelError>;
}

impl MetadataMirror for ChunkRepository {
    fn save_batch(&self, first_offset: usize, chunks: &[Chunk]) -> Result<(), SentinelError> {
        ChunkRepository::save_batch(self, first_offset, chunks)
    }

    fn replace_all(&self, rows: &[(usize, Chunk)]) -> Result<(), SentinelError> {
        ChunkRepository::replace_all(self, rows)
    }

    fn clear(&self) -> Result<(), SentinelError> {
        ChunkRepository::clear(self).map(|_| ())
    }
}

/// Outcome of a successful `add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddReport {
    pub added: usize,
    pub total: usize,
    pub latency: Duration,
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: Uuid,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
    pub offset: usize,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_documents: usize,
    pub dimension: usize,
    pub unique_tickers: Vec<String>,
    pub mirror_failures: u64,
}

#[derive(Debug)]
struct IndexEntry {
    embedding: Vec<f32>,
    chunk: Chunk,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: Vec<IndexEntry>,
    /// Offset of `entries[0]`. Offsets keep growing across `clear`.
    base_offset: usize,
    offsets: HashMap<Uuid, usize>,
    dimension: Option<usize>,
    /// Bumped by `clear`; mirror writes from an older generation are dropped.
    generation: u64,
}

impl IndexState {
    fn next_offset(&self) -> usize {
        self.base_offset + self.entries.len()
    }

    fn entry_at(&self, offset: usize) -> Option<&IndexEntry> {
        offset
            .checked_sub(self.base_offset)
            .and_then(|pos| self.entries.get(pos))
    }
}

/// Thread-safe hybrid index shared by the ingestion pipeline and the watchdog.
pub struct HybridIndex {
    embedder: Arc<Embedder>,
    state: RwLock<IndexState>,
    mirror: Option<Arc<dyn MetadataMirror>>,
    /// Serialises mirror writes against `clear`.
    mirror_gate: Mutex<()>,
    mirror_failures: AtomicU64,
    overfetch_factor: usize,
    query_timeout: Duration,
}

impl std::fmt::Debug for HybridIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridIndex")
            .field("len", &self.len())
            .field("mirrored", &self.mirror.is_some())
            .field("overfetch_factor", &self.overfetch_factor)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl HybridIndex {
    pub fn new(embedder: Arc<Embedder>, config: &IndexConfig) -> Self {
        Self {
            embedder,
            state: RwLock::new(IndexState::default()),
            mirror: None,
            mirror_gate: Mutex::new(()),
            mirror_failures: AtomicU64::new(0),
            overfetch_factor: config.overfetch_factor.max(1),
            query_timeout: config.query_timeout(),
        }
    }

    /// Attach a persistent mirror.
    pub fn with_mirror(mut self, mirror: Arc<dyn MetadataMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, IndexState>, SentinelError> {
        self.state
            .read()
            .map_err(|e| SentinelError::IndexUnavailable(format!("Lock poisoned: {}", e)))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, IndexState>, SentinelError> {
        self.state
            .write()
            .map_err(|e| SentinelError::IndexUnavailable(format!("Lock poisoned: {}", e)))
    }

    /// Append a batch. The whole batch is validated before anything is
    /// written, so readers see all of it or none of it.
    pub fn add(
        &self,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<AddReport, SentinelError> {
        let start = Instant::now();

        if chunks.len() != embeddings.len() {
            return Err(SentinelError::Storage(format!(
                "Batch has {} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(AddReport {
                added: 0,
                total: self.len(),
                latency: start.elapsed(),
            });
        }

        let mut vectors = embeddings;
        for v in vectors.iter_mut() {
            l2_normalize(v);
        }

        let (first_offset, total, generation) = {
            let mut state = self.write_state()?;

            let expected = state.dimension.unwrap_or(vectors[0].len());
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(SentinelError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
            let mut batch_ids = HashSet::with_capacity(chunks.len());
            for chunk in &chunks {
                if state.offsets.contains_key(&chunk.id) || !batch_ids.insert(chunk.id) {
                    return Err(SentinelError::Storage(format!(
                        "Duplicate chunk id {}",
                        chunk.id
                    )));
                }
            }

            let first_offset = state.next_offset();
            state.dimension = Some(expected);
            for (chunk, embedding) in chunks.iter().zip(vectors) {
                let offset = state.next_offset();
                state.offsets.insert(chunk.id, offset);
                state.entries.push(IndexEntry {
                    embedding,
                    chunk: chunk.clone(),
                });
            }
            (first_offset, state.entries.len(), state.generation)
        };

        if let Some(ref mirror) = self.mirror {
            self.write_mirror(mirror.as_ref(), generation, first_offset, &chunks);
        }

        let latency = start.elapsed();
        debug!(
            added = chunks.len(),
            total,
            first_offset,
            latency_ms = latency.as_secs_f64() * 1000.0,
            "Indexed batch"
        );

        Ok(AddReport {
            added: chunks.len(),
            total,
            latency,
        })
    }

    fn write_mirror(
        &self,
        mirror: &dyn MetadataMirror,
        generation: u64,
        first_offset: usize,
        chunks: &[Chunk],
    ) {
        let Ok(_gate) = self.mirror_gate.lock() else {
            self.record_mirror_failure("mirror gate poisoned");
            return;
        };
        // A clear between the append and this write already discarded the batch.
        let current = self.read_state().map(|s| s.generation).ok();
        if current != Some(generation) {
            return;
        }
        if let Err(e) = mirror.save_batch(first_offset, chunks) {
            self.record_mirror_failure(&e.to_string());
        }
    }

    fn record_mirror_failure(&self, error: &str) {
        let failures = self.mirror_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(error, failures, "Metadata mirror write failed");
    }

    /// Embed `text` and return at most `k` filtered hits, best first.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<QueryHit>, SentinelError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let vector = tokio::time::timeout(self.query_timeout, self.embedder.encode_one(text))
            .await
            .map_err(|_| SentinelError::QueryTimeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            })??;
        self.search_vector(&vector, k, filter, Utc::now())
    }

    /// Like [`query`](Self::query), but failures log and yield no hits.
    pub async fn query_or_empty(&self, text: &str, k: usize, filter: &QueryFilter) -> Vec<QueryHit> {
        match self.query(text, k, filter).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Index query failed, returning no results");
                Vec::new()
            }
        }
    }

    /// Rank by a precomputed query vector, evaluating age against `now`.
    pub fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        filter: &QueryFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueryHit>, SentinelError> {
        let state = self.read_state()?;
        if state.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = state.dimension {
            if query.len() != expected {
                return Err(SentinelError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f64)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (pos, inner_product(query, &entry.embedding)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let candidates = k.saturating_mul(self.overfetch_factor).min(scored.len());
        let mut hits = Vec::with_capacity(k.min(candidates));
        for &(pos, score) in &scored[..candidates] {
            let entry = &state.entries[pos];
            if !filter.matches(&entry.chunk, now) {
                continue;
            }
            hits.push(QueryHit {
                id: entry.chunk.id,
                score,
                offset: state.base_offset + pos,
                chunk: entry.chunk.clone(),
            });
            if hits.len() >= k {
                break;
            }
        }
        Ok(hits)
    }

    pub fn stats(&self) -> Result<IndexStats, SentinelError> {
        let state = self.read_state()?;
        let tickers: BTreeSet<&str> = state
            .entries
            .iter()
            .filter_map(|e| e.chunk.ticker.as_deref())
            .collect();
        Ok(IndexStats {
            total_documents: state.entries.len(),
            dimension: state.dimension.unwrap_or_else(|| self.embedder.dimensions()),
            unique_tickers: tickers.into_iter().map(String::from).collect(),
            mirror_failures: self.mirror_failures(),
        })
    }

    /// Drop every entry and the fixed dimension, then clear the mirror.
    /// Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize, SentinelError> {
        let removed = {
            let mut state = self.write_state()?;
            let removed = state.entries.len();
            state.base_offset = state.next_offset();
            state.entries.clear();
            state.offsets.clear();
            state.dimension = None;
            state.generation += 1;
            removed
        };

        if let Some(ref mirror) = self.mirror {
            match self.mirror_gate.lock() {
                Ok(_gate) => {
                    if let Err(e) = mirror.clear() {
                        self.record_mirror_failure(&e.to_string());
                    }
                }
                Err(_) => self.record_mirror_failure("mirror gate poisoned"),
            }
        }

        debug!(removed, "Cleared index");
        Ok(removed)
    }

    /// Rewrite the mirror from the in-memory table. Returns the row count.
    pub fn reconcile_mirror(&self) -> Result<usize, SentinelError> {
        let Some(ref mirror) = self.mirror else {
            return Ok(0);
        };
        let _gate = self
            .mirror_gate
            .lock()
            .map_err(|e| SentinelError::IndexUnavailable(format!("Mirror gate poisoned: {}", e)))?;
        let rows: Vec<(usize, Chunk)> = {
            let state = self.read_state()?;
            state
                .entries
                .iter()
                .enumerate()
                .map(|(pos, e)| (state.base_offset + pos, e.chunk.clone()))
                .collect()
        };
        mirror.replace_all(&rows)?;
        Ok(rows.len())
    }

    pub fn get(&self, id: Uuid) -> Option<Chunk> {
        let state = self.read_state().ok()?;
        let offset = *state.offsets.get(&id)?;
        state.entry_at(offset).map(|e| e.chunk.clone())
    }

    pub fn offset_of(&self, id: Uuid) -> Option<usize> {
        self.read_state().ok()?.offsets.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.read_state().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mirror_failures(&self) -> u64 {
        self.mirror_failures.load(Ordering::Relaxed)
    }
}

/// Inner product in f64. Vectors of different length score 0.
fn inner_product(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}
