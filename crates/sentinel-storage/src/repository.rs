//! Chunk metadata repository.
//!
//! Persistent, filterable mirror of every chunk held by the in-memory
//! similarity index. Rows are keyed by chunk id and carry the chunk's
//! embedding offset.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use sentinel_core::error::SentinelError;
use sentinel_core::types::{Chunk, QueryFilter};

use crate::db::Database;

const CHUNK_COLUMNS: &str = "id, text, source_tag, ticker, created_at, sequence_index, \
                             sequence_total, salience, attributes";

/// Repository for mirrored chunk metadata.
#[derive(Debug, Clone)]
pub struct ChunkRepository {
    db: Arc<Database>,
}

impl ChunkRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a batch of chunks whose embeddings occupy consecutive offsets
    /// starting at `first_offset`. The batch is written in one transaction.
    pub fn save_batch(&self, first_offset: usize, chunks: &[Chunk]) -> Result<(), SentinelError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| SentinelError::Storage(format!("Failed to begin transaction: {}", e)))?;
            insert_chunks(&tx, first_offset, chunks)?;
            tx.commit()
                .map_err(|e| SentinelError::Storage(format!("Failed to commit chunks: {}", e)))
        })
    }

    /// Replace the whole mirror with the given `(offset, chunk)` rows.
    pub fn replace_all(&self, rows: &[(usize, Chunk)]) -> Result<(), SentinelError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| SentinelError::Storage(format!("Failed to begin transaction: {}", e)))?;
            tx.execute("DELETE FROM chunks", [])
                .map_err(|e| SentinelError::Storage(format!("Failed to clear chunks: {}", e)))?;
            for (offset, chunk) in rows {
                insert_chunks(&tx, *offset, std::slice::from_ref(chunk))?;
            }
            tx.commit()
                .map_err(|e| SentinelError::Storage(format!("Failed to commit rebuild: {}", e)))
        })
    }

    /// Embedding offset recorded for a chunk.
    pub fn offset_of(&self, id: Uuid) -> Result<Option<usize>, SentinelError> {
        self.db.with_conn(|conn| {
            let offset: Option<i64> = conn
                .query_row(
                    "SELECT embedding_offset FROM chunks WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| SentinelError::Storage(e.to_string()))?;
            Ok(offset.map(|o| o as usize))
        })
    }

    /// Metadata-only lookup: chunks matching `filter`, newest first.
    pub fn find_filtered(
        &self,
        filter: &QueryFilter,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Chunk>, SentinelError> {
        let created_after = filter
            .created_after(now)
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN);

        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chunks
                 WHERE (?1 IS NULL OR ticker = ?1)
                   AND (?2 IS NULL OR salience >= ?2)
                   AND created_at >= ?3
                 ORDER BY created_at DESC, embedding_offset ASC
                 LIMIT ?4",
                CHUNK_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| SentinelError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![filter.ticker, filter.min_salience, created_after, limit],
                    |row| Ok(row_to_chunk(row)),
                )
                .map_err(|e| SentinelError::Storage(e.to_string()))?;

            let mut chunks = Vec::new();
            for row in rows {
                let chunk = row.map_err(|e| SentinelError::Storage(e.to_string()))??;
                chunks.push(chunk);
            }
            Ok(chunks)
        })
    }

    /// Distinct tickers, sorted.
    pub fn unique_tickers(&self) -> Result<Vec<String>, SentinelError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT ticker FROM chunks WHERE ticker IS NOT NULL ORDER BY ticker")
                .map_err(|e| SentinelError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| SentinelError::Storage(e.to_string()))?;

            let mut tickers = Vec::new();
            for row in rows {
                tickers.push(row.map_err(|e| SentinelError::Storage(e.to_string()))?);
            }
            Ok(tickers)
        })
    }

    /// Count all mirrored chunks.
    pub fn count(&self) -> Result<u64, SentinelError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                .map_err(|e| SentinelError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Delete every mirrored chunk. Returns the number of rows removed.
    pub fn clear(&self) -> Result<usize, SentinelError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM chunks", [])
                .map_err(|e| SentinelError::Storage(format!("Failed to clear chunks: {}", e)))
        })
    }
}

fn insert_chunks(
    conn: &rusqlite::Connection,
    first_offset: usize,
    chunks: &[Chunk],
) -> Result<(), SentinelError> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT OR REPLACE INTO chunks
                (id, embedding_offset, text, source_tag, ticker, created_at,
                 sequence_index, sequence_total, salience, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .map_err(|e| SentinelError::Storage(e.to_string()))?;

    for (i, chunk) in chunks.iter().enumerate() {
        let attributes = serde_json::to_string(&chunk.attributes)?;
        stmt.execute(rusqlite::params![
            chunk.id.to_string(),
            (first_offset + i) as i64,
            chunk.text,
            chunk.source_tag,
            chunk.ticker,
            chunk.created_at.timestamp_millis(),
            chunk.sequence_index as i64,
            chunk.sequence_total as i64,
            chunk.salience,
            attributes,
        ])
        .map_err(|e| SentinelError::Storage(format!("Failed to save chunk: {}", e)))?;
    }
    Ok(())
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> Result<Chunk, SentinelError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;
    let text: String = row
        .get(1)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;
    let source_tag: String = row
        .get(2)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;
    let ticker: Option<String> = row
        .get(3)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;
    let created_ms: i64 = row
        .get(4)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;
    let sequence_index: i64 = row
        .get(5)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;
    let sequence_total: i64 = row
        .get(6)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;
    let salience: f64 = row
        .get(7)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;
    let attributes_json: String = row
        .get(8)
        .map_err(|e| SentinelError::Storage(e.to_string()))?;

    let attributes: BTreeMap<String, String> = serde_json::from_str(&attributes_json)?;

    Ok(Chunk {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| SentinelError::Storage(format!("Invalid UUID: {}", e)))?,
        text,
        source_tag,
        ticker,
        created_at: Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .ok_or_else(|| SentinelError::Storage(format!("Invalid timestamp: {}", created_ms)))?,
        sequence_index: sequence_index as usize,
        sequence_total: sequence_total as usize,
        salience,
        attributes,
    })
}
