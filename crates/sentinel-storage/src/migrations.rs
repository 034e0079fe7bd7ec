//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use sentinel_core::error::SentinelError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), SentinelError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| SentinelError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| SentinelError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: chunk_mirror");
    }

    Ok(())
}

/// Version 1: chunk metadata mirror.
///
/// `embedding_offset` records the chunk's slot in the in-memory similarity
/// structure so the mirror can be audited against it.
fn apply_v1(conn: &Connection) -> Result<(), SentinelError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chunks (
            id                TEXT PRIMARY KEY NOT NULL,
            embedding_offset  INTEGER NOT NULL,
            text              TEXT NOT NULL DEFAULT '',
            source_tag        TEXT NOT NULL DEFAULT '',
            ticker            TEXT,
            created_at        INTEGER NOT NULL,
            sequence_index    INTEGER NOT NULL,
            sequence_total    INTEGER NOT NULL,
            salience          REAL NOT NULL DEFAULT 0.0
                              CHECK (salience >= 0.0 AND salience <= 1.0),
            attributes        TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_ticker
            ON chunks (ticker, created_at DESC)
            WHERE ticker IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_chunks_created_at
            ON chunks (created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_chunks_salience
            ON chunks (salience DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'chunk_mirror');
        ",
    )
    .map_err(|e| SentinelError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
