//! Maintenance and diagnostics: health probe, size reporting, compaction,
//! and WAL checkpointing.
//!
//! Every operation here goes through the pool like any other unit of work —
//! nothing opens a side connection. Vacuum and analyze can run for a long
//! time on a large database and are logged with their duration; they belong
//! in background tasks or operator tooling, not on a request path.

use crate::error::DbError;
use crate::pool::Pool;
use std::time::Instant;

/// WAL checkpoint modes, in increasing order of aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Checkpoint what can be done without blocking writers.
    Passive,
    /// Wait for writers, then checkpoint the whole log.
    Full,
    /// As `Full`, then block new writes until the log is restarted.
    Restart,
    /// As `Restart`, then truncate the log file to zero bytes.
    Truncate,
}

impl CheckpointMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Passive => "PASSIVE",
            Self::Full => "FULL",
            Self::Restart => "RESTART",
            Self::Truncate => "TRUNCATE",
        }
    }
}

/// Outcome of a WAL checkpoint as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointResult {
    /// Whether the checkpoint stopped early because of a busy writer.
    pub busy: bool,
    /// Frames currently in the write-ahead log.
    pub log_frames: i64,
    /// Frames successfully moved into the main database file.
    pub checkpointed_frames: i64,
}

/// Executes a trivial round-trip query through the pool.
///
/// Returns `false` on any failure — including a closed pool or an unusable
/// file — and never propagates an error; this is what liveness probes call.
pub async fn health_check(pool: &Pool) -> bool {
    let result = pool
        .with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(DbError::from)
        })
        .await;

    match result {
        Ok(1) => true,
        Ok(other) => {
            tracing::warn!(value = other, "health probe returned unexpected value");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "database health check failed");
            false
        }
    }
}

/// On-disk size in bytes, derived from `page_count * page_size`.
pub async fn database_size(pool: &Pool) -> Result<u64, DbError> {
    pool.with_connection(|conn| {
        let page_count: u64 = conn.query_row("PRAGMA page_count;", [], |row| row.get(0))?;
        let page_size: u64 = conn.query_row("PRAGMA page_size;", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    })
    .await
}

/// Rebuilds the database file, reclaiming free pages.
pub async fn vacuum(pool: &Pool) -> Result<(), DbError> {
    let started = Instant::now();
    pool.with_connection(|conn| conn.execute_batch("VACUUM;").map_err(DbError::from))
        .await?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "vacuum completed"
    );
    Ok(())
}

/// Refreshes the query planner statistics.
pub async fn analyze(pool: &Pool) -> Result<(), DbError> {
    let started = Instant::now();
    pool.with_connection(|conn| conn.execute_batch("ANALYZE;").map_err(DbError::from))
        .await?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "analyze completed"
    );
    Ok(())
}

/// Merges the write-ahead log into the main database file.
///
/// Run periodically to bound WAL growth; `Truncate` additionally resets the
/// log file on disk.
pub async fn checkpoint(pool: &Pool, mode: CheckpointMode) -> Result<CheckpointResult, DbError> {
    let started = Instant::now();
    let result = pool
        .with_connection(move |conn| {
            let sql = format!("PRAGMA wal_checkpoint({});", mode.as_str());
            let (busy, log_frames, checkpointed_frames): (i64, i64, i64) = conn
                .query_row(&sql, [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
            Ok(CheckpointResult {
                busy: busy != 0,
                log_frames,
                checkpointed_frames,
            })
        })
        .await?;

    tracing::info!(
        mode = mode.as_str(),
        busy = result.busy,
        log_frames = result.log_frames,
        checkpointed_frames = result.checkpointed_frames,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "wal checkpoint completed"
    );
    Ok(result)
}
