//! Database snapshots and the scheduled backup task.
//!
//! Under WAL the live database is three colocated files (main, -wal, -shm)
//! that only make sense as a unit; copying the main file alone can lose
//! committed-but-not-checkpointed writes. Snapshots therefore use
//! `VACUUM INTO`, which writes one consistent, self-contained file —
//! restore is a single file copy.

use crate::config::BackupConfig;
use crate::error::DbError;
use crate::pool::Pool;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;

const SNAPSHOT_PREFIX: &str = "polyglot-";
const SNAPSHOT_SUFFIX: &str = ".db";

/// Writes a consistent snapshot of the database into `dir`, then prunes the
/// oldest snapshots so at most `retain` remain.
///
/// Returns the path of the snapshot written.
pub async fn backup(pool: &Pool, dir: &Path, retain: usize) -> Result<PathBuf, DbError> {
    std::fs::create_dir_all(dir)?;

    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let snapshot = dir.join(format!("{SNAPSHOT_PREFIX}{stamp}{SNAPSHOT_SUFFIX}"));
    let dest = snapshot.display().to_string();

    pool.with_connection(move |conn| {
        conn.execute("VACUUM INTO ?1", [dest.as_str()])?;
        Ok(())
    })
    .await?;

    let pruned = prune_snapshots(dir, retain)?;
    tracing::info!(
        path = %snapshot.display(),
        pruned,
        "database snapshot written"
    );
    Ok(snapshot)
}

/// Deletes the oldest snapshot files beyond `retain`. Returns how many were
/// removed. Snapshot names embed a UTC timestamp, so lexical order is
/// chronological order.
fn prune_snapshots(dir: &Path, retain: usize) -> Result<usize, DbError> {
    let mut snapshots: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX)
                })
        })
        .collect();
    snapshots.sort();

    let mut pruned = 0;
    while snapshots.len() > retain {
        let oldest = snapshots.remove(0);
        match std::fs::remove_file(&oldest) {
            Ok(()) => {
                tracing::debug!(path = %oldest.display(), "pruned old snapshot");
                pruned += 1;
            }
            Err(e) => {
                // Leave a stuck file behind rather than failing the backup.
                tracing::warn!(path = %oldest.display(), error = %e, "failed to prune snapshot");
            }
        }
    }
    Ok(pruned)
}

/// Periodic backup loop. Runs until the task is dropped; failures are
/// logged and never fatal.
pub async fn run_backup_task(pool: Pool, config: BackupConfig) {
    if !config.enabled {
        tracing::info!("scheduled backups disabled");
        return;
    }

    let interval = Duration::from_secs(config.interval_secs);
    let dir = PathBuf::from(&config.directory);
    tracing::info!(
        interval_secs = config.interval_secs,
        directory = %dir.display(),
        retain = config.retain,
        "starting scheduled backup task"
    );

    loop {
        sleep(interval).await;

        match backup(&pool, &dir, config.retain).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "scheduled backup completed");
            }
            Err(e) => {
                tracing::error!(error = %e, "scheduled backup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbConfig, DbName};

    async fn seeded_pool() -> Pool {
        let pool = Pool::new(&DbConfig::for_name(DbName::Test));
        pool.initialize().await.expect("initialize should succeed");
        pool.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
                 INSERT INTO notes (body) VALUES ('snapshot me');",
            )
            .map_err(DbError::from)
        })
        .await
        .expect("seed should succeed");
        pool
    }

    #[tokio::test]
    async fn snapshot_is_a_readable_database() {
        let pool = seeded_pool().await;
        let dir = tempfile::tempdir().expect("should create temp dir");

        let path = backup(&pool, dir.path(), 5)
            .await
            .expect("backup should succeed");
        assert!(path.exists());

        let copy = rusqlite::Connection::open(&path).expect("snapshot should open");
        let body: String = copy
            .query_row("SELECT body FROM notes", [], |row| row.get(0))
            .expect("snapshot should contain seeded data");
        assert_eq!(body, "snapshot me");
    }

    #[tokio::test]
    async fn prunes_to_retention_count() {
        let pool = seeded_pool().await;
        let dir = tempfile::tempdir().expect("should create temp dir");

        // Timestamps have one-second resolution; pre-seed distinct names.
        for n in 0..4 {
            std::fs::write(
                dir.path().join(format!("{SNAPSHOT_PREFIX}0000000{n}-000000{SNAPSHOT_SUFFIX}")),
                b"old snapshot",
            )
            .expect("should write placeholder snapshot");
        }

        backup(&pool, dir.path(), 3).await.expect("backup should succeed");

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .expect("should list dir")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(remaining.len(), 3, "retention should cap snapshot count");
    }
}
