//! Database access layer for the Polyglot chat platform.
//!
//! Provides a bounded SQLite connection pool, a retrying transaction
//! coordinator, embedded SQL migrations, maintenance operations (health
//! probe, vacuum/analyze, WAL checkpointing, snapshot backups), and the
//! [`Database`] lifecycle facade everything else consumes.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: chosen for single-server sovereignty — no
//!   external database process required. WAL allows concurrent readers with
//!   a single writer, which matches the chat workload: many request and
//!   message handlers reading, serialized writes.
//! - **Hand-built pool**: the pool is the invariant-bearing core of this
//!   layer (bounded growth, exclusive checkout, timed acquire), so it is
//!   implemented here rather than delegated. Checkouts are bounded by a
//!   semaphore; bookkeeping sits behind a mutex that never spans an await.
//! - **Busy-retry in the coordinator, not the pool**: the pool reports
//!   exhaustion honestly and never retries on its own; only the transaction
//!   coordinator absorbs transient single-writer contention, with a fixed
//!   delay and a bounded budget.
//! - **Explicit lifecycle**: a [`Database`] is constructed, initialized,
//!   injected into consumers, and closed by the owner. There is no ambient
//!   global; two `Database` values never share state.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, ensuring migrations ship with the code that depends on
//!   them.
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use polyglot_db::{Database, DbConfig, DbName};
//!
//! let db = Database::new(DbConfig::for_name(DbName::Main))?;
//! db.initialize().await?;
//!
//! let user_count: i64 = db
//!     .with_connection(|conn| {
//!         conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
//!             .map_err(Into::into)
//!     })
//!     .await?;
//!
//! println!("{user_count} users");
//! db.close().await;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod migrations;
pub mod pool;
pub mod transaction;

pub use config::{load_config, BackupConfig, ConfigError, DbConfig, DbName, EngineTuning};
pub use error::DbError;
pub use maintenance::{CheckpointMode, CheckpointResult};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{Pool, PoolError, PoolStats, PooledConnection};
pub use transaction::RetryPolicy;

use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};

/// Handle to one logical database: the pool plus the policies that operate
/// on it. Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    retry: RetryPolicy,
    backup: BackupConfig,
}

impl Database {
    /// Validates the configuration and builds the database handle.
    ///
    /// No connections are opened yet; a structurally invalid path or pool
    /// sizing fails here rather than on first use.
    pub fn new(config: DbConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            pool: Pool::new(&config),
            retry: config.retry,
            backup: config.backup.clone(),
        })
    }

    /// Opens the minimum connection set and runs pending migrations.
    ///
    /// Must be called once before the other entry points. Calling it again
    /// warns and does nothing.
    pub async fn initialize(&self) -> Result<(), DbError> {
        if !self.pool.initialize().await? {
            return Ok(());
        }
        let applied = self
            .pool
            .with_connection(|conn| migrations::run_migrations(conn).map_err(DbError::from))
            .await?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
        Ok(())
    }

    /// Primary read/write entry point: runs `f` on a pooled connection.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.with_connection(f).await
    }

    /// Primary multi-statement-atomic entry point: runs `f` inside a
    /// transaction, retrying busy failures per the configured policy.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: Fn(&Transaction<'_>) -> Result<T, DbError> + Send + Sync + 'static,
        T: Send + 'static,
    {
        transaction::run(&self.pool, self.retry, f).await
    }

    /// Round-trip liveness probe; `false` on any failure, never an error.
    pub async fn health_check(&self) -> bool {
        maintenance::health_check(&self.pool).await
    }

    /// On-disk size in bytes.
    pub async fn database_size(&self) -> Result<u64, DbError> {
        maintenance::database_size(&self.pool).await
    }

    /// Rebuilds the database file, reclaiming free pages.
    pub async fn vacuum(&self) -> Result<(), DbError> {
        maintenance::vacuum(&self.pool).await
    }

    /// Refreshes query planner statistics.
    pub async fn analyze(&self) -> Result<(), DbError> {
        maintenance::analyze(&self.pool).await
    }

    /// Merges the write-ahead log into the main database file.
    pub async fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointResult, DbError> {
        maintenance::checkpoint(&self.pool, mode).await
    }

    /// Writes a snapshot into the configured backup directory and prunes
    /// old snapshots past the retention count.
    pub async fn backup(&self) -> Result<PathBuf, DbError> {
        backup::backup(&self.pool, Path::new(&self.backup.directory), self.backup.retain).await
    }

    /// Spawns the periodic backup task, if backups are enabled.
    pub fn spawn_backup_task(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(backup::run_backup_task(self.pool.clone(), self.backup.clone()))
    }

    /// Consistent pool occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// The underlying pool, for operations that need direct acquire
    /// control. Application code should prefer [`Database::with_connection`].
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Graceful shutdown: closes every pooled connection. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
