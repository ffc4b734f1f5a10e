//! Bounded connection pool over rusqlite.
//!
//! The pool owns every connection it creates. Checkouts are bounded by a
//! semaphore with `max_connections` permits; bookkeeping (the idle list and
//! busy id set) lives behind a `std::sync::Mutex` that is never held across
//! an await point. Waiters race for permits when a connection frees up —
//! there is no FIFO fairness guarantee among concurrent acquirers.

use crate::config::{DbConfig, EngineTuning, PoolSettings};
use crate::error::DbError;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task;

/// Errors that can occur when acquiring or creating connections.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No connection became available before the acquire timeout.
    #[error("no database connection became available within {waited_ms} ms (pool exhausted)")]
    Exhausted {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// The underlying database file could not be opened.
    #[error("failed to open database connection: {0}")]
    CreateFailed(#[source] rusqlite::Error),

    /// The pool has been closed.
    #[error("connection pool is closed")]
    Closed,
}

/// A consistent snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently tracked by the pool.
    pub total: usize,
    /// Connections sitting idle, ready for checkout.
    pub available: usize,
    /// Connections currently checked out.
    pub busy: usize,
    /// Configured minimum.
    pub min: usize,
    /// Configured maximum.
    pub max: usize,
}

/// Opens physical connections with uniform flags and tuning.
///
/// Every connection in the pool goes through [`ConnectionFactory::open`], so
/// pragma state can never diverge between pool members.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionFactory {
    path: String,
    read_only: bool,
    tuning: EngineTuning,
}

impl ConnectionFactory {
    fn new(config: &DbConfig) -> Self {
        Self {
            path: config.path.clone(),
            read_only: config.read_only,
            tuning: config.tuning.clone(),
        }
    }

    pub(crate) fn open(&self) -> Result<Connection, PoolError> {
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        // URI form is how the in-memory test databases share one cache.
        flags |= OpenFlags::SQLITE_OPEN_FULL_MUTEX | OpenFlags::SQLITE_OPEN_URI;

        let conn =
            Connection::open_with_flags(&self.path, flags).map_err(PoolError::CreateFailed)?;
        self.tuning.apply(&conn).map_err(PoolError::CreateFailed)?;
        Ok(conn)
    }
}

struct TrackedConnection {
    id: u64,
    conn: Connection,
    idle_since: Instant,
}

struct PoolState {
    /// LIFO stack of idle connections; stale entries accumulate at the front.
    idle: Vec<TrackedConnection>,
    /// Ids of connections currently checked out.
    busy: HashSet<u64>,
    next_id: u64,
}

struct PoolInner {
    factory: ConnectionFactory,
    settings: PoolSettings,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
    closed: AtomicBool,
    initialized: AtomicBool,
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes idle connections that outlived the idle timeout, keeping the
    /// pool at or above `min_connections`. Called with fresh lock context on
    /// each acquire.
    fn prune_stale_idle(&self, state: &mut PoolState) {
        let idle_timeout = self.settings.idle_timeout();
        while state.idle.len() + state.busy.len() > self.settings.min_connections {
            let stale = state
                .idle
                .first()
                .is_some_and(|tracked| tracked.idle_since.elapsed() >= idle_timeout);
            if !stale {
                break;
            }
            let tracked = state.idle.remove(0);
            tracing::debug!(id = tracked.id, "closing idle connection past idle timeout");
            drop(tracked.conn);
        }
    }

    fn release(&self, id: u64, conn: Connection) {
        // A unit of work must never hand back a connection mid-transaction;
        // roll back rather than leak transaction state to the next caller.
        if !conn.is_autocommit() {
            tracing::warn!(id, "connection released inside an open transaction, rolling back");
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(id, error = %e, "rollback on release failed, discarding connection");
                self.lock_state().busy.remove(&id);
                return;
            }
        }

        let mut state = self.lock_state();
        if !state.busy.remove(&id) {
            tracing::warn!(id, "released a connection the pool does not track as busy, ignoring");
            return;
        }
        if self.closed.load(Ordering::SeqCst) {
            drop(state);
            if let Err((_conn, e)) = conn.close() {
                tracing::warn!(id, error = %e, "failed to close connection released after shutdown");
            }
            return;
        }
        state.idle.push(TrackedConnection {
            id,
            conn,
            idle_since: Instant::now(),
        });
    }
}

/// Bounded connection pool. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Builds an empty pool. No connections are opened until
    /// [`Pool::initialize`] or the first acquire.
    pub fn new(config: &DbConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory: ConnectionFactory::new(config),
                settings: config.pool.clone(),
                semaphore: Arc::new(Semaphore::new(config.pool.max_connections)),
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    busy: HashSet::new(),
                    next_id: 0,
                }),
                closed: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Eagerly opens `min_connections` connections.
    ///
    /// Returns `Ok(false)` (with a warning) if the pool was already
    /// initialized; a repeat call is a no-op, not an error. A connection
    /// failure here is fatal to startup and propagates.
    pub async fn initialize(&self) -> Result<bool, DbError> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            tracing::warn!("connection pool already initialized, ignoring repeat call");
            return Ok(false);
        }

        let inner = self.inner.clone();
        task::spawn_blocking(move || {
            for _ in 0..inner.settings.min_connections {
                let conn = inner.factory.open()?;
                let mut state = inner.lock_state();
                state.next_id += 1;
                let id = state.next_id;
                state.idle.push(TrackedConnection {
                    id,
                    conn,
                    idle_since: Instant::now(),
                });
            }
            Ok::<_, PoolError>(())
        })
        .await??;

        tracing::info!(
            min = self.inner.settings.min_connections,
            max = self.inner.settings.max_connections,
            "connection pool initialized"
        );
        Ok(true)
    }

    /// Acquires a connection within the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection, DbError> {
        self.acquire_timeout(self.inner.settings.acquire_timeout())
            .await
    }

    /// Acquires a connection, waiting at most `timeout`.
    ///
    /// If every connection is busy and the pool is at `max_connections`, the
    /// caller waits until one is released or the timeout elapses, whichever
    /// comes first. A timed-out or cancelled wait leaves pool state
    /// untouched — the permit is the only thing being awaited.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection, DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed.into());
        }

        let permit = match tokio::time::timeout(
            timeout,
            self.inner.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed.into()),
            Err(_) => {
                return Err(PoolError::Exhausted {
                    waited_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        };

        // close() may have drained the idle set while we held the permit.
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed.into());
        }

        // Holding a permit guarantees a slot: either an idle connection
        // exists or total is below max and we may open a new one.
        let reused = {
            let mut state = self.inner.lock_state();
            self.inner.prune_stale_idle(&mut state);
            state.idle.pop().map(|tracked| {
                state.busy.insert(tracked.id);
                tracked
            })
        };

        let tracked = match reused {
            Some(tracked) => tracked,
            None => {
                let factory = self.inner.factory.clone();
                let conn = task::spawn_blocking(move || factory.open()).await??;
                let mut state = self.inner.lock_state();
                state.next_id += 1;
                let id = state.next_id;
                state.busy.insert(id);
                tracing::debug!(id, "opened new pooled connection");
                TrackedConnection {
                    id,
                    conn,
                    idle_since: Instant::now(),
                }
            }
        };

        Ok(PooledConnection {
            conn: Some(tracked.conn),
            id: tracked.id,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Acquires a connection, runs `f` on a blocking worker, and releases
    /// the connection on every exit path, panics included.
    ///
    /// This is the only sanctioned way application code touches a
    /// connection.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.acquire().await?;
        task::spawn_blocking(move || f(&mut guard)).await?
    }

    /// Closes the pool: waiters fail with [`PoolError::Closed`], idle
    /// connections are closed best-effort, and busy connections are closed
    /// as they are released. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("connection pool already closed");
            return;
        }
        self.inner.semaphore.close();

        let inner = self.inner.clone();
        let closed = task::spawn_blocking(move || {
            let (idle, still_busy) = {
                let mut state = inner.lock_state();
                (std::mem::take(&mut state.idle), state.busy.len())
            };
            let count = idle.len();
            for tracked in idle {
                if let Err((_conn, e)) = tracked.conn.close() {
                    // One bad connection must not stop the rest from closing.
                    tracing::warn!(id = tracked.id, error = %e, "failed to close idle connection");
                }
            }
            if still_busy > 0 {
                tracing::warn!(
                    count = still_busy,
                    "connections still checked out at close, closing on release"
                );
            }
            count
        })
        .await;

        match closed {
            Ok(count) => tracing::info!(count, "connection pool closed"),
            Err(e) => tracing::error!(error = %e, "pool close task failed"),
        }
    }

    /// Consistent occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        PoolStats {
            total: state.idle.len() + state.busy.len(),
            available: state.idle.len(),
            busy: state.busy.len(),
            min: self.inner.settings.min_connections,
            max: self.inner.settings.max_connections,
        }
    }

    /// Whether [`Pool::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// A connection checked out of the pool.
///
/// Dropping the guard returns the connection to the idle set and only then
/// frees the checkout slot, so a waiter woken by the freed permit always
/// finds the connection available.
pub struct PooledConnection {
    conn: Option<Connection>,
    id: u64,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Pool-internal id of this connection, for diagnostics.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("released", &self.conn.is_none())
            .finish()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("BUG: pooled connection used after release")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("BUG: pooled connection used after release")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(self.id, conn);
        }
        // `_permit` drops after this body, freeing the slot last.
    }
}
