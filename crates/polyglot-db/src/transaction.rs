//! Transaction coordinator with bounded busy-retry.
//!
//! Wraps a unit of work in explicit transaction boundaries on a pooled
//! connection. Transient single-writer contention (SQLITE_BUSY /
//! SQLITE_LOCKED) is absorbed by retrying the whole transaction — fresh
//! connection, fresh BEGIN — after a fixed delay, up to a bounded budget.
//! Anything else fails fast: business errors are rolled back and re-raised
//! verbatim, never retried.

use crate::error::DbError;
use crate::pool::Pool;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Bounded fixed-delay retry for busy errors.
///
/// Worst-case added latency is `max_retries * retry_delay_ms`, which keeps
/// tail latency predictable under contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// How many times a busy transaction is re-attempted after the first try.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// The fixed inter-attempt delay as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Runs `f` inside a transaction on a pool-acquired connection.
///
/// The transaction begins with `BEGIN IMMEDIATE` so write contention
/// surfaces at the start rather than at the first write. On success the
/// transaction commits and `f`'s result is returned. On error the
/// transaction rolls back and the original error propagates — a rollback
/// failure is logged and never masks the error that caused it.
///
/// Busy-classified failures are retried from scratch (including connection
/// acquisition) after `retry_delay`, at most `max_retries` times.
pub async fn run<T, F>(pool: &Pool, policy: RetryPolicy, f: F) -> Result<T, DbError>
where
    F: Fn(&Transaction<'_>) -> Result<T, DbError> + Send + Sync + 'static,
    T: Send + 'static,
{
    let f = Arc::new(f);
    let mut attempt: u32 = 0;
    loop {
        let body = f.clone();
        let result = pool
            .with_connection(move |conn| execute_once(conn, &*body))
            .await;

        match result {
            Err(err) if err.is_busy() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    "database busy, retrying transaction"
                );
                tokio::time::sleep(policy.retry_delay()).await;
            }
            other => return other,
        }
    }
}

fn execute_once<T, F>(conn: &mut Connection, f: &F) -> Result<T, DbError>
where
    F: Fn(&Transaction<'_>) -> Result<T, DbError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    match f(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::warn!(error = %rollback_err, "rollback failed after transaction error");
            }
            Err(err)
        }
    }
}
