//! Configuration loading and engine tuning.
//!
//! Single source of truth for database path resolution, pool sizing, the
//! pragma set applied to every connection, and backup scheduling. Settings
//! load from a TOML file with environment variable overrides, mirroring the
//! rest of the deployment surface.

use rusqlite::Connection;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::transaction::RetryPolicy;

/// Logical database names exposed to the application.
///
/// `Test` resolves to a shared-cache in-memory database so test runs never
/// touch the production file; each call yields a distinct database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbName {
    /// The on-disk production database.
    Main,
    /// An isolated in-memory database for tests.
    Test,
}

/// Top-level database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    /// Path to the SQLite database file, or a `file:...mode=memory` URI.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Open connections read-only. Writes will fail at the engine level.
    #[serde(default)]
    pub read_only: bool,

    /// Connection pool sizing and timeouts.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Pragmas applied to every connection at creation time.
    #[serde(default)]
    pub tuning: EngineTuning,

    /// Busy-retry behavior of the transaction coordinator.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Scheduled snapshot backups.
    #[serde(default)]
    pub backup: BackupConfig,
}

/// Pool sizing and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    /// Connections opened eagerly at initialization.
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Hard ceiling on simultaneously open connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long an acquire waits for a free connection before failing.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Idle connections above `min_connections` older than this are closed.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

/// Pragmas applied, in a fixed order, to every connection the factory opens.
///
/// Divergence between connections is a correctness bug, so the pool never
/// opens a connection outside [`EngineTuning::apply`].
#[derive(Debug, Clone, Deserialize)]
pub struct EngineTuning {
    /// Journal mode. WAL allows concurrent readers with a single writer,
    /// which matches the chat workload (many readers, serialized writes).
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,

    /// Enforce foreign key constraints.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,

    /// Synchronous level. NORMAL is durable enough under WAL.
    #[serde(default = "default_synchronous")]
    pub synchronous: String,

    /// Page cache size in KiB (applied as a negative `cache_size`).
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u32,

    /// Temp store location.
    #[serde(default = "default_temp_store")]
    pub temp_store: String,

    /// Memory-mapped I/O window in bytes.
    #[serde(default = "default_mmap_size")]
    pub mmap_size: u64,

    /// Page size in bytes. `None` keeps the engine default. Only takes
    /// effect on a fresh database file.
    #[serde(default)]
    pub page_size: Option<u32>,

    /// Engine-level busy timeout for lock waits, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Scheduled backup settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Whether the periodic backup task runs at all.
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between snapshots.
    #[serde(default = "default_backup_interval_secs")]
    pub interval_secs: u64,

    /// Directory snapshot files are written to.
    #[serde(default = "default_backup_directory")]
    pub directory: String,

    /// How many snapshots to keep; older ones are pruned after each run.
    #[serde(default = "default_backup_retain")]
    pub retain: usize,
}

fn default_db_path() -> String {
    "polyglot.db".to_string()
}

fn default_min_connections() -> usize {
    2
}

fn default_max_connections() -> usize {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_journal_mode() -> String {
    "WAL".to_string()
}

fn default_true() -> bool {
    true
}

fn default_synchronous() -> String {
    "NORMAL".to_string()
}

fn default_cache_size_kib() -> u32 {
    64_000
}

fn default_temp_store() -> String {
    "MEMORY".to_string()
}

fn default_mmap_size() -> u64 {
    268_435_456
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_backup_interval_secs() -> u64 {
    21_600
}

fn default_backup_directory() -> String {
    "backups".to_string()
}

fn default_backup_retain() -> usize {
    7
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            read_only: false,
            pool: PoolSettings::default(),
            tuning: EngineTuning::default(),
            retry: RetryPolicy::default(),
            backup: BackupConfig::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            journal_mode: default_journal_mode(),
            foreign_keys: true,
            synchronous: default_synchronous(),
            cache_size_kib: default_cache_size_kib(),
            temp_store: default_temp_store(),
            mmap_size: default_mmap_size(),
            page_size: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_backup_interval_secs(),
            directory: default_backup_directory(),
            retain: default_backup_retain(),
        }
    }
}

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Pool sizing violates `0 < min <= max`.
    #[error("invalid pool sizing: min={min}, max={max} (expected 0 < min <= max)")]
    InvalidPoolSize { min: usize, max: usize },

    /// The directory that should hold the database file does not exist.
    #[error("database directory does not exist: {path}")]
    MissingDirectory { path: String },
}

/// Monotonic label for in-memory test databases, so two `Test` configs in
/// the same process never share state.
static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

impl PoolSettings {
    /// Acquire timeout as a `Duration`.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Idle timeout as a `Duration`.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_connections == 0 || self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidPoolSize {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        Ok(())
    }
}

impl EngineTuning {
    /// Applies the full pragma set to a freshly opened connection.
    ///
    /// The journal mode pragma reports the mode actually in effect, so it is
    /// queried and verified rather than fired blindly. In-memory databases
    /// report "memory", which is expected and acceptable.
    pub fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        if let Some(page_size) = self.page_size {
            conn.execute_batch(&format!("PRAGMA page_size = {page_size};"))?;
        }

        let journal_mode: String = conn.query_row(
            &format!("PRAGMA journal_mode = {};", self.journal_mode),
            [],
            |row| row.get(0),
        )?;
        let requested = self.journal_mode.to_ascii_lowercase();
        if journal_mode != requested && journal_mode != "memory" {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!(
                    "failed to set journal mode {}, got: {}",
                    self.journal_mode, journal_mode
                )),
            ));
        }

        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = {};
             PRAGMA synchronous = {};
             PRAGMA cache_size = -{};
             PRAGMA temp_store = {};
             PRAGMA mmap_size = {};
             PRAGMA busy_timeout = {};",
            if self.foreign_keys { "ON" } else { "OFF" },
            self.synchronous,
            self.cache_size_kib,
            self.temp_store,
            self.mmap_size,
            self.busy_timeout_ms,
        ))
    }
}

impl DbConfig {
    /// Returns the configuration for a logical database name.
    pub fn for_name(name: DbName) -> Self {
        match name {
            DbName::Main => Self::default(),
            DbName::Test => {
                let n = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
                Self {
                    path: format!("file:polyglot-test-{n}?mode=memory&cache=shared"),
                    backup: BackupConfig {
                        enabled: false,
                        ..BackupConfig::default()
                    },
                    ..Self::default()
                }
            }
        }
    }

    /// Whether this configuration points at an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.path == ":memory:" || self.path.contains("mode=memory")
    }

    /// Validates pool sizing and, for on-disk databases, that the directory
    /// meant to hold the file already exists. Run at construction so a bad
    /// path fails at startup rather than on first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;

        if !self.is_memory() {
            if let Some(parent) = Path::new(&self.path).parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    return Err(ConfigError::MissingDirectory {
                        path: parent.display().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `POLYGLOT_DB_PATH` overrides `path`
/// - `POLYGLOT_POOL_MAX` overrides `pool.max_connections`
/// - `POLYGLOT_BACKUP_ENABLED` overrides `backup.enabled` ("true"/"1")
/// - `POLYGLOT_BACKUP_RETAIN` overrides `backup.retain`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<DbConfig, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                DbConfig::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => DbConfig::default(),
    };

    if let Ok(db_path) = std::env::var("POLYGLOT_DB_PATH") {
        config.path = db_path;
    }
    if let Ok(max) = std::env::var("POLYGLOT_POOL_MAX") {
        if let Ok(parsed) = max.parse::<usize>() {
            config.pool.max_connections = parsed;
            if config.pool.min_connections > parsed {
                tracing::debug!(max = parsed, "clamping pool.min_connections to overridden max");
                config.pool.min_connections = parsed;
            }
        }
    }
    if let Ok(enabled) = std::env::var("POLYGLOT_BACKUP_ENABLED") {
        config.backup.enabled = enabled == "true" || enabled == "1";
    }
    if let Ok(retain) = std::env::var("POLYGLOT_BACKUP_RETAIN") {
        if let Ok(parsed) = retain.parse::<usize>() {
            config.backup.retain = parsed;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = DbConfig::for_name(DbName::Test);
        config.validate().expect("default test config should validate");
        assert!(config.is_memory());
        assert!(!config.backup.enabled);
    }

    #[test]
    fn zero_min_connections_rejected() {
        let mut config = DbConfig::for_name(DbName::Test);
        config.pool.min_connections = 0;
        match config.validate() {
            Err(ConfigError::InvalidPoolSize { min: 0, .. }) => {}
            other => panic!("expected InvalidPoolSize, got {other:?}"),
        }
    }

    #[test]
    fn min_above_max_rejected() {
        let mut config = DbConfig::for_name(DbName::Test);
        config.pool.min_connections = 5;
        config.pool.max_connections = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPoolSize { min: 5, max: 3 })
        ));
    }

    #[test]
    fn missing_directory_rejected() {
        let config = DbConfig {
            path: "/nonexistent-polyglot-dir/app.db".to_string(),
            ..DbConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDirectory { .. })
        ));
    }

    #[test]
    fn test_databases_are_distinct() {
        let a = DbConfig::for_name(DbName::Test);
        let b = DbConfig::for_name(DbName::Test);
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn tuning_applies_to_memory_connection() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        EngineTuning::default().apply(&conn).expect("tuning should apply");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i64 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 5_000);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: DbConfig = toml::from_str(
            r#"
            path = "chat.db"

            [pool]
            min_connections = 1
            max_connections = 3
            acquire_timeout_ms = 250

            [backup]
            enabled = true
            retain = 3
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.path, "chat.db");
        assert_eq!(config.pool.min_connections, 1);
        assert_eq!(config.pool.max_connections, 3);
        assert_eq!(config.pool.acquire_timeout(), Duration::from_millis(250));
        assert!(config.backup.enabled);
        assert_eq!(config.backup.retain, 3);
        // untouched sections keep their defaults
        assert_eq!(config.tuning.journal_mode, "WAL");
        assert_eq!(config.retry.max_retries, 3);
    }
}
