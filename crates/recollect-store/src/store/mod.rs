//! Fragment store implementation using SQLite.
//!
//! Two tables keyed by fragment id:
//!
//! - `fragments`: binary payload, type, confidence, `created_at`, `last_evolved`
//! - `fragment_metadata`: temporal tags, symbolic tags, links, access pattern,
//!   narrative role (JSON text columns)
//!
//! plus a `meta` table holding the codec version marker row.
//!
//! The database runs in WAL mode with a large page cache and in-memory temp
//! storage. File-backed stores keep one writer connection (transactions are
//! serialized on its mutex) and a separate read-only connection, so reads see
//! the last committed snapshot and never wait on a commit in progress.

mod fragment_ops;
pub mod query;
mod scan_ops;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, TransactionBehavior, params};
use tracing::{debug, info};

use crate::codec::{CODEC_VERSION, CodecError};
use crate::error::{Result, StoreError};

pub use query::{CommitReport, FragmentSummary, MetadataUpdate, StoreStats};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

/// Meta key of the codec version marker row.
pub const CODEC_VERSION_KEY: &str = "codec.version";

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Connection tuning for a fragment store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// SQLite page cache size in KiB.
    pub cache_size_kib: u32,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_size_kib: 64 * 1024,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fragment Store
// ─────────────────────────────────────────────────────────────────────────────

/// Fragment store backed by SQLite.
pub struct FragmentStore {
    /// The writer connection. Every transaction takes this lock.
    pub(crate) writer: Mutex<Connection>,
    /// Read-only connection for file-backed stores.
    pub(crate) reader: Option<Mutex<Connection>>,
    /// Database file, `None` when in-memory.
    path: Option<PathBuf>,
}

impl std::fmt::Debug for FragmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStore")
            .field("path", &self.path)
            .field("has_reader", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl FragmentStore {
    /// Open or create a fragment store at the given path with default tuning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, &StoreOptions::default())
    }

    /// Open or create a fragment store at the given path.
    ///
    /// Creates the database file and schema if they don't exist, and checks
    /// the codec version marker of an existing database.
    pub fn open_with_options(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                StoreError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        let writer = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize(&writer, options)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(options.busy_timeout)?;
        reader.pragma_update(None, "cache_size", -i64::from(options.cache_size_kib))?;
        reader.pragma_update(None, "query_only", "ON")?;

        info!(path = %path.display(), "Fragment store opened");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory store (useful for testing).
    ///
    /// Reads share the writer connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn, &StoreOptions::default())?;

        info!("In-memory fragment store created");
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
            path: None,
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply write-heavy pragmas, create the schema and check the codec marker.
    fn initialize(conn: &Connection, options: &StoreOptions) -> Result<()> {
        conn.busy_timeout(options.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", -i64::from(options.cache_size_kib))?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::create_schema(conn)?;
        Self::check_codec_marker(conn)?;
        Ok(())
    }

    /// Create the database schema.
    fn create_schema(conn: &Connection) -> Result<()> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            -- Fragment core: payload and scalar columns used for filtering
            CREATE TABLE IF NOT EXISTS fragments (
                id TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                fragment_type INTEGER NOT NULL,
                confidence_score REAL NOT NULL
                    CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0),
                created_at INTEGER NOT NULL,
                last_evolved INTEGER NOT NULL
            );

            -- Range scans by creation time
            CREATE INDEX IF NOT EXISTS idx_fragments_created_at
                ON fragments(created_at);

            -- Filtered scans by type and confidence
            CREATE INDEX IF NOT EXISTS idx_fragments_type_confidence
                ON fragments(fragment_type, confidence_score);

            -- Fragment metadata: normalized JSON columns
            CREATE TABLE IF NOT EXISTS fragment_metadata (
                id TEXT PRIMARY KEY REFERENCES fragments(id) ON DELETE CASCADE,
                category TEXT NOT NULL,
                temporal_tags TEXT NOT NULL,
                symbolic_tags TEXT NOT NULL DEFAULT '[]',
                associative_links TEXT NOT NULL DEFAULT '[]',
                access_pattern TEXT NOT NULL,
                narrative_role TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fragment_metadata_category
                ON fragment_metadata(category);

            -- Store metadata (codec version marker)
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::Migration(e.to_string()))?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Write the codec marker on a fresh database, or verify it on an old one.
    fn check_codec_marker(conn: &Connection) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![CODEC_VERSION_KEY],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match stored {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                    params![CODEC_VERSION_KEY, CODEC_VERSION.to_string()],
                )?;
                Ok(())
            }
            Some(value) => {
                let found: u8 = value.parse().map_err(|_| {
                    StoreError::InvalidData(format!("codec version marker '{}'", value))
                })?;
                if found != CODEC_VERSION {
                    return Err(CodecError::VersionMismatch {
                        expected: CODEC_VERSION,
                        found,
                    }
                    .into());
                }
                Ok(())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

impl FragmentStore {
    /// Execute a function within an immediate write transaction.
    ///
    /// If the closure returns an error, all changes are rolled back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            // Dropping the transaction rolls it back.
            Err(e) => Err(e),
        }
    }

    /// Run a read against the read connection (or the writer when in-memory).
    pub(crate) fn with_reader<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        match &self.reader {
            Some(reader) => f(&reader.lock()),
            None => f(&self.writer.lock()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Utility Operations
// ─────────────────────────────────────────────────────────────────────────────

impl FragmentStore {
    /// Get a metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = ?1")?;
            let mut rows = stmt.query(params![key])?;

            if let Some(row) = rows.next()? {
                Ok(Some(row.get(0)?))
            } else {
                Ok(None)
            }
        })
    }

    /// Set a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get database statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let (fragment_count, category_count, linked_count, oldest, newest) =
            self.with_reader(|conn| {
                let fragment_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
                let category_count: i64 = conn.query_row(
                    "SELECT COUNT(DISTINCT category) FROM fragment_metadata",
                    [],
                    |row| row.get(0),
                )?;
                let linked_count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM fragment_metadata WHERE json_array_length(associative_links) > 0",
                    [],
                    |row| row.get(0),
                )?;
                let (oldest, newest): (Option<i64>, Option<i64>) = conn.query_row(
                    "SELECT MIN(created_at), MAX(created_at) FROM fragments",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok((fragment_count, category_count, linked_count, oldest, newest))
            })?;

        Ok(StoreStats {
            fragment_count: fragment_count as usize,
            category_count: category_count as usize,
            linked_count: linked_count as usize,
            oldest: oldest.map(micros_to_datetime).transpose()?,
            newest: newest.map(micros_to_datetime).transpose()?,
            schema_version: SCHEMA_VERSION,
            codec_version: CODEC_VERSION,
            path: self.path.clone(),
        })
    }
}

/// Convert stored epoch microseconds back into a timestamp.
pub(crate) fn micros_to_datetime(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| CodecError::InvalidTimestamp(micros).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fragment;

    fn create_test_store() -> FragmentStore {
        FragmentStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let store = create_test_store();
        let stats = store.stats().unwrap();
        assert_eq!(stats.fragment_count, 0);
        assert_eq!(stats.schema_version, SCHEMA_VERSION);
        assert!(stats.path.is_none());
    }

    #[test]
    fn test_codec_marker_written() {
        let store = create_test_store();
        assert_eq!(
            store.get_meta(CODEC_VERSION_KEY).unwrap(),
            Some(CODEC_VERSION.to_string())
        );
    }

    #[test]
    fn test_meta_operations() {
        let store = create_test_store();

        assert!(store.get_meta("test_key").unwrap().is_none());
        store.set_meta("test_key", "test_value").unwrap();
        assert_eq!(
            store.get_meta("test_key").unwrap(),
            Some("test_value".to_string())
        );
    }

    #[test]
    fn test_open_file_store_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fragments.db");

        {
            let store = FragmentStore::open(&path).unwrap();
            store
                .batch_commit(&[Fragment::new("persisted", "test")])
                .unwrap();
        }

        let store = FragmentStore::open(&path).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.fragment_count, 1);
        assert_eq!(stats.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_wal_mode_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::open(dir.path().join("wal.db")).unwrap();
        let mode: String = store
            .writer
            .lock()
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_codec_version_mismatch_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");

        {
            let store = FragmentStore::open(&path).unwrap();
            store
                .set_meta(CODEC_VERSION_KEY, &(CODEC_VERSION + 1).to_string())
                .unwrap();
        }

        let err = FragmentStore::open(&path).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Codec(CodecError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_with_transaction_rolls_back_on_error() {
        let store = create_test_store();

        let result: Result<()> = store.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                params!["tx_key", "tx_value"],
            )?;
            Err(StoreError::InvalidData("abort".to_string()))
        });

        assert!(result.is_err());
        assert!(store.get_meta("tx_key").unwrap().is_none());
    }
}
