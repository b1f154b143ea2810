//! `SQLite` inventory store: schema, pragmas, merge-upsert and queries.
//!
//! One row per [`Identity`]. The local and remote halves of a row are written
//! by separate single-statement upserts, so each merge is atomic per key and
//! a scan of one origin never touches the other origin's columns.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use thiserror::Error;
use tracing::debug;

use crate::model::types::{
    Candidate, IDENTITY_SCHEME, Identity, IdentityError, InventoryRecord, Origin, ScanRun,
    SizeMismatch,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to open store at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error(
        "Store {path} uses identity scheme '{found}' but this build uses '{expected}'; \
         records cannot be migrated between schemes, point --db at a fresh store"
    )]
    SchemeMismatch {
        path: PathBuf,
        found: String,
        expected: &'static str,
    },

    #[error("Store schema version {found} is newer than supported version {supported}")]
    NewerSchema { found: i64, supported: i64 },

    #[error("File size {0} does not fit in the store")]
    SizeOutOfRange(u64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Failure to merge one candidate.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The candidate itself is unusable; skip it and carry on.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The write failed; the in-flight merge is lost, committed data stands.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub const SCHEMA_VERSION: i64 = 1;

const MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS photos (
    filename TEXT NOT NULL,
    size INTEGER NOT NULL,
    seen_local INTEGER NOT NULL DEFAULT 0,
    seen_remote INTEGER NOT NULL DEFAULT 0,
    local_path TEXT,
    remote_path TEXT,
    remote_host TEXT,
    first_seen_at INTEGER NOT NULL,
    PRIMARY KEY (filename, size)
);

CREATE INDEX IF NOT EXISTS idx_photos_seen ON photos(seen_local, seen_remote);

CREATE TABLE IF NOT EXISTS scan_runs (
    id INTEGER PRIMARY KEY,
    origin TEXT NOT NULL,
    host TEXT,
    root TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER NOT NULL,
    accepted INTEGER NOT NULL,
    skipped INTEGER NOT NULL
);
";

const RECORD_COLUMNS: &str =
    "filename, size, seen_local, seen_remote, local_path, remote_path, remote_host, first_seen_at";

/// Operations shared by a plain store handle and an open [`ScanBatch`].
///
/// Every call is one upsert statement: either the whole origin half of the
/// row is written or nothing is.
pub trait MergeTarget {
    /// Connection the merge statements run on.
    fn connection(&self) -> &Connection;

    /// Record a local observation. Remote fields are left untouched.
    fn merge_local(&self, id: &Identity, local_path: &str) -> Result<(), StorageError> {
        let size = size_to_sql(id.size)?;
        self.connection().execute(
            "INSERT INTO photos(filename, size, seen_local, local_path, first_seen_at)
             VALUES(?1, ?2, 1, ?3, ?4)
             ON CONFLICT(filename, size) DO UPDATE SET
                seen_local = 1,
                local_path = excluded.local_path",
            params![id.name, size, local_path, now_millis()],
        )?;
        Ok(())
    }

    /// Record a remote observation. Local fields are left untouched.
    fn merge_remote(
        &self,
        id: &Identity,
        remote_path: &str,
        host: Option<&str>,
    ) -> Result<(), StorageError> {
        let size = size_to_sql(id.size)?;
        self.connection().execute(
            "INSERT INTO photos(filename, size, seen_remote, remote_path, remote_host, first_seen_at)
             VALUES(?1, ?2, 1, ?3, ?4, ?5)
             ON CONFLICT(filename, size) DO UPDATE SET
                seen_remote = 1,
                remote_path = excluded.remote_path,
                remote_host = COALESCE(excluded.remote_host, photos.remote_host)",
            params![id.name, size, remote_path, host, now_millis()],
        )?;
        Ok(())
    }

    /// Resolve the candidate's identity and merge it under its origin.
    fn merge(&self, candidate: &Candidate) -> Result<Identity, MergeError> {
        let id = Identity::of(candidate)?;
        match candidate.origin {
            Origin::Local => self.merge_local(&id, &candidate.raw_path)?,
            Origin::Remote => {
                self.merge_remote(&id, &candidate.raw_path, candidate.host.as_deref())?;
            }
        }
        Ok(id)
    }
}

/// Totals across the whole inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct InventoryCounts {
    pub total: u64,
    pub both: u64,
    pub local_only: u64,
    pub remote_only: u64,
}

pub struct InventoryStore {
    conn: Connection,
    path: PathBuf,
}

impl MergeTarget for InventoryStore {
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl InventoryStore {
    /// Open or create the store. Schema creation is idempotent; a store
    /// stamped with another identity scheme is refused.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path).map_err(|source| StorageError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        apply_pragmas(&conn)?;
        init_meta(&conn)?;
        check_identity_scheme(&conn, path)?;
        migrate(&mut conn)?;

        debug!(path = %path.display(), "opened inventory store");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn raw(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        read_schema_version(&self.conn)
    }

    pub fn identity_scheme(&self) -> Result<Option<String>, StorageError> {
        read_meta(&self.conn, "identity_scheme")
    }

    /// Start a batch that wraps an entire scan in one transaction.
    pub fn begin_scan(&mut self) -> Result<ScanBatch<'_>, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(ScanBatch { tx })
    }

    pub fn get(&self, id: &Identity) -> Result<Option<InventoryRecord>, StorageError> {
        let size = size_to_sql(id.size)?;
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM photos WHERE filename = ? AND size = ?"),
                params![id.name, size],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn record_count(&self) -> Result<u64, StorageError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    /// Records seen locally but never remotely, ordered by local path.
    pub fn missing_from_remote(&self) -> Result<Vec<InventoryRecord>, StorageError> {
        self.query_records(
            "WHERE seen_local = 1 AND seen_remote = 0 ORDER BY local_path, filename, size",
        )
    }

    /// Records seen remotely but never locally, ordered by remote path.
    pub fn missing_from_local(&self) -> Result<Vec<InventoryRecord>, StorageError> {
        self.query_records(
            "WHERE seen_remote = 1 AND seen_local = 0 ORDER BY remote_path, filename, size",
        )
    }

    /// Same file name on both origins where the local-only instance and the
    /// remote-only instance disagree on size.
    pub fn size_mismatches(&self) -> Result<Vec<SizeMismatch>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT l.local_path, l.size, r.remote_path, r.size
             FROM photos l
             JOIN photos r ON l.filename = r.filename
             WHERE l.seen_local = 1 AND l.seen_remote = 0
               AND r.seen_remote = 1 AND r.seen_local = 0
               AND l.size <> r.size
             ORDER BY l.local_path, r.remote_path",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SizeMismatch {
                local_path: row.get(0)?,
                local_size: size_from_sql(row.get(1)?),
                remote_path: row.get(2)?,
                remote_size: size_from_sql(row.get(3)?),
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn counts(&self) -> Result<InventoryCounts, StorageError> {
        let counts = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(seen_local = 1 AND seen_remote = 1), 0),
                    COALESCE(SUM(seen_local = 1 AND seen_remote = 0), 0),
                    COALESCE(SUM(seen_remote = 1 AND seen_local = 0), 0)
             FROM photos",
            [],
            |row| {
                let get = |idx: usize| -> rusqlite::Result<u64> {
                    Ok(u64::try_from(row.get::<_, i64>(idx)?).unwrap_or_default())
                };
                Ok(InventoryCounts {
                    total: get(0)?,
                    both: get(1)?,
                    local_only: get(2)?,
                    remote_only: get(3)?,
                })
            },
        )?;
        Ok(counts)
    }

    /// Most recent scans first.
    pub fn recent_scans(&self, limit: usize) -> Result<Vec<ScanRun>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT origin, host, root, started_at, finished_at, accepted, skipped
             FROM scan_runs ORDER BY finished_at DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let origin: String = row.get(0)?;
            let origin = Origin::parse(&origin).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown scan origin {origin:?}").into(),
                )
            })?;
            Ok(ScanRun {
                origin,
                host: row.get(1)?,
                root: row.get(2)?,
                started_at: row.get(3)?,
                finished_at: row.get(4)?,
                accepted: size_from_sql(row.get(5)?),
                skipped: size_from_sql(row.get(6)?),
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn query_records(&self, clause: &str) -> Result<Vec<InventoryRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM photos {clause}"))?;
        let rows = stmt.query_map([], record_from_row)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

/// A whole scan run inside one immediate transaction.
///
/// Merges made through the batch become visible on [`ScanBatch::commit`];
/// dropping the batch without committing rolls all of them back.
pub struct ScanBatch<'a> {
    tx: Transaction<'a>,
}

impl MergeTarget for ScanBatch<'_> {
    fn connection(&self) -> &Connection {
        &self.tx
    }
}

impl ScanBatch<'_> {
    pub fn record_scan(&self, run: &ScanRun) -> Result<(), StorageError> {
        self.tx.execute(
            "INSERT INTO scan_runs(origin, host, root, started_at, finished_at, accepted, skipped)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            params![
                run.origin.as_str(),
                run.host,
                run.root,
                run.started_at,
                run.finished_at,
                size_to_sql(run.accepted)?,
                size_to_sql(run.skipped)?,
            ],
        )?;
        Ok(())
    }

    pub fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }
}

/// Current time as milliseconds since epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn size_to_sql(size: u64) -> Result<i64, StorageError> {
    i64::try_from(size).map_err(|_| StorageError::SizeOutOfRange(size))
}

fn size_from_sql(size: i64) -> u64 {
    u64::try_from(size).unwrap_or_default()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryRecord> {
    Ok(InventoryRecord {
        identity: Identity::new(row.get::<_, String>(0)?, size_from_sql(row.get(1)?)),
        seen_locally: row.get::<_, i64>(2)? != 0,
        seen_remotely: row.get::<_, i64>(3)? != 0,
        local_path: row.get(4)?,
        remote_path: row.get(5)?,
        remote_host: row.get(6)?,
        first_seen_at: row.get(7)?,
    })
}

fn apply_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        ",
    )?;
    Ok(())
}

fn init_meta(conn: &Connection) -> Result<(), StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    // Start at version 0 so migrate() applies the full schema on first open.
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', '0')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES('identity_scheme', ?)",
        params![IDENTITY_SCHEME],
    )?;
    Ok(())
}

fn check_identity_scheme(conn: &Connection, path: &Path) -> Result<(), StorageError> {
    match read_meta(conn, "identity_scheme")? {
        Some(found) if found != IDENTITY_SCHEME => Err(StorageError::SchemeMismatch {
            path: path.to_path_buf(),
            found,
            expected: IDENTITY_SCHEME,
        }),
        _ => Ok(()),
    }
}

fn migrate(conn: &mut Connection) -> Result<(), StorageError> {
    let current = read_schema_version(conn)?;
    if current == SCHEMA_VERSION {
        return Ok(());
    }
    if current > SCHEMA_VERSION {
        return Err(StorageError::NewerSchema {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    tx.execute_batch(MIGRATION_V1)?;
    tx.execute(
        "UPDATE meta SET value = ? WHERE key = 'schema_version'",
        params![SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;
    Ok(())
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, StorageError> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

fn read_schema_version(conn: &Connection) -> Result<i64, StorageError> {
    Ok(read_meta(conn, "schema_version")?
        .and_then(|s| s.parse().ok())
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, InventoryStore) {
        let tmp = TempDir::new().unwrap();
        let store = InventoryStore::open(&tmp.path().join("photos.db")).unwrap();
        (tmp, store)
    }

    #[test]
    fn open_creates_schema_and_stamps_scheme() {
        let (_tmp, store) = open_temp();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(
            store.identity_scheme().unwrap().as_deref(),
            Some(IDENTITY_SCHEME)
        );
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn reopen_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photos.db");
        {
            let store = InventoryStore::open(&path).unwrap();
            store
                .merge_local(&Identity::new("a.jpg", 1), "/l/a.jpg")
                .unwrap();
        }
        let store = InventoryStore::open(&path).unwrap();
        assert_eq!(store.record_count().unwrap(), 1);
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn foreign_scheme_is_refused() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photos.db");
        {
            let store = InventoryStore::open(&path).unwrap();
            store
                .raw()
                .execute(
                    "UPDATE meta SET value = 'relative_path' WHERE key = 'identity_scheme'",
                    [],
                )
                .unwrap();
        }
        let err = InventoryStore::open(&path).err().expect("scheme mismatch");
        assert!(matches!(err, StorageError::SchemeMismatch { .. }), "{err}");
    }

    #[test]
    fn newer_schema_is_refused() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photos.db");
        {
            let store = InventoryStore::open(&path).unwrap();
            store
                .raw()
                .execute("UPDATE meta SET value = '99' WHERE key = 'schema_version'", [])
                .unwrap();
        }
        assert!(matches!(
            InventoryStore::open(&path),
            Err(StorageError::NewerSchema { found: 99, .. })
        ));
    }

    #[test]
    fn oversized_file_is_a_storage_error() {
        let (_tmp, store) = open_temp();
        let err = store
            .merge_local(&Identity::new("huge.mp4", u64::MAX), "/l/huge.mp4")
            .unwrap_err();
        assert!(matches!(err, StorageError::SizeOutOfRange(u64::MAX)));
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn dropped_batch_rolls_back() {
        let (_tmp, mut store) = open_temp();
        {
            let batch = store.begin_scan().unwrap();
            batch
                .merge_local(&Identity::new("a.jpg", 1), "/l/a.jpg")
                .unwrap();
        }
        assert_eq!(store.record_count().unwrap(), 0);

        let batch = store.begin_scan().unwrap();
        batch
            .merge_local(&Identity::new("a.jpg", 1), "/l/a.jpg")
            .unwrap();
        batch.commit().unwrap();
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[test]
    fn counts_cover_every_state() {
        let (_tmp, store) = open_temp();
        assert_eq!(store.counts().unwrap(), InventoryCounts::default());

        store.merge_local(&Identity::new("a.jpg", 1), "/l/a.jpg").unwrap();
        store
            .merge_remote(&Identity::new("b.jpg", 2), "/r/b.jpg", Some("nas"))
            .unwrap();
        store.merge_local(&Identity::new("c.jpg", 3), "/l/c.jpg").unwrap();
        store
            .merge_remote(&Identity::new("c.jpg", 3), "/r/c.jpg", Some("nas"))
            .unwrap();

        assert_eq!(
            store.counts().unwrap(),
            InventoryCounts {
                total: 3,
                both: 1,
                local_only: 1,
                remote_only: 1,
            }
        );
    }

    #[test]
    fn scan_runs_are_listed_newest_first() {
        let (_tmp, mut store) = open_temp();
        let batch = store.begin_scan().unwrap();
        for (i, origin) in [Origin::Local, Origin::Remote].into_iter().enumerate() {
            let at = i64::try_from(i).unwrap() * 1000;
            batch
                .record_scan(&ScanRun {
                    origin,
                    host: (origin == Origin::Remote).then(|| "nas".to_string()),
                    root: "/pics".into(),
                    started_at: at,
                    finished_at: at + 10,
                    accepted: 5,
                    skipped: 1,
                })
                .unwrap();
        }
        batch.commit().unwrap();

        let runs = store.recent_scans(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].origin, Origin::Remote);
        assert_eq!(runs[0].host.as_deref(), Some("nas"));
        assert_eq!(runs[1].origin, Origin::Local);
        assert_eq!(store.recent_scans(1).unwrap().len(), 1);
    }

    #[test]
    fn unknown_scan_origin_is_an_error() {
        let (_tmp, store) = open_temp();
        store
            .raw()
            .execute(
                "INSERT INTO scan_runs(origin, root, started_at, finished_at, accepted, skipped)
                 VALUES('tape', '/pics', 0, 1, 0, 0)",
                [],
            )
            .unwrap();

        let err = store.recent_scans(5).unwrap_err();
        assert!(err.to_string().contains("tape"), "{err}");
    }
}
