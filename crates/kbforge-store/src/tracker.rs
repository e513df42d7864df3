//! SQLite dedup ledger keyed by file content hash.
//!
//! Callers check connections out of a small pool; every operation also holds a
//! single writer lock, so ledger access is serialized even across threads.

use std::io::Read;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::schema::SCHEMA_SQL;
use crate::types::DuplicateRecord;
use kbforge_core::{Error, Result};

/// Idle connections kept for reuse.
const MAX_IDLE_CONNECTIONS: usize = 4;
/// Block size for streamed hashing.
const HASH_BLOCK_SIZE: usize = 4096;

/// Persistent, thread-safe record of processed file contents.
pub struct DuplicateTracker {
    db_path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    write_lock: Mutex<()>,
}

impl DuplicateTracker {
    /// Open or create the ledger at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::Database(e.to_string()))?;
            }
        }

        let conn = Self::create_connection(&db_path)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        let tracker = Self {
            db_path,
            idle: Mutex::new(vec![conn]),
            write_lock: Mutex::new(()),
        };

        info!(
            "DuplicateTracker initialized: {} records, path={}",
            tracker.count()?,
            tracker.db_path.display()
        );
        Ok(tracker)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(conn)
    }

    /// Run `f` on a pooled connection under the writer lock.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!("Opening additional ledger connection");
                Self::create_connection(&self.db_path)?
            }
        };
        let result = f(&conn);
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
        result
    }

    /// True iff `file_hash` has been recorded before. The path is informational.
    ///
    /// Ledger faults are logged and reported as "not a duplicate", so the file
    /// gets reprocessed rather than silently dropped.
    pub fn is_duplicate(&self, file_path: &str, file_hash: &str) -> bool {
        match self.lookup_hash(file_hash) {
            Ok(Some(previous)) => {
                debug!(
                    "Hash {} already recorded for {} (now seen at {})",
                    short_hash(file_hash),
                    previous,
                    file_path
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("Duplicate check failed for {}, treating as new: {}", file_path, e);
                false
            }
        }
    }

    fn lookup_hash(&self, file_hash: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.prepare_cached("SELECT file_path FROM processed_files WHERE file_hash = ?1")
                .map_err(|e| Error::Database(e.to_string()))?
                .query_row(params![file_hash], |row| row.get::<_, String>(0))
                .optional()
                .map_err(|e| Error::Database(e.to_string()))
        })
    }

    /// Upsert a record. Re-recording a known hash under another path moves the
    /// path reference to the latest caller.
    pub fn record_processed(&self, file_path: &str, file_hash: &str) -> Result<()> {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.with_conn(|conn| {
            conn.prepare_cached(
                "INSERT OR REPLACE INTO processed_files (file_path, file_hash, processed_at)
                 VALUES (?1, ?2, ?3)",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .execute(params![file_path, file_hash, now])
            .map_err(|e| Error::Database(e.to_string()))?;
            Ok(())
        })?;
        debug!("Recorded {} as {}", file_path, short_hash(file_hash));
        Ok(())
    }

    /// Every recorded path, sorted.
    pub fn get_all_tracked_files(&self) -> Result<Vec<String>> {
        self.scan_column("SELECT file_path FROM processed_files ORDER BY file_path")
    }

    /// Every recorded hash, sorted.
    pub fn get_all_tracked_hashes(&self) -> Result<Vec<String>> {
        self.scan_column("SELECT file_hash FROM processed_files ORDER BY file_hash")
    }

    fn scan_column(&self, sql: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(sql)
                .map_err(|e| Error::Database(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| Error::Database(e.to_string()))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Database(e.to_string()))
        })
    }

    /// Full ledger rows, ordered by path.
    pub fn records(&self) -> Result<Vec<DuplicateRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT file_path, file_hash, processed_at FROM processed_files ORDER BY file_path",
                )
                .map_err(|e| Error::Database(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(DuplicateRecord {
                        file_path: row.get(0)?,
                        file_hash: row.get(1)?,
                        processed_at: row.get(2)?,
                    })
                })
                .map_err(|e| Error::Database(e.to_string()))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Database(e.to_string()))
        })
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM processed_files", [], |row| row.get(0))
                .map_err(|e| Error::Database(e.to_string()))
        })?;
        Ok(count as usize)
    }

    /// Administrative wipe. Returns the number of records removed.
    pub fn clear_all_records(&self) -> Result<usize> {
        let deleted = self.with_conn(|conn| {
            conn.execute("DELETE FROM processed_files", [])
                .map_err(|e| Error::Database(e.to_string()))
        })?;
        info!("Cleared {} ledger records", deleted);
        Ok(deleted)
    }
}

/// SHA-256 of a file's bytes, streamed in fixed-size blocks.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::from_io(e, path))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::from_io(e, path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// First eight hex digits, for logs and id suffixes.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_tracker() -> (DuplicateTracker, TempDir) {
        let dir = TempDir::new().unwrap();
        let tracker = DuplicateTracker::open(dir.path().join("processing_tracker.db")).unwrap();
        (tracker, dir)
    }

    #[test]
    fn test_duplicate_after_record() {
        let (tracker, _dir) = test_tracker();
        assert!(!tracker.is_duplicate("/in/a.pdf", "abc123"));

        tracker.record_processed("/in/a.pdf", "abc123").unwrap();
        assert!(tracker.is_duplicate("/in/a.pdf", "abc123"));
        // Identity is the hash, not the path.
        assert!(tracker.is_duplicate("/in/copy-of-a.pdf", "abc123"));
        assert!(!tracker.is_duplicate("/in/a.pdf", "def456"));
    }

    #[test]
    fn test_rerecord_same_hash_moves_path() {
        let (tracker, _dir) = test_tracker();
        tracker.record_processed("/in/a.pdf", "abc123").unwrap();
        tracker.record_processed("/in/renamed.pdf", "abc123").unwrap();

        assert_eq!(tracker.count().unwrap(), 1);
        assert_eq!(tracker.get_all_tracked_files().unwrap(), vec!["/in/renamed.pdf"]);
        assert_eq!(tracker.get_all_tracked_hashes().unwrap(), vec!["abc123"]);
    }

    #[test]
    fn test_clear_all_records() {
        let (tracker, _dir) = test_tracker();
        tracker.record_processed("/in/a.pdf", "h1").unwrap();
        tracker.record_processed("/in/b.pdf", "h2").unwrap();

        assert_eq!(tracker.clear_all_records().unwrap(), 2);
        assert_eq!(tracker.count().unwrap(), 0);
        assert!(!tracker.is_duplicate("/in/a.pdf", "h1"));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("processing_tracker.db");
        {
            let tracker = DuplicateTracker::open(&db).unwrap();
            tracker.record_processed("/in/a.pdf", "h1").unwrap();
        }
        let tracker = DuplicateTracker::open(&db).unwrap();
        let records = tracker.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_hash, "h1");
        assert!(records[0].processed_at.is_some());
    }

    #[test]
    fn test_ledger_fault_fails_open() {
        let (tracker, dir) = test_tracker();
        tracker.record_processed("/in/a.pdf", "h1").unwrap();

        let raw = Connection::open(dir.path().join("processing_tracker.db")).unwrap();
        raw.execute_batch("DROP TABLE processed_files").unwrap();

        assert!(!tracker.is_duplicate("/in/a.pdf", "h1"));
        assert!(tracker.record_processed("/in/a.pdf", "h1").is_err());
    }

    #[test]
    fn test_concurrent_records() {
        let (tracker, _dir) = test_tracker();
        std::thread::scope(|s| {
            for t in 0..4 {
                let tracker = &tracker;
                s.spawn(move || {
                    for i in 0..25 {
                        let path = format!("/in/{}-{}.pdf", t, i);
                        let hash = format!("hash-{}-{}", t, i);
                        tracker.record_processed(&path, &hash).unwrap();
                        assert!(tracker.is_duplicate(&path, &hash));
                    }
                });
            }
        });
        assert_eq!(tracker.count().unwrap(), 100);
    }

    #[test]
    fn test_hash_file_is_content_addressed() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("renamed copy.pdf");
        let c = dir.path().join("c.pdf");
        let body = vec![7u8; HASH_BLOCK_SIZE * 3 + 17];
        std::fs::write(&a, &body).unwrap();
        std::fs::write(&b, &body).unwrap();
        std::fs::write(&c, b"different").unwrap();

        let ha = hash_file(&a).unwrap();
        assert_eq!(ha, hash_file(&a).unwrap());
        assert_eq!(ha, hash_file(&b).unwrap());
        assert_ne!(ha, hash_file(&c).unwrap());
        assert_eq!(ha.len(), 64);

        assert!(matches!(
            hash_file(&dir.path().join("missing.pdf")),
            Err(Error::FileNotFound(_))
        ));
    }
}
