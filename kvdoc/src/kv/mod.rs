use crate::error::Result;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_READERS: usize = 2;
const MAX_READERS: usize = 8;

/// Ordered key-value substrate backed by SQLite.
///
/// Keys are compared bytewise. Named indexes map a `prefix*` pattern to the
/// ordered run of keys sharing that prefix. Every access happens inside a
/// transaction: [`KvStore::update`] commits when the closure succeeds and
/// rolls back otherwise, [`KvStore::view`] always rolls back.
///
/// File-backed stores run in WAL mode with one writer connection and a pool
/// of read-only connections, so views run concurrently with each other and
/// with the writer, each against the last committed snapshot. An in-memory
/// store has a single connection shared by readers and the writer.
pub struct KvStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl KvStore {
    /// Open or create a substrate file at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let writer = Connection::open(path)?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        writer.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        bootstrap(&writer)?;

        let count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_READERS)
            .clamp(MIN_READERS, MAX_READERS);
        let mut readers = Vec::with_capacity(count);
        for _ in 0..count {
            let reader = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            reader.busy_timeout(BUSY_TIMEOUT)?;
            readers.push(Mutex::new(reader));
        }
        log::debug!("Opened {} with {count} read connections", path.display());

        Ok(KvStore {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Open an in-memory substrate (for testing and scratch stores).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        bootstrap(&conn)?;
        Ok(KvStore {
            writer: Mutex::new(conn),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Run `f` in a read/write transaction. Writers are serialized.
    pub fn update<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        let mut conn = lock(&self.writer);
        let tx = Tx {
            inner: conn.transaction_with_behavior(TransactionBehavior::Immediate)?,
        };
        let out = f(&tx)?;
        tx.inner.commit()?;
        Ok(out)
    }

    /// Run `f` against a consistent snapshot. `f` must not write: on a
    /// file-backed store the read connection rejects writes, in memory they
    /// are rolled back.
    pub fn view<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.reader();
        let tx = Tx {
            inner: conn.transaction_with_behavior(TransactionBehavior::Deferred)?,
        };
        f(&tx)
    }

    /// Close every connection, flushing pending state.
    pub fn close(self) -> Result<()> {
        for reader in self.readers {
            close_connection(reader)?;
        }
        close_connection(self.writer)
    }

    /// An idle read connection if there is one, otherwise wait on the next
    /// one in rotation.
    fn reader(&self) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return lock(&self.writer);
        }
        for reader in &self.readers {
            if let Ok(guard) = reader.try_lock() {
                return guard;
            }
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        lock(&self.readers[idx])
    }
}

fn bootstrap(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS kv_indexes (
            name TEXT PRIMARY KEY,
            pattern TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn close_connection(conn: Mutex<Connection>) -> Result<()> {
    let conn = conn.into_inner().unwrap_or_else(PoisonError::into_inner);
    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}

/// An open substrate transaction.
pub struct Tx<'conn> {
    inner: rusqlite::Transaction<'conn>,
}

impl Tx<'_> {
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .inner
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Store `value` under `key`, returning the replaced value.
    pub fn set(&self, key: &str, value: &str) -> Result<Option<String>> {
        let previous = self.get(key)?;
        self.inner.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(previous)
    }

    /// Remove `key`, returning the removed value.
    pub fn delete(&self, key: &str) -> Result<Option<String>> {
        let previous = self.get(key)?;
        if previous.is_some() {
            self.inner
                .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        Ok(previous)
    }

    /// Names of all defined indexes, sorted.
    pub fn indexes(&self) -> Result<Vec<String>> {
        let mut stmt = self.inner.prepare("SELECT name FROM kv_indexes ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Define an index over keys matching `pattern` (a prefix followed by
    /// `*`). Redefining an existing index replaces its pattern.
    pub fn create_index(&self, name: &str, pattern: &str) -> Result<()> {
        self.inner.execute(
            "INSERT OR REPLACE INTO kv_indexes (name, pattern) VALUES (?1, ?2)",
            params![name, pattern],
        )?;
        Ok(())
    }

    pub fn index_pattern(&self, name: &str) -> Result<Option<String>> {
        let pattern = self
            .inner
            .query_row(
                "SELECT pattern FROM kv_indexes WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(pattern)
    }

    /// Visit the entries of an index in ascending key order until `f`
    /// returns `false`. An undefined index yields no entries.
    pub fn ascend(&self, index: &str, f: impl FnMut(&str, &str) -> Result<bool>) -> Result<()> {
        match self.index_pattern(index)? {
            Some(pattern) => self.scan_prefix(pattern_prefix(&pattern), false, f),
            None => Ok(()),
        }
    }

    /// Like [`Tx::ascend`], in descending key order.
    pub fn descend(&self, index: &str, f: impl FnMut(&str, &str) -> Result<bool>) -> Result<()> {
        match self.index_pattern(index)? {
            Some(pattern) => self.scan_prefix(pattern_prefix(&pattern), true, f),
            None => Ok(()),
        }
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        descending: bool,
        mut f: impl FnMut(&str, &str) -> Result<bool>,
    ) -> Result<()> {
        let sql = if descending {
            "SELECT key, value FROM kv WHERE key >= ?1 AND substr(key, 1, length(?1)) = ?1 ORDER BY key DESC"
        } else {
            "SELECT key, value FROM kv WHERE key >= ?1 AND substr(key, 1, length(?1)) = ?1 ORDER BY key"
        };
        let mut stmt = self.inner.prepare(sql)?;
        let mut rows = stmt.query(params![prefix])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            if !f(&key, &value)? {
                break;
            }
        }
        Ok(())
    }
}

fn pattern_prefix(pattern: &str) -> &str {
    pattern.strip_suffix('*').unwrap_or(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KvDocError;
    use std::sync::{mpsc, Arc};

    fn collect(kv: &KvStore, index: &str) -> Vec<(String, String)> {
        kv.view(|tx| {
            let mut out = Vec::new();
            tx.ascend(index, |k, v| {
                out.push((k.to_string(), v.to_string()));
                Ok(true)
            })?;
            Ok(out)
        })
        .unwrap()
    }

    #[test]
    fn test_set_get_delete() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.update(|tx| {
            assert_eq!(tx.set("a", "1")?, None);
            assert_eq!(tx.set("a", "2")?, Some("1".into()));
            Ok(())
        })
        .unwrap();

        let value = kv.view(|tx| tx.get("a")).unwrap();
        assert_eq!(value.as_deref(), Some("2"));

        let removed = kv.update(|tx| tx.delete("a")).unwrap();
        assert_eq!(removed.as_deref(), Some("2"));
        assert_eq!(kv.update(|tx| tx.delete("a")).unwrap(), None);
    }

    #[test]
    fn test_index_scans_prefix_in_order() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.update(|tx| {
            tx.create_index("idxusers", "users:*")?;
            tx.set("users:b", "B")?;
            tx.set("users:a", "A")?;
            tx.set("usersx:c", "no")?;
            tx.set("posts:a", "no")?;
            Ok(())
        })
        .unwrap();

        let entries = collect(&kv, "idxusers");
        assert_eq!(
            entries,
            vec![
                ("users:a".to_string(), "A".to_string()),
                ("users:b".to_string(), "B".to_string()),
            ]
        );

        let keys = kv
            .view(|tx| {
                let mut keys = Vec::new();
                tx.descend("idxusers", |k, _| {
                    keys.push(k.to_string());
                    Ok(true)
                })?;
                Ok(keys)
            })
            .unwrap();
        assert_eq!(keys, vec!["users:b", "users:a"]);
    }

    #[test]
    fn test_ascend_stops_early() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.update(|tx| {
            tx.create_index("idx", "k:*")?;
            for i in 0..5 {
                tx.set(&format!("k:{i}"), "v")?;
            }
            Ok(())
        })
        .unwrap();

        let seen = kv
            .view(|tx| {
                let mut seen = 0;
                tx.ascend("idx", |_, _| {
                    seen += 1;
                    Ok(seen < 2)
                })?;
                Ok(seen)
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_undefined_index_is_empty() {
        let kv = KvStore::open_in_memory().unwrap();
        assert!(collect(&kv, "missing").is_empty());
    }

    #[test]
    fn test_indexes_listed() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.update(|tx| {
            tx.create_index("b", "b:*")?;
            tx.create_index("a", "a:*")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(kv.view(|tx| tx.indexes()).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let kv = KvStore::open_in_memory().unwrap();
        let result: Result<()> = kv.update(|tx| {
            tx.set("a", "1")?;
            Err(KvDocError::MissingIdentifier)
        });
        assert!(result.is_err());
        assert_eq!(kv.view(|tx| tx.get("a")).unwrap(), None);
    }

    #[test]
    fn test_view_discards_writes() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.view(|tx| tx.set("a", "1")).unwrap();
        assert_eq!(kv.view(|tx| tx.get("a")).unwrap(), None);
    }

    #[test]
    fn test_reopen_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("data.db");
        {
            let kv = KvStore::open(&path).unwrap();
            kv.update(|tx| {
                tx.create_index("idx", "k:*")?;
                tx.set("k:1", "one")
            })
            .unwrap();
            kv.close().unwrap();
        }
        let kv = KvStore::open(&path).unwrap();
        assert_eq!(collect(&kv, "idx").len(), 1);
    }

    #[test]
    fn test_file_reads_do_not_wait_for_writer() {
        let tmp = tempfile::TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(&tmp.path().join("data.db")).unwrap());
        kv.update(|tx| tx.set("a", "old").map(|_| ())).unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let writer = {
            let kv = Arc::clone(&kv);
            std::thread::spawn(move || {
                kv.update(|tx| {
                    tx.set("a", "new")?;
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap();
            })
        };

        started_rx.recv().unwrap();
        // the write transaction is still open here
        assert_eq!(kv.view(|tx| tx.get("a")).unwrap().as_deref(), Some("old"));
        release_tx.send(()).unwrap();
        writer.join().unwrap();
        assert_eq!(kv.view(|tx| tx.get("a")).unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn test_file_view_rejects_writes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let kv = KvStore::open(&tmp.path().join("data.db")).unwrap();
        assert!(kv.view(|tx| tx.set("a", "1")).is_err());
        assert_eq!(kv.view(|tx| tx.get("a")).unwrap(), None);
    }
}
