//! Durable queue set on SQLite.
//!
//! Both daemons open the same database file. Every transaction starts with
//! `BEGIN IMMEDIATE`, which takes the database write lock up front, so two
//! processes never interleave inside a multi-step queue mutation. A busy
//! timeout makes the second writer wait for the lock instead of failing.

use crate::error::{Error, Result};
use crate::queue::{Queue, QueueStore, QueueTxn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_items (
    seq   INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    item  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS queue_items_by_queue ON queue_items (queue, seq);
";

/// How long a writer waits for another process to release the lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue set stored in one SQLite database.
pub struct SqliteQueues {
    conn: Mutex<Connection>,
}

impl SqliteQueues {
    /// Open or create the queue database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::init(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

struct SqliteTxn<'a> {
    tx: Transaction<'a>,
}

impl QueueTxn for SqliteTxn<'_> {
    fn items(&self, queue: Queue) -> Result<Vec<String>> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT item FROM queue_items WHERE queue = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![queue.as_str()], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn push_back(&mut self, queue: Queue, item: &str) -> Result<()> {
        self.tx.execute(
            "INSERT INTO queue_items (queue, item) VALUES (?1, ?2)",
            params![queue.as_str(), item],
        )?;
        Ok(())
    }

    fn pop_front(&mut self, queue: Queue) -> Result<Option<String>> {
        let head = self
            .tx
            .query_row(
                "SELECT seq, item FROM queue_items WHERE queue = ?1 ORDER BY seq LIMIT 1",
                params![queue.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match head {
            Some((seq, item)) => {
                self.tx
                    .execute("DELETE FROM queue_items WHERE seq = ?1", params![seq])?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    fn remove(&mut self, queue: Queue, item: &str) -> Result<usize> {
        Ok(self.tx.execute(
            "DELETE FROM queue_items WHERE queue = ?1 AND item = ?2",
            params![queue.as_str(), item],
        )?)
    }

    fn contains(&self, queue: Queue, item: &str) -> Result<bool> {
        let found = self
            .tx
            .query_row(
                "SELECT 1 FROM queue_items WHERE queue = ?1 AND item = ?2 LIMIT 1",
                params![queue.as_str(), item],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn len(&self, queue: Queue) -> Result<usize> {
        let n: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM queue_items WHERE queue = ?1",
            params![queue.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

impl QueueStore for SqliteQueues {
    fn transact<R>(&self, body: impl FnOnce(&mut dyn QueueTxn) -> Result<R>) -> Result<R> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("queue connection lock poisoned".into()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut txn = SqliteTxn { tx };
        // Dropping an uncommitted transaction rolls it back.
        let out = match body(&mut txn) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!("Queue transaction rolled back: {}", e);
                return Err(e);
            }
        };
        if let Err(e) = txn.tx.commit() {
            tracing::error!("Queue transaction commit failed: {}", e);
            return Err(e.into());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn fifo_order_and_removal() {
        let queues = SqliteQueues::open_in_memory().unwrap();
        queues
            .transact(|txn| {
                txn.push_back(Queue::Pub, "a")?;
                txn.push_back(Queue::Pub, "b")?;
                txn.push_back(Queue::Pub, "a")?;
                txn.push_back(Queue::Off, "a")
            })
            .unwrap();

        assert_eq!(queues.snapshot(Queue::Pub).unwrap(), vec!["a", "b", "a"]);
        let removed = queues.transact(|txn| txn.remove(Queue::Pub, "a")).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(queues.snapshot(Queue::Pub).unwrap(), vec!["b"]);
        assert_eq!(queues.snapshot(Queue::Off).unwrap(), vec!["a"]);
        assert_eq!(queues.transact(|txn| txn.pop_front(Queue::Pub)).unwrap(), Some("b".into()));
        assert_eq!(queues.transact(|txn| txn.pop_front(Queue::Pub)).unwrap(), None);
    }

    #[test]
    fn add_one_only_guards_duplicates() {
        let queues = SqliteQueues::open_in_memory().unwrap();
        assert!(queues.transact(|txn| txn.add_one_only(Queue::Wedge, "beefea68e6")).unwrap());
        assert!(!queues.transact(|txn| txn.add_one_only(Queue::Wedge, "beefea68e6")).unwrap());
        assert_eq!(queues.transact(|txn| txn.len(Queue::Wedge)).unwrap(), 1);
    }

    #[test]
    fn error_rolls_back() {
        let queues = SqliteQueues::open_in_memory().unwrap();
        queues.transact(|txn| txn.push_back(Queue::Node, "beefea68e6")).unwrap();

        let res: Result<()> = queues.transact(|txn| {
            txn.drain_into(Queue::Node, Queue::Staging)?;
            Err(Error::Aborted("interrupted".into()))
        });
        assert!(res.is_err());
        assert_eq!(queues.snapshot(Queue::Node).unwrap(), vec!["beefea68e6"]);
        assert!(queues.snapshot(Queue::Staging).unwrap().is_empty());
    }

    #[derive(Clone)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rollback_is_logged() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = CaptureWriter {
            buffer: Arc::clone(&buffer),
        };
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let queues = SqliteQueues::open_in_memory().unwrap();
        let res: Result<()> = queues.transact(|txn| {
            txn.push_back(Queue::Wedge, "beefea68e6")?;
            Err(Error::Aborted("interrupted".into()))
        });
        assert!(res.is_err());

        let captured = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(captured.contains("rolled back"));
        assert!(captured.contains("interrupted"));
    }

    #[test]
    fn shared_between_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queues.db");
        let writer = SqliteQueues::open(&path).unwrap();
        let reader = SqliteQueues::open(&path).unwrap();

        writer.transact(|txn| txn.add_one_only(Queue::Cfg, "payload")).unwrap();
        assert_eq!(reader.snapshot(Queue::Cfg).unwrap(), vec!["payload"]);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queues.db");
        {
            let queues = SqliteQueues::open(&path).unwrap();
            queues.transact(|txn| txn.push_back(Queue::Reg, "beefea68e6")).unwrap();
        }
        let queues = SqliteQueues::open(&path).unwrap();
        assert!(queues.transact(|txn| txn.contains(Queue::Reg, "beefea68e6")).unwrap());
    }
}
