//! In-memory queue set for tests and single-process tooling.

use crate::error::{Error, Result};
use crate::queue::{Queue, QueueStore, QueueTxn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

type Queues = BTreeMap<Queue, VecDeque<String>>;

/// Queue set held in process memory.
///
/// A transaction works on a copy of the queues and swaps it in on commit.
#[derive(Debug, Default)]
pub struct MemoryQueues {
    queues: Mutex<Queues>,
}

impl MemoryQueues {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTxn {
    queues: Queues,
}

impl QueueTxn for MemoryTxn {
    fn items(&self, queue: Queue) -> Result<Vec<String>> {
        Ok(self
            .queues
            .get(&queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn push_back(&mut self, queue: Queue, item: &str) -> Result<()> {
        self.queues.entry(queue).or_default().push_back(item.to_string());
        Ok(())
    }

    fn pop_front(&mut self, queue: Queue) -> Result<Option<String>> {
        Ok(self.queues.get_mut(&queue).and_then(|q| q.pop_front()))
    }

    fn remove(&mut self, queue: Queue, item: &str) -> Result<usize> {
        let Some(q) = self.queues.get_mut(&queue) else {
            return Ok(0);
        };
        let before = q.len();
        q.retain(|i| i != item);
        Ok(before - q.len())
    }
}

impl QueueStore for MemoryQueues {
    fn transact<R>(&self, body: impl FnOnce(&mut dyn QueueTxn) -> Result<R>) -> Result<R> {
        let mut guard = self
            .queues
            .lock()
            .map_err(|_| Error::Storage("queue lock poisoned".into()))?;
        let mut txn = MemoryTxn {
            queues: guard.clone(),
        };
        let out = body(&mut txn)?;
        *guard = txn.queues;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn failed_transaction_leaves_queues_unchanged() {
        let queues = MemoryQueues::new();
        queues.transact(|txn| txn.push_back(Queue::Node, "beefea68e6")).unwrap();

        let res: Result<()> = queues.transact(|txn| {
            txn.drain_into(Queue::Node, Queue::Staging)?;
            Err(Error::Aborted("boom".into()))
        });
        assert!(res.is_err());
        assert_eq!(queues.snapshot(Queue::Node).unwrap(), vec!["beefea68e6"]);
        assert!(queues.snapshot(Queue::Staging).unwrap().is_empty());
    }

    #[test]
    fn drain_skips_existing_entries() {
        let queues = MemoryQueues::new();
        queues
            .transact(|txn| {
                txn.push_back(Queue::Node, "a")?;
                txn.push_back(Queue::Node, "b")?;
                txn.push_back(Queue::Node, "a")?;
                txn.push_back(Queue::Staging, "b")
            })
            .unwrap();

        let moved = queues.transact(|txn| txn.drain_into(Queue::Node, Queue::Staging)).unwrap();
        assert_eq!(moved, vec!["a", "b", "a"]);
        assert!(queues.snapshot(Queue::Node).unwrap().is_empty());
        assert_eq!(queues.snapshot(Queue::Staging).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn remove_where_collects_distinct() {
        let queues = MemoryQueues::new();
        let removed = queues
            .transact(|txn| {
                txn.push_back(Queue::Cfg, "x-1")?;
                txn.push_back(Queue::Cfg, "y-1")?;
                txn.push_back(Queue::Cfg, "x-1")?;
                txn.remove_where(Queue::Cfg, &|i: &str| i.starts_with("x"))
            })
            .unwrap();
        assert_eq!(removed, vec!["x-1"]);
        assert_eq!(queues.snapshot(Queue::Cfg).unwrap(), vec!["y-1"]);
    }

    proptest! {
        #[test]
        fn add_one_only_is_idempotent(ids in proptest::collection::vec("[0-9a-f]{10}", 1..20)) {
            let queues = MemoryQueues::new();
            for id in ids.iter().chain(ids.iter()) {
                queues.transact(|txn| txn.add_one_only(Queue::Off, id)).unwrap();
            }
            let snapshot = queues.snapshot(Queue::Off).unwrap();
            for id in &ids {
                prop_assert_eq!(snapshot.iter().filter(|i| *i == id).count(), 1);
            }
        }
    }
}
