//! The lifecycle queue set.
//!
//! Every queue is an ordered list of strings. Callers treat most queues as
//! FIFO sets of node IDs and guard inserts with [`QueueTxn::add_one_only`].
//! All reads and writes go through [`QueueStore::transact`], which runs the
//! body under an exclusive lock and commits only if the body returns `Ok`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// The fixed set of named lifecycle queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Queue {
    /// Announced nodes waiting for the next reconciliation pass.
    Node,
    /// Registered nodes.
    Reg,
    /// Registered nodes that re-announced and now wait for config.
    Wait,
    /// Nodes drained from `node_q`, not yet bootstrapped.
    Staging,
    /// Published config payloads.
    Cfg,
    /// Config payloads taken from `cfg_q` but not yet delivered.
    Hold,
    Off,
    /// Nodes whose config has been published.
    Pub,
    Wedge,
    /// Host labels keyed by node ID, for log context only.
    Tmp,
    /// Offline nodes whose cached identity must be forgotten.
    Clean,
    /// Networks created while bootstrapping nodes.
    NetObj,
}

impl Queue {
    pub const ALL: [Queue; 12] = [
        Queue::Node,
        Queue::Reg,
        Queue::Wait,
        Queue::Staging,
        Queue::Cfg,
        Queue::Hold,
        Queue::Off,
        Queue::Pub,
        Queue::Wedge,
        Queue::Tmp,
        Queue::Clean,
        Queue::NetObj,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Node => "node_q",
            Queue::Reg => "reg_q",
            Queue::Wait => "wait_q",
            Queue::Staging => "staging_q",
            Queue::Cfg => "cfg_q",
            Queue::Hold => "hold_q",
            Queue::Off => "off_q",
            Queue::Pub => "pub_q",
            Queue::Wedge => "wedge_q",
            Queue::Tmp => "tmp_q",
            Queue::Clean => "clean_q",
            Queue::NetObj => "netobj_q",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Queue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Queue::ALL
            .iter()
            .copied()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| Error::UnknownQueue(s.to_string()))
    }
}

/// Operations available inside one queue transaction.
pub trait QueueTxn {
    /// All entries of a queue, front first.
    fn items(&self, queue: Queue) -> Result<Vec<String>>;

    fn push_back(&mut self, queue: Queue, item: &str) -> Result<()>;

    fn pop_front(&mut self, queue: Queue) -> Result<Option<String>>;

    /// Remove every occurrence of `item`. Returns how many were removed.
    fn remove(&mut self, queue: Queue, item: &str) -> Result<usize>;

    fn contains(&self, queue: Queue, item: &str) -> Result<bool> {
        Ok(self.items(queue)?.iter().any(|i| i == item))
    }

    fn len(&self, queue: Queue) -> Result<usize> {
        Ok(self.items(queue)?.len())
    }

    /// Append `item` unless it is already queued. Returns true if added.
    fn add_one_only(&mut self, queue: Queue, item: &str) -> Result<bool> {
        if self.contains(queue, item)? {
            return Ok(false);
        }
        self.push_back(queue, item)?;
        Ok(true)
    }

    /// Remove every entry matching `pred`, returning the distinct entries removed.
    fn remove_where(&mut self, queue: Queue, pred: &dyn Fn(&str) -> bool) -> Result<Vec<String>> {
        let mut removed: Vec<String> = Vec::new();
        for item in self.items(queue)? {
            if pred(&item) && !removed.contains(&item) {
                self.remove(queue, &item)?;
                removed.push(item);
            }
        }
        Ok(removed)
    }

    /// Move every entry of `from` onto the back of `to`, skipping entries
    /// `to` already holds. `from` is empty afterwards.
    fn drain_into(&mut self, from: Queue, to: Queue) -> Result<Vec<String>> {
        let mut moved = Vec::new();
        while let Some(item) = self.pop_front(from)? {
            self.add_one_only(to, &item)?;
            moved.push(item);
        }
        Ok(moved)
    }
}

/// A set of lifecycle queues with atomic multi-step mutation.
pub trait QueueStore: Send + Sync {
    /// Run `body` as one transaction. Changes are committed when it returns
    /// `Ok` and discarded on `Err`; the lock is released on every path.
    fn transact<R>(&self, body: impl FnOnce(&mut dyn QueueTxn) -> Result<R>) -> Result<R>;

    /// Point-in-time copy of one queue.
    fn snapshot(&self, queue: Queue) -> Result<Vec<String>> {
        self.transact(|txn| txn.items(queue))
    }
}

impl<S: QueueStore> QueueStore for &S {
    fn transact<R>(&self, body: impl FnOnce(&mut dyn QueueTxn) -> Result<R>) -> Result<R> {
        (**self).transact(body)
    }
}

impl<S: QueueStore> QueueStore for std::sync::Arc<S> {
    fn transact<R>(&self, body: impl FnOnce(&mut dyn QueueTxn) -> Result<R>) -> Result<R> {
        (**self).transact(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_round_trip() {
        for queue in Queue::ALL {
            assert_eq!(queue.as_str().parse::<Queue>().unwrap(), queue);
        }
        assert!("bogus_q".parse::<Queue>().is_err());
    }
}
