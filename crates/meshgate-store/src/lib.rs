//! meshgate storage
//!
//! Shared state for the responder daemon and the reconciliation pass.
//!
//! # Architecture
//!
//! - **Queues**: the fixed set of named lifecycle queues behind
//!   [`QueueStore`]. [`SqliteQueues`] is the durable implementation shared by
//!   both processes; [`MemoryQueues`] backs tests.
//! - **Tries**: keyed JSON snapshot caches behind [`SnapshotStore`].
//!   [`TrieDb`] keeps `id_trie` and `net_trie` in RocksDB; [`MemoryTrie`]
//!   backs tests.

pub mod error;
pub mod memory;
pub mod queue;
pub mod sqlite;
pub mod trie;

pub use error::{Error, Result};
pub use memory::MemoryQueues;
pub use queue::{Queue, QueueStore, QueueTxn};
pub use sqlite::SqliteQueues;
pub use trie::{MemoryTrie, RocksTrie, SnapshotStore, TrieDb};
