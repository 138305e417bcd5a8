//! Configuration publication.
//!
//! After a node is bootstrapped the reconciliation pass publishes its
//! [`ConfigReply`] to the responder's configuration listener, which queues
//! it in `cfg_q` for the node's next `node_cfg` request.

use crate::error::{Error, Result};
use async_trait::async_trait;
use meshgate_protocol::{cfg_matches, ConfigReply, NetworkId, NodeId};
use meshgate_store::{Queue, QueueStore, SnapshotStore};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Where published configuration goes.
#[async_trait]
pub trait CfgPublisher: Send + Sync {
    async fn publish(&self, reply: &ConfigReply) -> Result<()>;
}

/// Build the reply for `node` from its identity snapshot and publish it.
pub async fn publish_cfg_msg<T, P>(id_trie: &T, node: &NodeId, publisher: &P) -> Result<ConfigReply>
where
    T: SnapshotStore + ?Sized,
    P: CfgPublisher + ?Sized,
{
    let snapshot = id_trie
        .get(node.as_str())?
        .ok_or_else(|| Error::MissingIdentity(node.to_string()))?;
    let networks: Vec<NetworkId> = serde_json::from_value(
        snapshot
            .get("networks")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new())),
    )?;
    let reply = ConfigReply::new(node.clone(), networks)?;
    publisher.publish(&reply).await?;
    Ok(reply)
}

/// Store a published reply: it replaces older payloads for the same node
/// and marks the node as published.
pub fn accept_cfg_msg<Q: QueueStore>(queues: &Q, reply: &ConfigReply) -> Result<()> {
    let payload = reply.to_json()?;
    let node = reply.node_id.as_str();
    queues.transact(|txn| {
        txn.remove_where(Queue::Cfg, &|item: &str| cfg_matches(item, node))?;
        txn.push_back(Queue::Cfg, &payload)?;
        txn.add_one_only(Queue::Pub, node)?;
        Ok(())
    })?;
    tracing::debug!("Queued cfg msg for {}", node);
    Ok(())
}

/// Fire-and-forget publisher: one JSON line per reply over TCP.
///
/// Delivery failures are logged and swallowed; a missing listener must not
/// abort the reconciliation pass.
pub struct TcpPublisher {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpPublisher {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Duration::from_secs(2),
        }
    }

    async fn send(&self, line: &str) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(line.as_bytes()).await?;
        stream.shutdown().await
    }
}

#[async_trait]
impl CfgPublisher for TcpPublisher {
    async fn publish(&self, reply: &ConfigReply) -> Result<()> {
        let line = reply.to_json()? + "\n";
        match tokio::time::timeout(self.timeout, self.send(&line)).await {
            Ok(Ok(())) => tracing::info!("Published cfg for {} to {}", reply.node_id, self.addr),
            Ok(Err(e)) => tracing::warn!("Cfg publish to {} failed: {}", self.addr, e),
            Err(_) => tracing::warn!("Cfg publish to {} timed out", self.addr),
        }
        Ok(())
    }
}

/// Publisher that writes straight into a queue set, skipping the listener.
pub struct QueuePublisher<Q> {
    queues: Q,
}

impl<Q: QueueStore> QueuePublisher<Q> {
    pub fn new(queues: Q) -> Self {
        Self { queues }
    }
}

#[async_trait]
impl<Q: QueueStore> CfgPublisher for QueuePublisher<Q> {
    async fn publish(&self, reply: &ConfigReply) -> Result<()> {
        accept_cfg_msg(&self.queues, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_store::{MemoryQueues, MemoryTrie};
    use serde_json::json;

    fn node() -> NodeId {
        NodeId::parse("beefea68e6").unwrap()
    }

    #[tokio::test]
    async fn publishes_from_identity_snapshot() {
        let trie = MemoryTrie::new();
        trie.set(
            "beefea68e6",
            &json!({"networks": ["b6079f73c63cea29"], "exit_node": false}),
        )
        .unwrap();
        let queues = MemoryQueues::new();
        let publisher = QueuePublisher::new(&queues);

        let reply = publish_cfg_msg(&trie, &node(), &publisher).await.unwrap();
        assert_eq!(reply.networks[0].as_str(), "b6079f73c63cea29");
        assert_eq!(queues.snapshot(Queue::Cfg).unwrap(), vec![reply.to_json().unwrap()]);
        assert_eq!(queues.snapshot(Queue::Pub).unwrap(), vec!["beefea68e6"]);
    }

    #[tokio::test]
    async fn missing_snapshot_is_an_error() {
        let trie = MemoryTrie::new();
        let queues = MemoryQueues::new();
        let publisher = QueuePublisher::new(&queues);
        let err = publish_cfg_msg(&trie, &node(), &publisher).await.unwrap_err();
        assert!(matches!(err, Error::MissingIdentity(ref id) if id == "beefea68e6"));
        assert!(queues.snapshot(Queue::Cfg).unwrap().is_empty());
    }

    #[test]
    fn newer_cfg_replaces_older() {
        let queues = MemoryQueues::new();
        let first = ConfigReply::new(node(), vec![NetworkId::parse("b6079f73c63cea29").unwrap()]).unwrap();
        let second = ConfigReply::new(node(), vec![NetworkId::parse("b6079f73c6000002").unwrap()]).unwrap();
        accept_cfg_msg(&queues, &first).unwrap();
        accept_cfg_msg(&queues, &second).unwrap();

        assert_eq!(queues.snapshot(Queue::Cfg).unwrap(), vec![second.to_json().unwrap()]);
        assert_eq!(queues.snapshot(Queue::Pub).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tcp_publish_without_listener_is_swallowed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reply = ConfigReply::new(node(), vec![NetworkId::parse("b6079f73c63cea29").unwrap()]).unwrap();
        assert!(TcpPublisher::new(addr).publish(&reply).await.is_ok());
    }
}
