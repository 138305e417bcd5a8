//! State reconciliation pass.
//!
//! One pass refreshes the lookup caches from the controller and advances
//! announced nodes: `node_q` is drained into `staging_q`, and every staged
//! node without an identity snapshot is authorized, recorded in `id_trie`
//! and has its configuration published. The snapshot is written with
//! `"published": false` and flipped once the publisher accepts the reply;
//! a node stays staged until then, and later passes only retry the publish.
//!
//! Each queue mutation is its own transaction. A pass that fails part way
//! leaves every committed step in place and the rest queued for the next
//! run; nothing is copied, so nothing is replayed.

use crate::controller::ControllerApi;
use crate::error::{Error, Result};
use crate::publish::{publish_cfg_msg, CfgPublisher};
use meshgate_protocol::{NetworkId, NodeId};
use meshgate_store::{Queue, QueueStore, SnapshotStore};
use serde_json::{json, Value};

/// Summary of one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub controller: Option<NodeId>,
    pub networks: usize,
    pub members: usize,
    /// Entries moved from `node_q` to `staging_q`.
    pub drained: usize,
    /// Identity snapshots forgotten for offline nodes.
    pub cleaned: usize,
    pub bootstrapped: Vec<NodeId>,
    /// Staged nodes that were already onboarded.
    pub skipped: usize,
}

/// The reconciliation pass and everything it talks to.
pub struct Poller<C, Q, T, P> {
    controller: C,
    queues: Q,
    id_trie: T,
    net_trie: T,
    publisher: P,
    exit_nodes: Vec<String>,
}

impl<C, Q, T, P> Poller<C, Q, T, P>
where
    C: ControllerApi,
    Q: QueueStore,
    T: SnapshotStore,
    P: CfgPublisher,
{
    pub fn new(controller: C, queues: Q, id_trie: T, net_trie: T, publisher: P) -> Self {
        Self {
            controller,
            queues,
            id_trie,
            net_trie,
            publisher,
            exit_nodes: Vec::new(),
        }
    }

    /// Nodes that are authorized as exit nodes when bootstrapped.
    pub fn with_exit_nodes(mut self, exit_nodes: Vec<String>) -> Self {
        self.exit_nodes = exit_nodes;
        self
    }

    pub fn queues(&self) -> &Q {
        &self.queues
    }

    pub fn id_trie(&self) -> &T {
        &self.id_trie
    }

    pub fn net_trie(&self) -> &T {
        &self.net_trie
    }

    /// Run one pass. Any error aborts the pass and is returned.
    pub async fn run_pass(&self) -> Result<PassReport> {
        match self.reconcile().await {
            Ok(report) => {
                tracing::info!(
                    "Pass complete: {} networks, {} members, {} drained, {} bootstrapped",
                    report.networks,
                    report.members,
                    report.drained,
                    report.bootstrapped.len()
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Reconciliation pass aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn reconcile(&self) -> Result<PassReport> {
        let mut report = PassReport::default();

        let ctlr_id = self.refresh_node_status().await?;
        report.controller = Some(ctlr_id.clone());

        let (networks, members) = self.refresh_networks().await?;
        report.networks = networks;
        report.members = members;
        tracing::debug!("TRIE: net_trie has keys: {:?}", self.net_trie.keys()?);
        tracing::debug!("TRIE: id_trie has keys: {:?}", self.id_trie.keys()?);

        report.drained = self.drain_node_queue()?;
        report.cleaned = self.forget_offline_nodes()?;

        let (bootstrapped, skipped) = self.bootstrap_staged(&ctlr_id).await?;
        report.bootstrapped = bootstrapped;
        report.skipped = skipped;

        Ok(report)
    }

    /// Cache the local node status and return its address.
    async fn refresh_node_status(&self) -> Result<NodeId> {
        let status = self.controller.get_status().await?;
        let address = status
            .get("address")
            .and_then(|a| a.as_str())
            .ok_or_else(|| Error::Controller("status reply has no address".into()))?;
        let ctlr_id = NodeId::parse(address)?;
        if status.get("online").and_then(|o| o.as_bool()) == Some(false) {
            tracing::warn!("Local node {} reports offline", ctlr_id);
        }
        self.id_trie.set(ctlr_id.as_str(), &status)?;
        Ok(ctlr_id)
    }

    /// Refresh `net_trie` with every network and member. Returns the counts.
    async fn refresh_networks(&self) -> Result<(usize, usize)> {
        let networks = self.controller.list_networks().await?;
        tracing::debug!("{} networks found", networks.len());

        let mut member_count = 0;
        for net_id in &networks {
            let detail = self.controller.get_network(net_id).await?;
            self.net_trie.set(net_id.as_str(), &detail)?;

            let members = self.controller.list_members(net_id).await?;
            tracing::debug!("network {} has {} member(s)", net_id, members.len());
            for mbr_id in &members {
                let detail = self.controller.get_member(net_id, mbr_id).await?;
                tracing::debug!("adding member: {}", mbr_id);
                self.net_trie.set(&net_id.member_key(mbr_id.as_str()), &detail)?;
            }
            member_count += members.len();
        }

        Ok((networks.len(), member_count))
    }

    /// Move announced nodes into staging. A node coming back is no longer offline.
    fn drain_node_queue(&self) -> Result<usize> {
        let moved = self.queues.transact(|txn| {
            let moved = txn.drain_into(Queue::Node, Queue::Staging)?;
            for node in &moved {
                txn.remove(Queue::Off, node)?;
            }
            Ok(moved)
        })?;
        if !moved.is_empty() {
            tracing::debug!("{} nodes moved to staging queue: {:?}", moved.len(), moved);
        }
        Ok(moved.len())
    }

    /// Drop identity snapshots of nodes marked for cleanup by `offline`.
    fn forget_offline_nodes(&self) -> Result<usize> {
        let marked = self.queues.snapshot(Queue::Clean)?;
        for node in &marked {
            if self.id_trie.delete(node)? {
                tracing::info!("Forgot identity of offline node {}", node);
            }
            self.queues.transact(|txn| txn.remove(Queue::Clean, node))?;
        }
        Ok(marked.len())
    }

    async fn bootstrap_staged(&self, ctlr_id: &NodeId) -> Result<(Vec<NodeId>, usize)> {
        let staged = self.queues.snapshot(Queue::Staging)?;
        tracing::debug!("{} nodes in staging queue: {:?}", staged.len(), staged);

        let mut bootstrapped = Vec::new();
        let mut skipped = 0;
        for raw in &staged {
            match self.id_trie.get(raw)? {
                Some(snapshot) if is_published(&snapshot) => skipped += 1,
                snapshot => match NodeId::parse(raw) {
                    Ok(node) => {
                        if snapshot.is_none() {
                            let exit_node = self.exit_nodes.iter().any(|e| e == node.as_str());
                            self.bootstrap_member(ctlr_id, &node, exit_node).await?;
                        } else {
                            tracing::info!("Retrying cfg publish for {}", node);
                        }
                        publish_cfg_msg(&self.id_trie, &node, &self.publisher).await?;
                        self.mark_published(&node)?;
                        bootstrapped.push(node);
                    }
                    Err(e) => tracing::warn!("Dropping unusable staging entry: {}", e),
                },
            }
            self.queues.transact(|txn| txn.remove(Queue::Staging, raw))?;
        }

        Ok((bootstrapped, skipped))
    }

    /// Authorize `node` on a fresh network and record its identity.
    async fn bootstrap_member(&self, ctlr_id: &NodeId, node: &NodeId, exit_node: bool) -> Result<NetworkId> {
        let net_id = self
            .controller
            .authorize_member(ctlr_id, None, node, exit_node)
            .await?;
        self.queues
            .transact(|txn| txn.add_one_only(Queue::NetObj, net_id.as_str()))?;
        self.id_trie.set(
            node.as_str(),
            &json!({
                "networks": [net_id.as_str()],
                "exit_node": exit_node,
                "controller": ctlr_id.as_str(),
                "published": false,
            }),
        )?;
        tracing::info!("Bootstrapped node {} on network {}", node, net_id);
        Ok(net_id)
    }

    fn mark_published(&self, node: &NodeId) -> Result<()> {
        if let Some(mut snapshot) = self.id_trie.get(node.as_str())? {
            if let Some(fields) = snapshot.as_object_mut() {
                fields.insert("published".into(), json!(true));
                self.id_trie.set(node.as_str(), &snapshot)?;
            }
        }
        Ok(())
    }
}

/// Snapshots written before the marker existed count as published.
fn is_published(snapshot: &Value) -> bool {
    snapshot.get("published").and_then(Value::as_bool) != Some(false)
}
