//! Configuration replies handed to nodes once they are authorized.

use crate::error::{Error, Result};
use crate::ids::{NetworkId, NodeId};
use serde::{Deserialize, Serialize};

/// Networks a node should join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReply {
    pub node_id: NodeId,
    pub networks: Vec<NetworkId>,
}

impl ConfigReply {
    /// Build a reply; at least one network is required.
    pub fn new(node_id: NodeId, networks: Vec<NetworkId>) -> Result<Self> {
        if networks.is_empty() {
            return Err(Error::MalformedCfg(format!("no networks for {}", node_id)));
        }
        Ok(Self { node_id, networks })
    }

    /// Decode and check a queued or published payload.
    pub fn from_json(raw: &str) -> Result<Self> {
        let reply: ConfigReply = serde_json::from_str(raw.trim())?;
        if reply.networks.is_empty() {
            return Err(Error::MalformedCfg(format!("no networks for {}", reply.node_id)));
        }
        Ok(reply)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Does a queued cfg payload belong to `node_id`?
///
/// Payloads that fail to decode are matched by substring so stale garbage
/// for a node can still be purged.
pub fn cfg_matches(raw: &str, node_id: &str) -> bool {
    match ConfigReply::from_json(raw) {
        Ok(reply) => reply.node_id.as_str() == node_id,
        Err(_) => raw.contains(node_id),
    }
}
