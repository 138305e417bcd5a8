//! Node and network identifiers.
//!
//! Node IDs are 40-bit overlay addresses written as 10 hex digits. Network
//! IDs are the 10-digit address of the owning controller followed by a
//! 6-digit suffix. Either case is accepted; values are kept lowercase.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a node address in hex digits.
pub const NODE_ID_LEN: usize = 10;

/// Length of a network ID in hex digits.
pub const NETWORK_ID_LEN: usize = 16;

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && hex::decode(s).is_ok()
}

/// Check the shape of a node ID without allocating.
pub fn valid_node_id(s: &str) -> bool {
    is_hex_of_len(s, NODE_ID_LEN)
}

/// A validated node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Validate and wrap a node ID.
    pub fn parse(s: &str) -> Result<Self> {
        if valid_node_id(s) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(Error::InvalidNodeId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        if valid_node_id(&s) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(Error::InvalidNodeId(s))
        }
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated controller network identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(String);

impl NetworkId {
    pub fn parse(s: &str) -> Result<Self> {
        if is_hex_of_len(s, NETWORK_ID_LEN) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(Error::InvalidNetworkId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The node address of the controller that owns this network.
    pub fn controller(&self) -> &str {
        &self.0[..NODE_ID_LEN]
    }

    /// Compound cache key for one member of this network.
    pub fn member_key(&self, node: &str) -> String {
        format!("{}{}", self.0, node)
    }
}

impl FromStr for NetworkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NetworkId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        if is_hex_of_len(&s, NETWORK_ID_LEN) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(Error::InvalidNetworkId(s))
        }
    }
}

impl From<NetworkId> for String {
    fn from(id: NetworkId) -> Self {
        id.0
    }
}

impl AsRef<str> for NetworkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
