//! Announce messages and their replies.
//!
//! Older clients announce with the bare node ID. Current clients send a
//! JSON object carrying the node ID and the client version:
//!
//! ```text
//! beefea68e6
//! {"id":"beefea68e6","version":"0.9.7"}
//! ```

use crate::error::{Error, Result};
use crate::version::UPGRADE_REQUIRED;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct VersionedAnnounce {
    id: String,
    version: String,
}

/// A parsed announce message. The node ID shape is not checked here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceMessage {
    /// Bare node ID, no version information.
    Legacy(String),
    /// Node ID plus client version.
    Versioned { id: String, version: String },
}

impl AnnounceMessage {
    pub fn node_id(&self) -> &str {
        match self {
            AnnounceMessage::Legacy(id) => id,
            AnnounceMessage::Versioned { id, .. } => id,
        }
    }

    /// Client version, absent for legacy announces.
    pub fn version(&self) -> Option<&str> {
        match self {
            AnnounceMessage::Legacy(_) => None,
            AnnounceMessage::Versioned { version, .. } => Some(version),
        }
    }
}

/// Parse either announce form.
pub fn parse_announce(raw: &str) -> Result<AnnounceMessage> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        let msg: VersionedAnnounce = serde_json::from_str(raw)
            .map_err(|e| Error::MalformedAnnounce(e.to_string()))?;
        return Ok(AnnounceMessage::Versioned {
            id: msg.id,
            version: msg.version,
        });
    }
    if raw.is_empty() || raw.contains(|c: char| c.is_whitespace() || c == '"' || c == '}') {
        return Err(Error::MalformedAnnounce(format!("{:?}", raw)));
    }
    Ok(AnnounceMessage::Legacy(raw.to_string()))
}

/// Encode an announce message in the form it was parsed from.
pub fn build_announce(msg: &AnnounceMessage) -> Result<String> {
    match msg {
        AnnounceMessage::Legacy(id) => Ok(id.clone()),
        AnnounceMessage::Versioned { id, version } => Ok(serde_json::to_string(&VersionedAnnounce {
            id: id.clone(),
            version: version.clone(),
        })?),
    }
}

/// Reply to an announce: the echoed version or [`UPGRADE_REQUIRED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub id: String,
    pub version: String,
}

impl VersionReply {
    pub fn accepted(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
        }
    }

    pub fn upgrade_required(id: &str) -> Self {
        Self {
            id: id.to_string(),
            version: UPGRADE_REQUIRED.to_string(),
        }
    }

    pub fn is_upgrade_required(&self) -> bool {
        self.version == UPGRADE_REQUIRED
    }
}
