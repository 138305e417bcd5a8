//! meshgate wire contracts
//!
//! Pure helpers shared by the responder daemon and the reconciliation pass:
//!
//! - **Identifiers**: shape validation for node addresses and network IDs
//! - **Announce**: legacy (bare ID) and versioned announce messages
//! - **Version**: dotted-integer ordering and the minimum client baseline
//! - **Cfg**: the configuration reply served to authorized nodes

pub mod announce;
pub mod cfg;
pub mod error;
pub mod ids;
pub mod version;

pub use announce::{build_announce, parse_announce, AnnounceMessage, VersionReply};
pub use cfg::{cfg_matches, ConfigReply};
pub use error::{Error, Result};
pub use ids::{valid_node_id, NetworkId, NodeId};
pub use version::{valid_version, Version, MIN_VERSION, UPGRADE_REQUIRED};
