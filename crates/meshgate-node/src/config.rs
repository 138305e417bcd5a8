//! Daemon configuration from environment variables.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default responder RPC endpoint.
pub const DEFAULT_RPC_ADDR: &str = "127.0.0.1:9443";

/// Default configuration publication endpoint.
pub const DEFAULT_CFG_ADDR: &str = "127.0.0.1:9442";

/// Default local node API.
pub const DEFAULT_ZT_API: &str = "http://127.0.0.1:9993";

pub const DEFAULT_ZT_TOKEN_FILE: &str = "/var/lib/zerotier-one/authtoken.secret";

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "meshgate_node=info,meshgate_store=info,meshgate_protocol=info";

/// Configuration shared by the responder and the reconciliation pass.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Directory holding the queue database and the caches
    pub state_dir: PathBuf,

    /// Responder request/reply endpoint
    pub rpc_addr: SocketAddr,

    /// Where the poller publishes fresh configuration
    pub cfg_addr: SocketAddr,

    /// Base URL of the local node/controller HTTP API
    pub zt_api: String,

    /// API token, if given directly
    pub zt_token: Option<String>,

    /// File holding the API token otherwise
    pub zt_token_file: PathBuf,

    /// Node IDs authorized as exit nodes
    pub exit_nodes: Vec<String>,

    /// Upper bound on one `node_cfg` wait
    pub cfg_wait: Duration,

    /// Poll interval inside a `node_cfg` wait
    pub cfg_poll: Duration,

    /// Responder PID file
    pub pid_file: PathBuf,
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup (the environment, or a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let state_dir = PathBuf::from(
            lookup("MESHGATE_STATE_DIR").unwrap_or_else(|| "./meshgate-data".to_string()),
        );

        let rpc_addr = parse_addr(&lookup, "MESHGATE_RPC_ADDR", DEFAULT_RPC_ADDR)?;
        let cfg_addr = parse_addr(&lookup, "MESHGATE_CFG_ADDR", DEFAULT_CFG_ADDR)?;

        let zt_api = lookup("MESHGATE_ZT_API").unwrap_or_else(|| DEFAULT_ZT_API.to_string());
        let zt_token = lookup("MESHGATE_ZT_TOKEN").filter(|t| !t.trim().is_empty());
        let zt_token_file = PathBuf::from(
            lookup("MESHGATE_ZT_TOKEN_FILE").unwrap_or_else(|| DEFAULT_ZT_TOKEN_FILE.to_string()),
        );

        let exit_nodes = lookup("MESHGATE_EXIT_NODES")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_ascii_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cfg_wait = parse_millis(&lookup, "MESHGATE_CFG_WAIT_MS", 5000)?;
        let cfg_poll = parse_millis(&lookup, "MESHGATE_CFG_POLL_MS", 250)?;
        if cfg_poll.is_zero() {
            return Err(Error::Config("MESHGATE_CFG_POLL_MS must be positive".into()));
        }

        let pid_file = lookup("MESHGATE_PID_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("msg_responder.pid"));

        Ok(Self {
            state_dir,
            rpc_addr,
            cfg_addr,
            zt_api,
            zt_token,
            zt_token_file,
            exit_nodes,
            cfg_wait,
            cfg_poll,
            pid_file,
        })
    }

    /// SQLite file shared by both daemons.
    pub fn queue_db_path(&self) -> PathBuf {
        self.state_dir.join("queues.db")
    }

    /// RocksDB directory owned by the reconciliation pass.
    pub fn trie_path(&self) -> PathBuf {
        self.state_dir.join("trie")
    }

    /// The API token, read from the token file when not set directly.
    pub fn api_token(&self) -> Result<String> {
        if let Some(token) = &self.zt_token {
            return Ok(token.trim().to_string());
        }
        let token = std::fs::read_to_string(&self.zt_token_file).map_err(|e| {
            Error::Config(format!(
                "cannot read API token from {:?}: {}",
                self.zt_token_file, e
            ))
        })?;
        Ok(token.trim().to_string())
    }
}

fn parse_addr<F>(lookup: &F, key: &str, default: &str) -> Result<SocketAddr>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.parse()
        .map_err(|_| Error::Config(format!("Invalid {}: {:?}", key, raw)))
}

fn parse_millis<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| Error::Config(format!("Invalid {}: {:?}", key, raw))),
        None => Ok(Duration::from_millis(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<NodeConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.rpc_addr, DEFAULT_RPC_ADDR.parse().unwrap());
        assert_eq!(config.cfg_addr, DEFAULT_CFG_ADDR.parse().unwrap());
        assert_eq!(config.cfg_wait, Duration::from_secs(5));
        assert!(config.exit_nodes.is_empty());
        assert_eq!(config.pid_file, PathBuf::from("./meshgate-data/msg_responder.pid"));
        assert_eq!(config.queue_db_path(), PathBuf::from("./meshgate-data/queues.db"));
    }

    #[test]
    fn exit_node_list() {
        let config = config_from(&[("MESHGATE_EXIT_NODES", "beefea68e6, ,deadbeef00")]).unwrap();
        assert_eq!(config.exit_nodes, vec!["beefea68e6", "deadbeef00"]);

        let config = config_from(&[("MESHGATE_EXIT_NODES", "BEEFEA68E6")]).unwrap();
        assert_eq!(config.exit_nodes, vec!["beefea68e6"]);
    }

    #[test]
    fn default_log_filter_names_every_crate() {
        let targets: Vec<&str> = DEFAULT_LOG_FILTER
            .split(',')
            .filter_map(|d| d.split('=').next())
            .collect();
        for krate in ["meshgate_node", "meshgate_store", "meshgate_protocol"] {
            assert!(targets.contains(&krate), "{} missing from filter", krate);
        }
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(matches!(
            config_from(&[("MESHGATE_RPC_ADDR", "nowhere")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config_from(&[("MESHGATE_CFG_WAIT_MS", "soon")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config_from(&[("MESHGATE_CFG_POLL_MS", "0")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn token_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authtoken.secret");
        std::fs::write(&path, "s3cret\n").unwrap();
        let config = config_from(&[("MESHGATE_ZT_TOKEN_FILE", path.to_str().unwrap())]).unwrap();
        assert_eq!(config.api_token().unwrap(), "s3cret");

        let direct = config_from(&[("MESHGATE_ZT_TOKEN", "direct")]).unwrap();
        assert_eq!(direct.api_token().unwrap(), "direct");
    }
}
