//! Process entry points.
//!
//! - `ResponderNode`: the long-running responder (RPC surface + cfg listener)
//! - `run_reconciliation`: one reconciliation pass against the local API

use crate::config::NodeConfig;
use crate::controller::ZeroTierClient;
use crate::daemon::PidFile;
use crate::error::Result;
use crate::poller::{PassReport, Poller};
use crate::publish::TcpPublisher;
use crate::responder::Responder;
use crate::rpc::{CfgListener, RpcServer};
use meshgate_store::{SqliteQueues, TrieDb};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for a single controller API call.
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// The responder daemon.
pub struct ResponderNode {
    queues: Arc<SqliteQueues>,
    config: NodeConfig,
}

impl ResponderNode {
    /// Open the shared queue database.
    pub fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.state_dir)?;
        let queues = Arc::new(SqliteQueues::open(config.queue_db_path())?);
        Ok(Self { queues, config })
    }

    /// Serve until SIGTERM or ctrl-c.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Responder starting");
        tracing::info!("  RPC: {}", self.config.rpc_addr);
        tracing::info!("  Cfg: {}", self.config.cfg_addr);
        tracing::info!("  State: {:?}", self.config.state_dir);

        let pid_file = PidFile::new(&self.config.pid_file);
        pid_file.write(std::process::id())?;

        let cfg_listener = CfgListener::new(Arc::clone(&self.queues));
        let cfg_addr = self.config.cfg_addr;
        tokio::spawn(async move {
            if let Err(e) = cfg_listener.run(cfg_addr).await {
                tracing::error!("Cfg listener error: {}", e);
            }
        });

        let responder = Responder::new(Arc::clone(&self.queues))
            .with_cfg_wait(self.config.cfg_wait, self.config.cfg_poll);
        let server = RpcServer::new(responder);

        let served = tokio::select! {
            res = server.run(self.config.rpc_addr) => res,
            res = shutdown_signal() => {
                tracing::info!("Shutting down");
                res
            }
        };

        pid_file.remove()?;
        served
    }
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = term.recv() => {}
        res = tokio::signal::ctrl_c() => res?,
    }
    Ok(())
}

/// Run one reconciliation pass with the durable stores and the HTTP API.
pub async fn run_reconciliation(config: &NodeConfig) -> Result<PassReport> {
    std::fs::create_dir_all(&config.state_dir)?;
    let tries = TrieDb::open(config.trie_path())?;
    let queues = SqliteQueues::open(config.queue_db_path())?;
    let controller = ZeroTierClient::new(&config.zt_api, &config.api_token()?, API_TIMEOUT)?;
    let publisher = TcpPublisher::new(config.cfg_addr);

    let poller = Poller::new(controller, queues, tries.id_trie(), tries.net_trie(), publisher)
        .with_exit_nodes(config.exit_nodes.clone());
    poller.run_pass().await
}
