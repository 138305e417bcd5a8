//! meshgate node daemons
//!
//! Onboards mesh peers onto controller-managed virtual networks.
//!
//! # Architecture
//!
//! - **Responder**: announce / node_cfg / offline / wedged over a
//!   newline-delimited JSON TCP surface (`meshgate-responder`)
//! - **Poller**: one reconciliation pass against the local controller API,
//!   run periodically by an external scheduler (`meshgate-poller`)
//! - **Publish**: configuration handoff from the poller to the responder
//! - **Daemon**: PID-file process control for the responder
//!
//! Both processes share the lifecycle queues in one SQLite database.
//!
//! # Example
//!
//! ```no_run
//! use meshgate_node::{NodeConfig, ResponderNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     ResponderNode::new(config)?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod node;
pub mod poller;
pub mod publish;
pub mod responder;
pub mod rpc;

pub use config::NodeConfig;
pub use controller::{ControllerApi, ZeroTierClient};
pub use daemon::{PidFile, PidFileSupervisor, ProcessControl};
pub use error::{Error, Result};
pub use node::{run_reconciliation, ResponderNode};
pub use poller::{PassReport, Poller};
pub use publish::{accept_cfg_msg, publish_cfg_msg, CfgPublisher, QueuePublisher, TcpPublisher};
pub use responder::{Method, Outcome, Responder};
pub use rpc::{call, CfgListener, Request, RpcServer};
