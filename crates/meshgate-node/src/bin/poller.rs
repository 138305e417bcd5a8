//! meshgate-poller
//!
//! Runs one reconciliation pass and exits. Schedule it externally (cron or
//! a systemd timer). Exits non-zero when the pass aborts.

use meshgate_node::config::DEFAULT_LOG_FILTER;
use meshgate_node::{run_reconciliation, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env()?;
    let report = run_reconciliation(&config).await?;
    if !report.bootstrapped.is_empty() {
        tracing::info!("Bootstrapped: {:?}", report.bootstrapped);
    }

    Ok(())
}
