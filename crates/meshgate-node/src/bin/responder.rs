//! meshgate-responder
//!
//! Usage:
//!   meshgate-responder start     Start in the background
//!   meshgate-responder stop      Stop the background daemon
//!   meshgate-responder restart   Stop, then start
//!   meshgate-responder status    Report whether it is running
//!   meshgate-responder run       Run in the foreground

use meshgate_node::config::DEFAULT_LOG_FILTER;
use meshgate_node::{Error, NodeConfig, PidFile, PidFileSupervisor, ProcessControl, ResponderNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_usage() {
    eprintln!("usage: meshgate-responder start|stop|restart|status|run");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(2);
    }

    let config = NodeConfig::from_env()?;
    let supervisor = PidFileSupervisor::current_exe(PidFile::new(&config.pid_file))?;

    match args[1].as_str() {
        "start" => match supervisor.start() {
            Ok(pid) => println!("started (pid {})", pid),
            Err(Error::AlreadyRunning(pid)) => {
                eprintln!("already running (pid {})", pid);
                std::process::exit(1);
            }
            Err(e) => return Err(e.into()),
        },
        "stop" => {
            if !supervisor.stop()? {
                println!("not running");
            }
        }
        "restart" => {
            let pid = supervisor.restart()?;
            println!("restarted (pid {})", pid);
        }
        "status" => match supervisor.status()? {
            Some(pid) => println!("running (pid {})", pid),
            None => {
                println!("not running");
                std::process::exit(3);
            }
        },
        "run" => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async move { ResponderNode::new(config)?.run().await })?;
        }
        _ => {
            print_usage();
            std::process::exit(2);
        }
    }

    Ok(())
}
