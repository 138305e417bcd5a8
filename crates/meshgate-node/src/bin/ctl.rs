//! meshgate-ctl
//!
//! Sends one request to a running responder.
//!
//! Usage:
//!   meshgate-ctl announce <node_id> [version]
//!   meshgate-ctl cfg <node_id>
//!   meshgate-ctl offline <node_id>
//!   meshgate-ctl wedged <node_id>

use meshgate_node::config::DEFAULT_RPC_ADDR;
use meshgate_node::{Method, Request};
use meshgate_protocol::{build_announce, AnnounceMessage};
use serde_json::Value;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::TcpStream;
use std::time::Duration;

fn print_usage() {
    eprintln!("meshgate-ctl - Talk to a meshgate responder");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  meshgate-ctl announce <node_id> [version]  Announce a node");
    eprintln!("  meshgate-ctl cfg <node_id>                 Fetch a node's config");
    eprintln!("  meshgate-ctl offline <node_id>             Mark a node offline");
    eprintln!("  meshgate-ctl wedged <node_id>              Mark a node wedged");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  MESHGATE_RPC_ADDR  Responder address (default: {})", DEFAULT_RPC_ADDR);
    eprintln!("  MESHGATE_TIMEOUT_MS  Reply timeout (default: 7000)");
}

fn get_addr() -> String {
    std::env::var("MESHGATE_RPC_ADDR").unwrap_or_else(|_| DEFAULT_RPC_ADDR.to_string())
}

fn get_timeout() -> Duration {
    let ms = std::env::var("MESHGATE_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(7000);
    Duration::from_millis(ms)
}

fn send_request(req: &Request) -> Result<Option<Value>, String> {
    let addr = get_addr();
    let mut stream = TcpStream::connect(&addr).map_err(|e| {
        format!(
            "Failed to connect to responder at {}: {}\n\
             Is meshgate-responder running?",
            addr, e
        )
    })?;
    stream
        .set_read_timeout(Some(get_timeout()))
        .map_err(|e| e.to_string())?;

    let req_json = serde_json::to_string(req).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", req_json).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&stream);
    let mut reply_line = String::new();
    match reader.read_line(&mut reply_line) {
        Ok(0) => Ok(None),
        Ok(_) => serde_json::from_str(reply_line.trim())
            .map(Some)
            .map_err(|e| format!("Invalid reply: {}", e)),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

fn require_id(args: &[String], cmd: &str) -> String {
    match args.get(2) {
        Some(id) => id.clone(),
        None => {
            eprintln!("Error: {} requires a node_id argument", cmd);
            std::process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let req = match args[1].as_str() {
        "announce" => {
            let id = require_id(&args, "announce");
            let msg = match args.get(3) {
                Some(version) => AnnounceMessage::Versioned {
                    id,
                    version: version.clone(),
                },
                None => AnnounceMessage::Legacy(id),
            };
            match build_announce(&msg) {
                Ok(text) => Request::new(Method::Echo, Value::String(text)),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        "cfg" => Request::new(Method::NodeCfg, Value::String(require_id(&args, "cfg"))),
        "offline" => Request::new(Method::Offline, Value::String(require_id(&args, "offline"))),
        "wedged" => Request::new(Method::Wedged, Value::String(require_id(&args, "wedged"))),
        "help" | "--help" | "-h" => {
            print_usage();
            return;
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_request(&req) {
        Ok(Some(reply)) => println!("{}", reply),
        Ok(None) => {
            println!("no reply");
            std::process::exit(3);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
