//! TCP request/reply surface for the responder.
//!
//! Newline-delimited JSON. A request looks like
//! `{"method": "echo", "msg": {"id": "beefea68e6", "version": "0.9.7"}}`;
//! the reply is one JSON line, or nothing at all when the request is invalid
//! or there is nothing to hand out yet.

use crate::error::Result;
use crate::publish::accept_cfg_msg;
use crate::responder::{Method, Responder};
use meshgate_protocol::ConfigReply;
use meshgate_store::QueueStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// One request line.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub msg: Value,
}

impl Request {
    pub fn new(method: Method, msg: Value) -> Self {
        Self {
            method: method.as_str().to_string(),
            msg,
        }
    }

    /// Message text handed to the operation: a string as-is, anything else
    /// as its JSON encoding.
    pub fn msg_text(&self) -> String {
        match &self.msg {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Request server. Connections are accepted concurrently, but requests are
/// handled one at a time.
pub struct RpcServer<Q> {
    responder: Arc<Responder<Q>>,
    gate: Arc<Mutex<()>>,
}

impl<Q: QueueStore + 'static> RpcServer<Q> {
    pub fn new(responder: Responder<Q>) -> Self {
        Self {
            responder: Arc::new(responder),
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn responder(&self) -> &Responder<Q> {
        &self.responder
    }

    /// Bind `addr` and serve forever.
    pub async fn run(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Responder listening on {}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let responder = Arc::clone(&self.responder);
                    let gate = Arc::clone(&self.gate);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, responder, gate).await {
                            tracing::error!("Connection error from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection<Q: QueueStore + 'static>(
    stream: TcpStream,
    responder: Arc<Responder<Q>>,
    gate: Arc<Mutex<()>>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let reply = match parse_request(&line) {
            Some((method, msg)) => {
                let _turn = gate.lock().await;
                responder.handle(method, &msg).await
            }
            None => None,
        };

        if let Some(reply) = reply {
            let reply_json = serde_json::to_string(&reply)? + "\n";
            writer.write_all(reply_json.as_bytes()).await?;
        }
        line.clear();
    }

    Ok(())
}

fn parse_request(line: &str) -> Option<(Method, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Unparseable request {:?}: {}", line, e);
            return None;
        }
    };
    match request.method.parse::<Method>() {
        Ok(method) => Some((method, request.msg_text())),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}

/// Listener for configuration published by the reconciliation pass.
pub struct CfgListener<Q> {
    queues: Arc<Q>,
}

impl<Q: QueueStore + 'static> CfgListener<Q> {
    pub fn new(queues: Arc<Q>) -> Self {
        Self { queues }
    }

    pub async fn run(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Cfg listener on {}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let queues = Arc::clone(&self.queues);
                    tokio::spawn(async move {
                        if let Err(e) = receive_cfg(stream, queues).await {
                            tracing::error!("Cfg connection error from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept cfg connection: {}", e);
                }
            }
        }
    }
}

async fn receive_cfg<Q: QueueStore + 'static>(stream: TcpStream, queues: Arc<Q>) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let raw = line.trim();
        if !raw.is_empty() {
            match ConfigReply::from_json(raw) {
                Ok(reply) => {
                    let queues = Arc::clone(&queues);
                    tokio::task::spawn_blocking(move || accept_cfg_msg(queues.as_ref(), &reply))
                        .await??
                }
                Err(e) => tracing::warn!("Bad cfg msg {:?}: {}", raw, e),
            }
        }
        line.clear();
    }

    Ok(())
}

/// Send one request and wait up to `timeout` for its reply.
///
/// `Ok(None)` means the responder produced no reply in time.
pub async fn call(
    addr: SocketAddr,
    method: Method,
    msg: Value,
    timeout: Duration,
) -> Result<Option<Value>> {
    let request = serde_json::to_string(&Request::new(method, msg))? + "\n";
    match tokio::time::timeout(timeout, exchange(addr, &request)).await {
        Ok(reply) => reply,
        Err(_) => Ok(None),
    }
}

async fn exchange(addr: SocketAddr, request: &str) -> Result<Option<Value>> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_store::{MemoryQueues, Queue};
    use serde_json::json;

    #[test]
    fn msg_text_accepts_strings_and_objects() {
        let req: Request = serde_json::from_str(r#"{"method":"offline","msg":"beefea68e6"}"#).unwrap();
        assert_eq!(req.msg_text(), "beefea68e6");

        let req: Request =
            serde_json::from_str(r#"{"method":"echo","msg":{"id":"beefea68e6","version":"0.9.7"}}"#).unwrap();
        let parsed: Value = serde_json::from_str(&req.msg_text()).unwrap();
        assert_eq!(parsed, json!({"id": "beefea68e6", "version": "0.9.7"}));
    }

    #[test]
    fn rejects_unknown_methods() {
        assert!(parse_request(r#"{"method":"shutdown","msg":"x"}"#).is_none());
        assert!(parse_request("not json").is_none());
        assert!(parse_request("\n").is_none());
        assert_eq!(
            parse_request(r#"{"method":"wedged","msg":"beefea68e6"}"#),
            Some((Method::Wedged, "beefea68e6".to_string()))
        );
    }

    #[tokio::test]
    async fn serves_requests_over_tcp() {
        let queues = Arc::new(MemoryQueues::new());
        let server = RpcServer::new(
            Responder::new(Arc::clone(&queues))
                .with_cfg_wait(Duration::from_millis(20), Duration::from_millis(5)),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });

        let reply = call(addr, Method::Offline, json!("beefea68e6"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply, Some(json!("beefea68e6")));
        assert_eq!(queues.snapshot(Queue::Off).unwrap(), vec!["beefea68e6"]);

        let reply = call(addr, Method::Offline, json!("nope"), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(reply, None);
    }

    #[tokio::test]
    async fn cfg_listener_queues_payloads() {
        let queues = Arc::new(MemoryQueues::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cfg = CfgListener::new(Arc::clone(&queues));
        tokio::spawn(async move { cfg.serve(listener).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"garbage\n{\"node_id\":\"beefea68e6\",\"networks\":[\"b6079f73c63cea29\"]}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        for _ in 0..100 {
            if !queues.snapshot(Queue::Pub).unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queues.snapshot(Queue::Pub).unwrap(), vec!["beefea68e6"]);
        assert_eq!(queues.snapshot(Queue::Cfg).unwrap().len(), 1);
    }
}
