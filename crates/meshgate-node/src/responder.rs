//! Node lifecycle responder.
//!
//! Four operations drive a node through the lifecycle queues:
//!
//! - `echo` (announce): registers a node whose client is recent enough
//! - `node_cfg`: hands out published configuration, waiting a bounded time
//! - `offline`: marks a node offline and schedules its identity cleanup
//! - `wedged`: advisory marker, leaves the primary track alone
//!
//! Every multi-step queue change runs in one transaction. Invalid input
//! never mutates a queue and never produces a reply.

use crate::error::Result;
use meshgate_protocol::{
    cfg_matches, parse_announce, valid_version, ConfigReply, NodeId, VersionReply, MIN_VERSION,
};
use meshgate_store::{Queue, QueueStore, QueueTxn};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of one responder operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Reply to send back.
    Success(T),
    /// Input rejected; nothing changed and nothing is sent.
    Invalid(String),
    /// Valid request, but there is nothing to hand out yet.
    NotReady,
}

impl<T> Outcome<T> {
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(reply) => Some(reply),
            _ => None,
        }
    }
}

/// Where an accepted announce left the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// First announce: queued for the poller and registered.
    Registered,
    /// Re-announce of a registered node: now waiting for its config.
    Waiting,
}

/// Remote method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Echo,
    NodeCfg,
    Offline,
    Wedged,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Echo => "echo",
            Method::NodeCfg => "node_cfg",
            Method::Offline => "offline",
            Method::Wedged => "wedged",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "echo" => Ok(Method::Echo),
            "node_cfg" => Ok(Method::NodeCfg),
            "offline" => Ok(Method::Offline),
            "wedged" => Ok(Method::Wedged),
            other => Err(format!("unknown method: {}", other)),
        }
    }
}

pub const DEFAULT_CFG_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_CFG_POLL: Duration = Duration::from_millis(250);

/// The responder state machine over a queue set.
pub struct Responder<Q> {
    queues: Q,
    cfg_wait: Duration,
    cfg_poll: Duration,
}

impl<Q: QueueStore> Responder<Q> {
    pub fn new(queues: Q) -> Self {
        Self {
            queues,
            cfg_wait: DEFAULT_CFG_WAIT,
            cfg_poll: DEFAULT_CFG_POLL,
        }
    }

    /// Bound and poll interval for `node_cfg` waits.
    pub fn with_cfg_wait(mut self, wait: Duration, poll: Duration) -> Self {
        self.cfg_wait = wait;
        self.cfg_poll = poll;
        self
    }

    pub fn queues(&self) -> &Q {
        &self.queues
    }

    /// Announce: register a node whose client meets the minimum version.
    ///
    /// A legacy announce carries no version and is answered with
    /// `UPGRADE_REQUIRED`, like any version below the baseline.
    pub fn announce(&self, raw: &str) -> Result<Outcome<VersionReply>> {
        let msg = match parse_announce(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("Could not parse version msg {:?}: {}", raw, e);
                return Ok(Outcome::Invalid(e.to_string()));
            }
        };
        let Some(node) = self.validate("announce", msg.node_id()) else {
            return Ok(Outcome::Invalid(format!("invalid node ID {:?}", msg.node_id())));
        };
        let id = node.as_str();
        tracing::debug!("Got valid announce msg: {:?}", msg);
        let host = self.lookup_host(id);
        if let Some(host) = &host {
            tracing::info!("Got valid announce msg from host {} (node {})", host, id);
        }

        match msg.version() {
            Some(version) if valid_version(MIN_VERSION, version) => {
                let stage = self.queues.transact(|txn| {
                    clean_stale_cfgs(txn, id)?;
                    handle_announce_msg(txn, id)
                })?;
                tracing::info!("Got valid node version: {} {} ({:?})", id, version, stage);
                Ok(Outcome::Success(VersionReply::accepted(id, version)))
            }
            version => {
                self.queues.transact(|txn| clean_stale_cfgs(txn, id))?;
                tracing::error!(
                    "Invalid version from host {} is: {:?} < {}",
                    host.as_deref().unwrap_or("unknown"),
                    version,
                    MIN_VERSION
                );
                Ok(Outcome::Success(VersionReply::upgrade_required(id)))
            }
        }
    }

    /// Mark a node offline. It leaves `node_q`, `pub_q` and `staging_q`, and
    /// is queued for identity cleanup by the next reconciliation pass.
    pub fn offline(&self, raw: &str) -> Result<Outcome<String>> {
        let Some(node) = self.validate("offline", raw) else {
            return Ok(Outcome::Invalid(format!("invalid node ID {:?}", raw)));
        };
        if let Some(host) = self.lookup_host(node.as_str()) {
            tracing::info!("Got valid offline msg from host {} (node {})", host, node);
        }
        let id = node.as_str();
        self.queues.transact(|txn| {
            clean_stale_cfgs(txn, id)?;
            txn.add_one_only(Queue::Off, id)?;
            txn.add_one_only(Queue::Clean, id)?;
            txn.remove(Queue::Node, id)?;
            txn.remove(Queue::Pub, id)?;
            txn.remove(Queue::Staging, id)?;
            Ok(())
        })?;
        tracing::debug!("Node ID {} cleaned from pub_q", id);
        Ok(Outcome::Success(node.into()))
    }

    /// Mark a node wedged. Advisory only.
    pub fn wedged(&self, raw: &str) -> Result<Outcome<String>> {
        let Some(node) = self.validate("wedged", raw) else {
            return Ok(Outcome::Invalid(format!("invalid node ID {:?}", raw)));
        };
        if let Some(host) = self.lookup_host(node.as_str()) {
            tracing::info!("Got valid wedged msg from host {} (node {})", host, node);
        }
        self.queues
            .transact(|txn| txn.add_one_only(Queue::Wedge, node.as_str()))?;
        Ok(Outcome::Success(node.into()))
    }

    fn validate(&self, kind: &str, raw: &str) -> Option<NodeId> {
        match NodeId::parse(raw.trim()) {
            Ok(node) => Some(node),
            Err(_) => {
                self.warn_invalid(kind, raw);
                None
            }
        }
    }

    fn warn_invalid(&self, kind: &str, raw: &str) {
        match self.lookup_host(raw) {
            Some(host) => tracing::warn!("Bad {} msg from host {} (node {:?})", kind, host, raw),
            None => tracing::warn!("Bad {} msg: {:?}", kind, raw),
        }
    }

    /// Host label for a node from `tmp_q`, whose entries look like
    /// `{"beefea68e6": "host-a"}`.
    fn lookup_host(&self, node: &str) -> Option<String> {
        let entries = match self.queues.snapshot(Queue::Tmp) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Host lookup failed: {}", e);
                return None;
            }
        };
        entries.iter().rev().find_map(|entry| {
            serde_json::from_str::<Value>(entry)
                .ok()?
                .get(node)?
                .as_str()
                .map(str::to_string)
        })
    }

    /// Validate a `node_cfg` request and log its host.
    fn cfg_request(&self, raw: &str) -> Option<NodeId> {
        let node = self.validate("cfg", raw)?;
        if let Some(host) = self.lookup_host(node.as_str()) {
            tracing::info!("Got valid cfg request msg from host {} (node {})", host, node);
        }
        Some(node)
    }

    /// Take a node's config in two steps: `cfg_q` to `hold_q`, then out of
    /// `hold_q` while the node leaves `reg_q` and `wait_q`. A payload parked
    /// in `hold_q` by an interrupted request is served first.
    fn take_cfg(&self, node: &NodeId) -> Result<Option<ConfigReply>> {
        let id = node.as_str();
        self.queues.transact(|txn| {
            let held = txn
                .items(Queue::Hold)?
                .iter()
                .any(|item| cfg_matches(item, id));
            if !held {
                let found = txn.remove_where(Queue::Cfg, &|item: &str| cfg_matches(item, id))?;
                if let Some(latest) = found.last() {
                    txn.add_one_only(Queue::Hold, latest)?;
                }
            }
            Ok(())
        })?;

        let reply = self.queues.transact(|txn| {
            let held = txn.remove_where(Queue::Hold, &|item: &str| cfg_matches(item, id))?;
            for raw in held.iter().rev() {
                match ConfigReply::from_json(raw) {
                    Ok(reply) => {
                        txn.remove(Queue::Reg, id)?;
                        txn.remove(Queue::Wait, id)?;
                        return Ok(Some(reply));
                    }
                    Err(e) => tracing::warn!("Discarding malformed cfg msg for {}: {}", id, e),
                }
            }
            Ok(None)
        })?;
        tracing::debug!("hold_q size: {}", self.queues.transact(|txn| txn.len(Queue::Hold))?);
        Ok(reply)
    }
}

// Queue transactions may wait on another process's lock, so they run on the
// blocking pool and the request gate is the only thing held meanwhile.
impl<Q: QueueStore + 'static> Responder<Q> {
    /// Run one operation and encode its reply. `None` means no reply.
    pub async fn handle(self: &Arc<Self>, method: Method, msg: &str) -> Option<Value> {
        let start = Instant::now();
        let owned = msg.to_string();
        let reply = match method {
            Method::Echo => self.blocking(move |r| encode(r.announce(&owned))).await,
            Method::NodeCfg => encode(self.node_cfg(msg).await),
            Method::Offline => self.blocking(move |r| encode(r.offline(&owned))).await,
            Method::Wedged => self.blocking(move |r| encode(r.wedged(&owned))).await,
        };
        tracing::debug!("{} took {:?} to process msg", method, start.elapsed());

        match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("{} failed for msg {:?}: {}", method, msg, e);
                None
            }
        }
    }

    /// Hand out the published configuration for a node, waiting up to the
    /// configured bound for it to appear.
    pub async fn node_cfg(self: &Arc<Self>, raw: &str) -> Result<Outcome<ConfigReply>> {
        let owned = raw.to_string();
        let Some(node) = self.blocking(move |r| Ok(r.cfg_request(&owned))).await? else {
            return Ok(Outcome::Invalid(format!("invalid node ID {:?}", raw)));
        };

        let deadline = Instant::now() + self.cfg_wait;
        loop {
            let wanted = node.clone();
            if let Some(reply) = self.blocking(move |r| r.take_cfg(&wanted)).await? {
                tracing::info!("Got cfg result: {:?}", reply);
                return Ok(Outcome::Success(reply));
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("Null result for ID: {}", node);
                return Ok(Outcome::NotReady);
            }
            tokio::time::sleep(self.cfg_poll.min(deadline - now)).await;
        }
    }

    async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&this)).await?
    }
}

fn encode<T: Serialize>(res: Result<Outcome<T>>) -> Result<Option<Value>> {
    match res?.success() {
        Some(reply) => Ok(Some(serde_json::to_value(reply)?)),
        None => Ok(None),
    }
}

/// Remove queued and held cfg payloads for a node. Returns how many distinct
/// payloads were removed.
pub fn clean_stale_cfgs(txn: &mut dyn QueueTxn, node: &str) -> meshgate_store::Result<usize> {
    let mut removed = txn.remove_where(Queue::Cfg, &|item: &str| cfg_matches(item, node))?.len();
    removed += txn.remove_where(Queue::Hold, &|item: &str| cfg_matches(item, node))?.len();
    if removed > 0 {
        tracing::debug!("Cleaned {} stale cfg msg(s) for {}", removed, node);
    }
    Ok(removed)
}

/// Registration pipeline for an accepted announce.
pub fn handle_announce_msg(txn: &mut dyn QueueTxn, node: &str) -> meshgate_store::Result<Stage> {
    if txn.contains(Queue::Reg, node)? {
        txn.add_one_only(Queue::Wait, node)?;
        Ok(Stage::Waiting)
    } else {
        txn.add_one_only(Queue::Node, node)?;
        txn.add_one_only(Queue::Reg, node)?;
        Ok(Stage::Registered)
    }
}
