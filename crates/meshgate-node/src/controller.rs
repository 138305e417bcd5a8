//! Local node / controller API.
//!
//! The reconciliation pass only needs the handful of calls in
//! [`ControllerApi`]. [`ZeroTierClient`] speaks the local service's JSON
//! HTTP API, authenticated with the `X-ZT1-Auth` token.

use crate::error::{Error, Result};
use async_trait::async_trait;
use meshgate_protocol::{NetworkId, NodeId};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// Calls the reconciliation pass makes against the controller.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Status of the local node; carries its own address.
    async fn get_status(&self) -> Result<Value>;

    async fn list_networks(&self) -> Result<Vec<NetworkId>>;

    async fn get_network(&self, network: &NetworkId) -> Result<Value>;

    async fn list_members(&self, network: &NetworkId) -> Result<Vec<NodeId>>;

    async fn get_member(&self, network: &NetworkId, member: &NodeId) -> Result<Value>;

    /// Authorize `member` on `network`, or on a fresh network owned by
    /// `controller` when `network` is `None`. Returns the network used.
    async fn authorize_member(
        &self,
        controller: &NodeId,
        network: Option<&NetworkId>,
        member: &NodeId,
        exit_node: bool,
    ) -> Result<NetworkId>;
}

#[async_trait]
impl<C: ControllerApi + ?Sized> ControllerApi for std::sync::Arc<C> {
    async fn get_status(&self) -> Result<Value> {
        (**self).get_status().await
    }

    async fn list_networks(&self) -> Result<Vec<NetworkId>> {
        (**self).list_networks().await
    }

    async fn get_network(&self, network: &NetworkId) -> Result<Value> {
        (**self).get_network(network).await
    }

    async fn list_members(&self, network: &NetworkId) -> Result<Vec<NodeId>> {
        (**self).list_members(network).await
    }

    async fn get_member(&self, network: &NetworkId, member: &NodeId) -> Result<Value> {
        (**self).get_member(network, member).await
    }

    async fn authorize_member(
        &self,
        controller: &NodeId,
        network: Option<&NetworkId>,
        member: &NodeId,
        exit_node: bool,
    ) -> Result<NetworkId> {
        (**self)
            .authorize_member(controller, network, member, exit_node)
            .await
    }
}

/// HTTP client for the local node API.
pub struct ZeroTierClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ZeroTierClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .header("X-ZT1-Auth", &self.token)
            .send()
            .await?;
        Self::check(path, resp.status())?;
        Ok(resp.json().await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(path))
            .header("X-ZT1-Auth", &self.token)
            .json(body)
            .send()
            .await?;
        Self::check(path, resp.status())?;
        Ok(resp.json().await?)
    }

    fn check(path: &str, status: StatusCode) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Controller(format!("{} returned {}", path, status)))
        }
    }

    async fn create_network(&self, controller: &NodeId, member: &NodeId) -> Result<NetworkId> {
        // Trailing underscores ask the controller to pick a free network ID.
        let path = format!("controller/network/{}______", controller);
        let body = json!({
            "name": format!("meshgate-{}", member),
            "private": true,
        });
        let created = self.post_json(&path, &body).await?;
        let id = created
            .get("id")
            .or_else(|| created.get("nwid"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Controller("network create reply has no id".into()))?;
        Ok(NetworkId::parse(id)?)
    }
}

#[async_trait]
impl ControllerApi for ZeroTierClient {
    async fn get_status(&self) -> Result<Value> {
        self.get_json("status").await
    }

    async fn list_networks(&self) -> Result<Vec<NetworkId>> {
        let listed = self.get_json("controller/network").await?;
        network_ids(&listed)
    }

    async fn get_network(&self, network: &NetworkId) -> Result<Value> {
        self.get_json(&format!("controller/network/{}", network)).await
    }

    async fn list_members(&self, network: &NetworkId) -> Result<Vec<NodeId>> {
        let listed = self
            .get_json(&format!("controller/network/{}/member", network))
            .await?;
        member_ids(&listed)
    }

    async fn get_member(&self, network: &NetworkId, member: &NodeId) -> Result<Value> {
        self.get_json(&format!("controller/network/{}/member/{}", network, member))
            .await
    }

    async fn authorize_member(
        &self,
        controller: &NodeId,
        network: Option<&NetworkId>,
        member: &NodeId,
        exit_node: bool,
    ) -> Result<NetworkId> {
        let network = match network {
            Some(id) => id.clone(),
            None => self.create_network(controller, member).await?,
        };
        let path = format!("controller/network/{}/member/{}", network, member);
        let body = json!({
            "authorized": true,
            "activeBridge": exit_node,
        });
        self.post_json(&path, &body).await?;
        tracing::info!(
            "Authorized {} on {} (exit node: {})",
            member,
            network,
            exit_node
        );
        Ok(network)
    }
}

/// Network listing is a JSON array of IDs.
fn network_ids(listed: &Value) -> Result<Vec<NetworkId>> {
    let ids = listed
        .as_array()
        .ok_or_else(|| Error::Controller("network list is not an array".into()))?;
    ids.iter()
        .map(|v| {
            let s = v
                .as_str()
                .ok_or_else(|| Error::Controller(format!("bad network id {}", v)))?;
            Ok(NetworkId::parse(s)?)
        })
        .collect()
}

/// Member listing is an object keyed by member ID (values are revisions).
fn member_ids(listed: &Value) -> Result<Vec<NodeId>> {
    let members = listed
        .as_object()
        .ok_or_else(|| Error::Controller("member list is not an object".into()))?;
    members
        .keys()
        .map(|k| Ok(NodeId::parse(k)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_network_listing() {
        let ids = network_ids(&json!(["b6079f73c63cea29", "b6079f73c6000001"])).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].controller(), "b6079f73c6");
        assert!(network_ids(&json!({"b6079f73c63cea29": 1})).is_err());
        assert!(network_ids(&json!(["short"])).is_err());
    }

    #[test]
    fn parses_member_listing() {
        let ids = member_ids(&json!({"beefea68e6": 3, "deadbeef00": 1})).unwrap();
        let ids: Vec<&str> = ids.iter().map(NodeId::as_str).collect();
        assert_eq!(ids, vec!["beefea68e6", "deadbeef00"]);
        assert!(member_ids(&json!(["beefea68e6"])).is_err());
    }

    #[test]
    fn joins_urls() {
        let client = ZeroTierClient::new("http://127.0.0.1:9993/", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/status"), "http://127.0.0.1:9993/status");
        assert_eq!(
            client.url("controller/network"),
            "http://127.0.0.1:9993/controller/network"
        );
    }
}
