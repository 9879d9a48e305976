//! Thin adapter to the external node-discovery registry. The registry
//! itself is someone else's service; this module only speaks its HTTP
//! interface (`register`, `heartbeat`, `discover`, `get-leader`,
//! `update-leader`) the way a real client would.

use crate::error::Result;
use crate::types::Role;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: u64,
    pub role: Role,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    id: u64,
    role: Role,
    address: &'a str,
    port: u16,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    nodes: Vec<PeerInfo>,
}

#[derive(Debug, Deserialize)]
struct GetLeaderResponse {
    leader: Option<u64>,
}

#[derive(Debug, Serialize)]
struct UpdateLeaderRequest {
    leader: Option<u64>,
}

/// Talks to the registry at `discovery_url` on behalf of one local
/// node. Cheap to clone: it only wraps a [`reqwest::Client`] (itself an
/// `Arc` internally) and a couple of strings.
#[derive(Clone)]
pub struct MembershipClient {
    http: reqwest::Client,
    discovery_url: String,
    self_id: u64,
    self_role: Role,
    self_address: String,
    self_port: u16,
}

impl MembershipClient {
    pub fn new(
        discovery_url: String,
        self_id: u64,
        self_role: Role,
        self_address: String,
        self_port: u16,
    ) -> Self {
        MembershipClient {
            http: reqwest::Client::new(),
            discovery_url,
            self_id,
            self_role,
            self_address,
            self_port,
        }
    }

    pub async fn register(&self) -> Result<()> {
        let url = format!("{}/register", self.discovery_url);
        self.http
            .post(url)
            .json(&RegisterRequest {
                id: self.self_id,
                role: self.self_role,
                address: &self.self_address,
                port: self.self_port,
            })
            .timeout(Duration::from_secs(2))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let url = format!("{}/heartbeat", self.discovery_url);
        self.http
            .post(url)
            .json(&HeartbeatRequest { id: self.self_id })
            .timeout(Duration::from_secs(2))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Returns every known node of the given role, excluding this node
    /// itself. Passing `None` returns the whole membership.
    pub async fn discover(&self, role: Option<Role>) -> Result<Vec<PeerInfo>> {
        let url = format!("{}/discover", self.discovery_url);
        let resp: DiscoverResponse = self
            .http
            .get(url)
            .timeout(Duration::from_secs(2))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp
            .nodes
            .into_iter()
            .filter(|n| role.map(|r| r == n.role).unwrap_or(true))
            .filter(|n| n.id != self.self_id)
            .collect())
    }

    pub async fn get_leader(&self) -> Result<Option<u64>> {
        let url = format!("{}/get-leader", self.discovery_url);
        let resp: GetLeaderResponse = self
            .http
            .get(url)
            .timeout(Duration::from_secs(2))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.leader)
    }

    pub async fn set_leader(&self, leader: Option<u64>) -> Result<()> {
        let url = format!("{}/update-leader", self.discovery_url);
        self.http
            .post(url)
            .json(&UpdateLeaderRequest { leader })
            .timeout(Duration::from_secs(2))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_filters_self_and_role() {
        // discover() needs a live registry end to end; the filtering
        // logic it shares with production is exercised directly here.
        let nodes = vec![
            PeerInfo { id: 1, role: Role::Acceptor, address: "a".into(), port: 4000 },
            PeerInfo { id: 2, role: Role::Acceptor, address: "b".into(), port: 4001 },
            PeerInfo { id: 3, role: Role::Learner, address: "c".into(), port: 5000 },
        ];
        let self_id = 1u64;
        let role = Some(Role::Acceptor);
        let filtered: Vec<_> = nodes
            .into_iter()
            .filter(|n| role.map(|r| r == n.role).unwrap_or(true))
            .filter(|n| n.id != self_id)
            .collect();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, 2);
    }
}
