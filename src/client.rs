//! Submits values to the current leader (following at most one
//! redirect hop) and collects learner chosen-value notifications for
//! later retrieval.
//!
//! Resubmitting a value after a client-side timeout has no dedup key
//! of its own here — see the response-cache/dedup design notes — so a
//! retried submission may end up chosen twice.

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::membership::MembershipClient;
use crate::message::{ClientNotification, NotLeaderResponse, ProposeRequest, ProposeResponse};
use crate::types::Role;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct ClientInner {
    responses: Vec<ClientNotification>,
    seen: HashSet<(u64, crate::types::ProposalNumber)>,
}

pub struct Client {
    pub node_id: u64,
    config: ProtocolConfig,
    membership: MembershipClient,
    http: reqwest::Client,
    inner: Mutex<ClientInner>,
}

impl Client {
    pub fn new(node_id: u64, config: ProtocolConfig, membership: MembershipClient) -> Self {
        Client {
            node_id,
            config,
            membership,
            http: reqwest::Client::new(),
            inner: Mutex::new(ClientInner { responses: Vec::new(), seen: HashSet::new() }),
        }
    }

    /// `POST /send`: discover proposers fresh, prefer the registry's
    /// notion of the current leader, submit, and follow at most one
    /// redirect if the target turns out not to be leader.
    pub async fn send(&self, value: String) -> Result<()> {
        let proposers = self.membership.discover(Some(Role::Proposer)).await?;
        if proposers.is_empty() {
            return Err(Error::NoQuorum("no known proposers".to_string()));
        }

        let leader_id = self.membership.get_leader().await.ok().flatten();
        let target = proposers
            .iter()
            .find(|p| Some(p.id) == leader_id)
            .or_else(|| proposers.first())
            .ok_or_else(|| Error::NoQuorum("no proposer available".to_string()))?;

        match self.try_propose(target.address.clone(), target.port, &value).await {
            Ok(_) => Ok(()),
            Err(redirect_leader) => {
                let Some(redirect_leader) = redirect_leader else {
                    return Err(Error::NoQuorum("proposer rejected and offered no redirect".to_string()));
                };
                let retry_target = proposers
                    .iter()
                    .find(|p| p.id == redirect_leader)
                    .ok_or_else(|| Error::NoQuorum("redirected leader not found in membership".to_string()))?;
                self.try_propose(retry_target.address.clone(), retry_target.port, &value)
                    .await
                    .map(|_| ())
                    .map_err(|_| Error::NoQuorum("redirect target also rejected the proposal".to_string()))
            }
        }
    }

    /// `Ok` on acceptance (queued/initiated); `Err(Some(leader))` on a
    /// 409 redirect, `Err(None)` on any other failure.
    async fn try_propose(&self, address: String, port: u16, value: &str) -> std::result::Result<ProposeResponse, Option<u64>> {
        let url = format!("http://{}:{}/propose", address, port);
        let req = ProposeRequest { value: value.to_string(), client_id: Some(self.node_id.to_string()), is_leader_election: false };
        let resp = self
            .http
            .post(&url)
            .json(&req)
            .timeout(Duration::from_millis(self.config.retry_base_timeout_ms))
            .send()
            .await
            .map_err(|_| None)?;

        if resp.status().as_u16() == 409 {
            let body: NotLeaderResponse = resp.json().await.map_err(|_| None)?;
            return Err(body.current_leader);
        }
        resp.json::<ProposeResponse>().await.map_err(|_| None)
    }

    /// `POST /notify`: inbound from a learner. Deduplicates on
    /// `(learner_id, proposal_number)` since a learner's own retry can
    /// deliver the same notification twice.
    pub async fn handle_notify(&self, notification: ClientNotification) {
        let mut inner = self.inner.lock().await;
        let key = (notification.learner_id, notification.proposal_number);
        if inner.seen.insert(key) {
            inner.responses.push(notification);
        }
    }

    pub async fn get_responses(&self) -> Vec<ClientNotification> {
        self.inner.lock().await.responses.clone()
    }

    /// `GET /read`: discovers learners fresh and forwards to one of
    /// them, matching the original's "ask a random known learner"
    /// policy.
    pub async fn read(&self) -> Result<Vec<String>> {
        let learners = self.membership.discover(Some(Role::Learner)).await?;
        let learner = learners.first().ok_or_else(|| Error::NoQuorum("no known learners".to_string()))?;
        let url = format!("http://{}:{}/get-values", learner.address, learner.port);
        let resp: crate::message::GetValuesResponse = self.http.get(&url).send().await?.json().await?;
        Ok(resp.values)
    }

    pub async fn register_with_discovery(&self) -> Result<()> {
        self.membership.register().await
    }

    pub async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.membership_heartbeat_interval_ms));
        loop {
            interval.tick().await;
            let _ = self.membership.heartbeat().await;
        }
    }

    pub async fn view_logs(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({ "response_count": inner.responses.len() })
    }
}

pub type SharedClient = Arc<Client>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProposalNumber;

    fn test_client() -> Client {
        let membership =
            MembershipClient::new("http://localhost:7000".into(), 1, Role::Client, "localhost".into(), 6000);
        Client::new(1, ProtocolConfig::default(), membership)
    }

    #[tokio::test]
    async fn notify_deduplicates_by_learner_and_proposal_number() {
        let client = test_client();
        let n = ProposalNumber::new(1, 1);
        let notif = ClientNotification { learner_id: 5, proposal_number: n, value: "x".into(), learned_at: 0 };
        client.handle_notify(notif.clone()).await;
        client.handle_notify(notif).await;
        assert_eq!(client.get_responses().await.len(), 1);
    }

    #[tokio::test]
    async fn distinct_proposal_numbers_both_recorded() {
        let client = test_client();
        let a = ClientNotification { learner_id: 5, proposal_number: ProposalNumber::new(1, 1), value: "x".into(), learned_at: 0 };
        let b = ClientNotification { learner_id: 5, proposal_number: ProposalNumber::new(2, 1), value: "y".into(), learned_at: 0 };
        client.handle_notify(a).await;
        client.handle_notify(b).await;
        assert_eq!(client.get_responses().await.len(), 2);
    }
}
