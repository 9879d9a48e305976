//! Runs Paxos rounds for client values, runs leader election, and —
//! while Leader — emits heartbeats and serializes the client proposal
//! queue. This is where most of the protocol's state-machine weight
//! lives.

use crate::config::ProtocolConfig;
use crate::membership::MembershipClient;
use crate::message::{
    AcceptRequest, AcceptStatus, PrepareRequest, PrepareStatus, ProposeStatus,
};
use crate::retry::{election_backoff, with_backoff};
use crate::types::{leader_value, ProposalNumber, Value};
use log::{info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// `n = proposal_counter * ROUND_MULTIPLIER + proposer_id`; the
/// multiplier must dominate the largest proposer id so ids never spill
/// into the counter's ordering.
const ROUND_MULTIPLIER: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposerRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Default, Clone, Debug)]
struct Metrics {
    elections_started: u64,
    elections_won: u64,
    elections_lost: u64,
    heartbeats_sent: u64,
    proposals_completed: u64,
}

struct PendingProposal {
    value: Value,
    client_id: Option<String>,
}

struct ProposerInner {
    role: ProposerRole,
    current_leader: Option<u64>,
    proposal_counter: u64,
    pending_queue: VecDeque<PendingProposal>,
    round_in_flight: bool,
    last_heartbeat_received: Option<SystemTime>,
    election_count: u32,
    bootstrap_completed: bool,
    metrics: Metrics,
    history: VecDeque<String>,
}

impl ProposerInner {
    fn new() -> Self {
        ProposerInner {
            role: ProposerRole::Follower,
            current_leader: None,
            proposal_counter: 0,
            pending_queue: VecDeque::new(),
            round_in_flight: false,
            last_heartbeat_received: None,
            election_count: 0,
            bootstrap_completed: false,
            metrics: Metrics::default(),
            history: VecDeque::new(),
        }
    }

    fn record_history(&mut self, max_history_size: usize, description: String) {
        self.history.push_back(description);
        while self.history.len() > max_history_size {
            self.history.pop_front();
        }
    }
}

pub struct Proposer {
    pub node_id: u64,
    config: ProtocolConfig,
    membership: MembershipClient,
    http: reqwest::Client,
    inner: Mutex<ProposerInner>,
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

impl Proposer {
    pub fn new(node_id: u64, config: ProtocolConfig, membership: MembershipClient) -> Self {
        Proposer {
            node_id,
            config,
            membership,
            http: reqwest::Client::new(),
            inner: Mutex::new(ProposerInner::new()),
        }
    }

    /// Entry point for `POST /propose`. Mirrors the three-way contract:
    /// enqueue-if-leader, forward-if-follower-with-known-leader, or
    /// redirect.
    pub async fn handle_propose(
        &self,
        value: Value,
        client_id: Option<String>,
    ) -> crate::error::Result<(ProposeStatus, Option<usize>)> {
        if value.is_empty() || crate::types::leader_id_from_value(&value).is_some() {
            return Err(crate::error::Error::Malformed(
                "value must be non-empty and may not use the reserved leader: prefix".to_string(),
            ));
        }
        let mut inner = self.inner.lock().await;
        match inner.role {
            ProposerRole::Leader => {
                inner.pending_queue.push_back(PendingProposal { value, client_id });
                let position = inner.pending_queue.len();
                Ok((ProposeStatus::Queued, Some(position)))
            }
            _ => Err(crate::error::Error::NotLeader { current_leader: inner.current_leader }),
        }
    }

    /// Background driver: pops one pending proposal at a time and runs
    /// a full Paxos round for it. At most one round is ever in flight.
    pub async fn run_proposal_processor_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        loop {
            interval.tick().await;
            let next = {
                let mut inner = self.inner.lock().await;
                if inner.role != ProposerRole::Leader || inner.round_in_flight {
                    None
                } else {
                    inner.pending_queue.pop_front().map(|p| {
                        inner.round_in_flight = true;
                        p
                    })
                }
            };

            if let Some(proposal) = next {
                let n = {
                    let mut inner = self.inner.lock().await;
                    inner.proposal_counter += 1;
                    ProposalNumber::new(inner.proposal_counter * ROUND_MULTIPLIER, self.node_id)
                };
                self.run_round(n, proposal.value, proposal.client_id, false).await;
                let mut inner = self.inner.lock().await;
                inner.round_in_flight = false;
                inner.metrics.proposals_completed += 1;
            }
        }
    }

    /// Runs one full Paxos round: PREPARE to all acceptors, then — per
    /// Paxos safety — ACCEPT either the caller's value or whichever
    /// value a majority already carries from a higher `max_accepted`.
    /// Shared by ordinary client rounds (`n = counter * ROUND_MULTIPLIER
    /// + proposer_id`) and election rounds (`n = unix_millis(now) +
    /// proposer_id`) — only the number's construction differs.
    async fn run_round(&self, n: ProposalNumber, value: Value, client_id: Option<String>, is_election: bool) -> bool {
        let acceptors = match self.membership.discover(Some(crate::types::Role::Acceptor)).await {
            Ok(a) if !a.is_empty() => a,
            _ => {
                warn!("proposer {} found no acceptors for round {}", self.node_id, n);
                if is_election {
                    self.inner.lock().await.role = ProposerRole::Follower;
                }
                return false;
            }
        };

        let quorum_size = acceptors.len() / 2 + 1;
        let max_retries = self.config.max_retries;
        let base = Duration::from_millis(self.config.retry_base_timeout_ms);

        // Fan out PREPARE to every acceptor concurrently — a single slow
        // or partitioned acceptor must not serialize the whole round.
        let prepare_handles: Vec<_> = acceptors
            .iter()
            .map(|acceptor| {
                let url = format!("http://{}:{}/prepare", acceptor.address, acceptor.port);
                let req = PrepareRequest { proposer_id: self.node_id, proposal_number: n, is_leader_election: is_election };
                let http = self.http.clone();
                tokio::spawn(async move {
                    with_backoff(max_retries, base, |timeout| {
                        let http = http.clone();
                        let url = url.clone();
                        let req = req.clone();
                        async move {
                            http.post(&url).json(&req).timeout(timeout).send().await?.json::<crate::message::PrepareResponse>().await
                        }
                    })
                    .await
                })
            })
            .collect();

        let mut promises = Vec::new();
        for handle in prepare_handles {
            if let Ok(Ok(resp)) = handle.await {
                if resp.status == PrepareStatus::Promise {
                    promises.push(resp);
                } else if let Some(higher) = resp.accepted_proposal_number {
                    if higher > n {
                        let mut inner = self.inner.lock().await;
                        inner.proposal_counter = inner.proposal_counter.max(higher.counter / ROUND_MULTIPLIER + 1);
                    }
                }
            }
        }

        if promises.len() < quorum_size {
            info!("proposer {} round {} did not reach prepare quorum", self.node_id, n);
            if is_election {
                self.inner.lock().await.role = ProposerRole::Follower;
            }
            return false;
        }

        // Paxos safety: if any promise carries a previously accepted
        // value, we must re-propose the one with the highest accepted
        // proposal number instead of our own intended value.
        let override_value = promises
            .iter()
            .filter_map(|p| p.accepted_proposal_number.zip(p.accepted_value.clone()))
            .max_by_key(|(num, _)| *num)
            .map(|(_, v)| v);

        let final_value = override_value.unwrap_or(value);

        // Same concurrency shape for ACCEPT: one spawned send per acceptor.
        let accept_handles: Vec<_> = acceptors
            .iter()
            .map(|acceptor| {
                let url = format!("http://{}:{}/accept", acceptor.address, acceptor.port);
                let req = AcceptRequest {
                    proposer_id: self.node_id,
                    proposal_number: n,
                    value: final_value.clone(),
                    is_leader_election: is_election,
                    client_id: client_id.clone(),
                };
                let http = self.http.clone();
                tokio::spawn(async move {
                    with_backoff(max_retries, base, |timeout| {
                        let http = http.clone();
                        let url = url.clone();
                        let req = req.clone();
                        async move {
                            http.post(&url).json(&req).timeout(timeout).send().await?.json::<crate::message::AcceptResponse>().await
                        }
                    })
                    .await
                })
            })
            .collect();

        let mut accepted = 0usize;
        for handle in accept_handles {
            if let Ok(Ok(resp)) = handle.await {
                if resp.status == AcceptStatus::Accepted {
                    accepted += 1;
                }
            }
        }

        let won = accepted >= quorum_size;
        let max_history_size = self.config.max_history_size;
        let mut inner = self.inner.lock().await;
        if is_election {
            if won {
                inner.role = ProposerRole::Leader;
                inner.current_leader = Some(self.node_id);
                inner.metrics.elections_won += 1;
                info!("proposer {} won election with round {}", self.node_id, n);
            } else {
                inner.role = ProposerRole::Follower;
                inner.metrics.elections_lost += 1;
            }
            inner.record_history(max_history_size, format!("election round {} -> {}", n, if won { "won" } else { "lost" }));
        } else {
            inner.record_history(max_history_size, format!("round {} -> {}", n, if won { "accepted" } else { "abandoned" }));
        }
        won
    }

    /// Becomes Candidate and runs a `leader:<self>` round. On success,
    /// becomes Leader, publishes itself via the membership client, and
    /// fires an immediate first heartbeat.
    pub async fn start_election(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            inner.role = ProposerRole::Candidate;
            inner.election_count += 1;
            inner.metrics.elections_started += 1;
        }

        let n_counter = now_millis();
        let n = ProposalNumber::new(n_counter, self.node_id);
        info!("proposer {} starting election with round {}", self.node_id, n);

        let value = leader_value(self.node_id);
        let won = self.run_round(n, value, None, true).await;

        if won {
            if let Err(e) = self.membership.set_leader(Some(self.node_id)).await {
                warn!("proposer {} elected but failed to publish leadership: {}", self.node_id, e);
            }
            self.send_heartbeat_to_all(true).await;
        }
    }

    pub async fn send_heartbeat_to_all(&self, first_heartbeat: bool) {
        let proposers = match self.membership.discover(Some(crate::types::Role::Proposer)).await {
            Ok(p) => p,
            Err(_) => return,
        };
        let acceptors = match self.membership.discover(Some(crate::types::Role::Acceptor)).await {
            Ok(a) => a,
            Err(_) => return,
        };

        let body = serde_json::json!({
            "leader_id": self.node_id,
            "timestamp": now_millis(),
            "first_heartbeat": first_heartbeat,
        });

        for target in proposers.iter().map(|p| (p.address.clone(), p.port, "heartbeat")) {
            let _ = self.http.post(format!("http://{}:{}/{}", target.0, target.1, target.2)).json(&body).send().await;
        }
        for target in acceptors.iter().map(|a| (a.address.clone(), a.port)) {
            let _ = self.http.post(format!("http://{}:{}/heartbeat", target.0, target.1)).json(&body).send().await;
        }

        let mut inner = self.inner.lock().await;
        inner.metrics.heartbeats_sent += 1;
    }

    pub async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        loop {
            interval.tick().await;
            let is_leader = { self.inner.lock().await.role == ProposerRole::Leader };
            if is_leader {
                self.send_heartbeat_to_all(false).await;
            }
        }
    }

    /// A Proposer becomes Candidate when bootstrap completes with no
    /// visible leader, or when the current leader's heartbeat goes
    /// silent past `leader_timeout_ms`.
    pub async fn run_leader_monitor_loop(self: Arc<Self>) {
        tokio::time::sleep(self.config.bootstrap_delay(self.node_id)).await;
        {
            let mut inner = self.inner.lock().await;
            inner.bootstrap_completed = true;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;

            // Reconcile against the registry's view of leadership: a
            // self-believed Leader whose entry was overwritten or cleared
            // there must demote (self-detected ejection), and a Follower
            // with no local heartbeat yet still picks up a leader the
            // registry already knows about.
            if let Ok(registry_leader) = self.membership.get_leader().await {
                let mut inner = self.inner.lock().await;
                if inner.role == ProposerRole::Leader && registry_leader != Some(self.node_id) {
                    warn!(
                        "proposer {} ejected: registry says leader is {:?}",
                        self.node_id, registry_leader
                    );
                    inner.role = ProposerRole::Follower;
                    inner.current_leader = registry_leader;
                } else if inner.role != ProposerRole::Leader {
                    if let Some(leader_id) = registry_leader {
                        if inner.current_leader != Some(leader_id) {
                            inner.current_leader = Some(leader_id);
                        }
                    }
                }
            }

            let should_elect = {
                let inner = self.inner.lock().await;
                if inner.role == ProposerRole::Leader {
                    false
                } else if inner.current_leader.is_none() {
                    true
                } else {
                    match inner.last_heartbeat_received {
                        None => false,
                        Some(t) => {
                            t.elapsed().unwrap_or_default() > Duration::from_millis(self.config.leader_timeout_ms)
                        }
                    }
                }
            };

            if should_elect {
                let election_count = self.inner.lock().await.election_count;
                let backoff = election_backoff(
                    Duration::from_millis(self.config.election_backoff_base_ms),
                    Duration::from_millis(self.config.election_backoff_max_ms),
                    election_count,
                    self.node_id,
                );
                tokio::time::sleep(backoff).await;
                self.start_election().await;
            }
        }
    }

    /// Inbound heartbeat from the current (or a new) leader. A
    /// Proposer that believes itself Leader immediately demotes on
    /// receiving another leader's heartbeat — split-brain resolution
    /// favors whichever election actually completed.
    pub async fn handle_heartbeat(&self, leader_id: u64) {
        let mut inner = self.inner.lock().await;
        if leader_id != self.node_id {
            if inner.role == ProposerRole::Leader {
                warn!("proposer {} demoted by heartbeat from leader {}", self.node_id, leader_id);
            }
            inner.role = ProposerRole::Follower;
            inner.current_leader = Some(leader_id);
        }
        inner.last_heartbeat_received = Some(SystemTime::now());
    }

    pub async fn status_snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "node_id": self.node_id,
            "state": format!("{:?}", inner.role),
            "current_leader": inner.current_leader,
            "election_in_progress": inner.role == ProposerRole::Candidate,
            "bootstrap_completed": inner.bootstrap_completed,
            "proposal_counter": inner.proposal_counter,
            "pending_proposals": inner.pending_queue.len(),
        })
    }

    pub async fn metrics_snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "elections_started": inner.metrics.elections_started,
            "elections_won": inner.metrics.elections_won,
            "elections_lost": inner.metrics.elections_lost,
            "heartbeats_sent": inner.metrics.heartbeats_sent,
            "proposals_completed": inner.metrics.proposals_completed,
        })
    }

    pub async fn view_logs(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "history": inner.history.iter().cloned().collect::<Vec<_>>(),
        })
    }
}

pub type SharedProposer = Arc<Proposer>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn test_proposer(node_id: u64) -> Proposer {
        let membership =
            MembershipClient::new("http://localhost:7000".into(), node_id, Role::Proposer, "localhost".into(), 3000);
        Proposer::new(node_id, ProtocolConfig::default(), membership)
    }

    #[tokio::test]
    async fn follower_with_no_acceptors_cannot_propose() {
        let proposer = test_proposer(1);
        let result = proposer.handle_propose("x".into(), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn leader_enqueues_client_proposals() {
        let proposer = test_proposer(1);
        {
            let mut inner = proposer.inner.lock().await;
            inner.role = ProposerRole::Leader;
        }
        let result = proposer.handle_propose("x".into(), Some("c1".into())).await;
        assert!(result.is_ok());
        let (status, position) = result.unwrap();
        assert_eq!(status, ProposeStatus::Queued);
        assert_eq!(position, Some(1));
    }

    #[tokio::test]
    async fn heartbeat_demotes_a_self_believed_leader() {
        let proposer = test_proposer(1);
        {
            let mut inner = proposer.inner.lock().await;
            inner.role = ProposerRole::Leader;
            inner.current_leader = Some(1);
        }
        proposer.handle_heartbeat(2).await;
        let inner = proposer.inner.lock().await;
        assert_eq!(inner.role, ProposerRole::Follower);
        assert_eq!(inner.current_leader, Some(2));
    }

    #[tokio::test]
    async fn heartbeat_from_self_does_not_demote() {
        let proposer = test_proposer(1);
        {
            let mut inner = proposer.inner.lock().await;
            inner.role = ProposerRole::Leader;
            inner.current_leader = Some(1);
        }
        proposer.handle_heartbeat(1).await;
        let inner = proposer.inner.lock().await;
        assert_eq!(inner.role, ProposerRole::Leader);
    }
}
