//! Aggregates acceptor ACCEPTs per proposal and declares a value
//! chosen once a quorum of acceptors agrees, then routes the outcome
//! either to the membership client (leader elections) or to the
//! originating client (application values).

use crate::config::ProtocolConfig;
use crate::membership::MembershipClient;
use crate::message::{ClientNotification, LearnNotification};
use crate::retry::with_backoff;
use crate::types::{leader_id_from_value, ProposalNumber, Value};
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

#[derive(Default, Clone, Debug)]
struct Metrics {
    total_learned: u64,
    client_notifications: u64,
    batch_notifications_received: u64,
    single_notifications_received: u64,
    values_by_type: HashMap<&'static str, u64>,
}

struct LearnerInner {
    acceptor_proposals: HashMap<ProposalNumber, HashMap<u64, Value>>,
    chosen: HashSet<ProposalNumber>,
    log: Vec<(ProposalNumber, Value, u64)>,
    processed_tids: HashSet<String>,
    processed_tids_order: std::collections::VecDeque<String>,
    metrics: Metrics,
}

impl LearnerInner {
    fn new() -> Self {
        LearnerInner {
            acceptor_proposals: HashMap::new(),
            chosen: HashSet::new(),
            log: Vec::new(),
            processed_tids: HashSet::new(),
            processed_tids_order: std::collections::VecDeque::new(),
            metrics: Metrics::default(),
        }
    }

    fn mark_tid_processed(&mut self, tid: String, max_processed_tids: usize) -> bool {
        if self.processed_tids.contains(&tid) {
            return false;
        }
        self.processed_tids.insert(tid.clone());
        self.processed_tids_order.push_back(tid);
        if self.processed_tids_order.len() > max_processed_tids {
            // Halve rather than trim one at a time, matching the
            // soft-cap trimming the prototype uses under sustained load.
            let to_drop = self.processed_tids_order.len() / 2;
            for _ in 0..to_drop {
                if let Some(old) = self.processed_tids_order.pop_front() {
                    self.processed_tids.remove(&old);
                }
            }
        }
        true
    }
}

pub struct Learner {
    pub node_id: u64,
    config: ProtocolConfig,
    membership: MembershipClient,
    http: reqwest::Client,
    inner: Mutex<LearnerInner>,
}

#[derive(Clone)]
struct QuorumOutcome {
    proposal_number: ProposalNumber,
    value: Value,
    client_id: Option<String>,
    learned_at: u64,
}

impl Learner {
    pub fn new(node_id: u64, config: ProtocolConfig, membership: MembershipClient) -> Self {
        Learner { node_id, config, membership, http: reqwest::Client::new(), inner: Mutex::new(LearnerInner::new()) }
    }

    pub async fn handle_learn(&self, notifications: Vec<LearnNotification>, is_batch: bool) {
        let mut outcomes = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            if is_batch {
                inner.metrics.batch_notifications_received += 1;
            } else {
                inner.metrics.single_notifications_received += 1;
            }

            let acceptor_count = self.known_acceptor_count().await;
            for notification in notifications {
                if let Some(outcome) = self.process_one(&mut inner, notification, acceptor_count) {
                    outcomes.push(outcome);
                }
            }
        }

        for outcome in outcomes {
            self.publish_outcome(outcome).await;
        }
    }

    async fn known_acceptor_count(&self) -> usize {
        match self.membership.discover(Some(crate::types::Role::Acceptor)).await {
            Ok(peers) => peers.len(),
            Err(_) => 1,
        }
    }

    fn process_one(
        &self,
        inner: &mut LearnerInner,
        notification: LearnNotification,
        acceptor_count: usize,
    ) -> Option<QuorumOutcome> {
        if !inner.mark_tid_processed(notification.tid.clone(), self.config.max_processed_tids) {
            return None;
        }

        inner
            .acceptor_proposals
            .entry(notification.proposal_number)
            .or_default()
            .insert(notification.acceptor_id, notification.value.clone());

        if inner.chosen.contains(&notification.proposal_number) {
            return None;
        }

        let quorum_size = acceptor_count / 2 + 1;
        let votes = inner.acceptor_proposals.get(&notification.proposal_number).unwrap();
        let mut counts: HashMap<&Value, usize> = HashMap::new();
        for v in votes.values() {
            *counts.entry(v).or_insert(0) += 1;
        }
        let winning = counts.iter().find(|(_, &count)| count >= quorum_size).map(|(v, _)| (*v).clone());

        let winner = winning?;
        inner.chosen.insert(notification.proposal_number);

        let learned_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;

        if leader_id_from_value(&winner).is_some() {
            *inner.metrics.values_by_type.entry("leader_election").or_insert(0) += 1;
        } else {
            inner.log.push((notification.proposal_number, winner.clone(), learned_at));
            inner.metrics.total_learned += 1;
            *inner.metrics.values_by_type.entry("application").or_insert(0) += 1;
        }

        info!(
            "learner {} chose {:?} for proposal {}",
            self.node_id, winner, notification.proposal_number
        );

        Some(QuorumOutcome {
            proposal_number: notification.proposal_number,
            value: winner,
            client_id: notification.client_id,
            learned_at,
        })
    }

    async fn publish_outcome(&self, outcome: QuorumOutcome) {
        if let Some(leader_id) = leader_id_from_value(&outcome.value) {
            if let Err(e) = self.membership.set_leader(Some(leader_id)).await {
                log::warn!("learner {} failed to publish leader {}: {}", self.node_id, leader_id, e);
            }
            return;
        }

        if let Some(client_id) = outcome.client_id.as_ref().and_then(|s| s.parse::<u64>().ok()) {
            self.notify_client(client_id, outcome.proposal_number, outcome.value, outcome.learned_at)
                .await;
        }
    }

    async fn notify_client(&self, client_id: u64, n: ProposalNumber, value: Value, learned_at: u64) {
        let clients = match self.membership.discover(Some(crate::types::Role::Client)).await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("learner {} could not discover client {}: {}", self.node_id, client_id, e);
                return;
            }
        };
        let Some(client) = clients.into_iter().find(|c| c.id == client_id) else {
            log::warn!("learner {} could not find client {} in membership", self.node_id, client_id);
            return;
        };
        let url = format!("http://{}:{}/notify", client.address, client.port);
        let body = ClientNotification { learner_id: self.node_id, proposal_number: n, value, learned_at };
        let http = self.http.clone();
        let max_retries = self.config.max_retries;
        let base = Duration::from_millis(self.config.retry_base_timeout_ms);
        let result = with_backoff(max_retries, base, |timeout| {
            let http = http.clone();
            let url = url.clone();
            let body = body.clone();
            async move { http.post(&url).json(&body).timeout(timeout).send().await }
        })
        .await;

        match result {
            Ok(_) => {
                let mut inner = self.inner.lock().await;
                inner.metrics.client_notifications += 1;
            }
            Err(e) => {
                log::warn!("learner {} could not notify client at {}: {}", self.node_id, client.address, e);
            }
        }
    }

    pub async fn get_values(&self, limit: Option<usize>) -> (Vec<Value>, usize) {
        let inner = self.inner.lock().await;
        let total = inner.log.len();
        let values: Vec<Value> = inner.log.iter().map(|(_, v, _)| v.clone()).collect();
        let returned = match limit {
            Some(n) if n < values.len() => values[values.len() - n..].to_vec(),
            _ => values,
        };
        (returned, total)
    }

    pub async fn metrics_snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "total_learned": inner.metrics.total_learned,
            "client_notifications": inner.metrics.client_notifications,
            "batch_notifications_received": inner.metrics.batch_notifications_received,
            "single_notifications_received": inner.metrics.single_notifications_received,
            "values_by_type": inner.metrics.values_by_type,
        })
    }

    pub async fn status_snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "node_id": self.node_id,
            "chosen_count": inner.chosen.len(),
            "log_length": inner.log.len(),
            "processed_tids": inner.processed_tids.len(),
        })
    }

    pub async fn view_logs(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "log": inner.log.iter().map(|(n, v, t)| serde_json::json!({
                "proposal_number": n, "value": v, "learned_at": t
            })).collect::<Vec<_>>(),
        })
    }
}

pub type SharedLearner = Arc<Learner>;

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(acceptor_id: u64, n: ProposalNumber, value: &str, tid: &str, client_id: Option<&str>) -> LearnNotification {
        LearnNotification {
            acceptor_id,
            proposal_number: n,
            value: value.to_string(),
            tid: tid.to_string(),
            is_leader_election: false,
            client_id: client_id.map(|s| s.to_string()),
        }
    }

    fn test_learner() -> Learner {
        let membership = MembershipClient::new(
            "http://localhost:7000".into(),
            1,
            crate::types::Role::Learner,
            "localhost".into(),
            5000,
        );
        Learner::new(1, ProtocolConfig::default(), membership)
    }

    #[tokio::test]
    async fn scenario_s1_quorum_of_two_out_of_three_chooses_value() {
        let learner = test_learner();
        let n = ProposalNumber::new(1, 1);
        let mut inner = learner.inner.lock().await;

        assert!(learner.process_one(&mut inner, notification(1, n, "x", "t1", Some("client-7")), 3).is_none());
        let outcome = learner.process_one(&mut inner, notification(2, n, "x", "t2", Some("client-7")), 3);
        assert!(outcome.is_some());
        let outcome = outcome.unwrap();
        assert_eq!(outcome.value, "x");
        assert_eq!(inner.log.len(), 1);
        assert_eq!(inner.log[0].1, "x");
    }

    #[tokio::test]
    async fn duplicate_tid_is_deduplicated() {
        let learner = test_learner();
        let n = ProposalNumber::new(1, 1);
        let mut inner = learner.inner.lock().await;

        learner.process_one(&mut inner, notification(1, n, "x", "dup", None), 3);
        let votes_before = inner.acceptor_proposals.get(&n).unwrap().len();
        learner.process_one(&mut inner, notification(1, n, "x", "dup", None), 3);
        let votes_after = inner.acceptor_proposals.get(&n).unwrap().len();
        assert_eq!(votes_before, votes_after);
    }

    #[tokio::test]
    async fn scenario_s2_dueling_proposals_only_the_winner_is_chosen() {
        let learner = test_learner();
        let mut inner = learner.inner.lock().await;
        let n_a = ProposalNumber::new(201, 1);
        let n_b = ProposalNumber::new(301, 2);

        // A's rejected round never reaches quorum.
        learner.process_one(&mut inner, notification(1, n_a, "a", "ta1", None), 3);
        assert!(!inner.chosen.contains(&n_a));

        // B's round reaches quorum and is chosen.
        learner.process_one(&mut inner, notification(1, n_b, "b", "tb1", None), 3);
        let outcome = learner.process_one(&mut inner, notification(2, n_b, "b", "tb2", None), 3);
        assert!(outcome.is_some());
        assert_eq!(inner.log.len(), 1);
        assert_eq!(inner.log[0].1, "b");
    }

    #[tokio::test]
    async fn election_value_is_not_appended_to_log() {
        let learner = test_learner();
        let n = ProposalNumber::new(1, 3);
        let mut inner = learner.inner.lock().await;
        learner.process_one(&mut inner, notification(1, n, "leader:3", "e1", None), 3);
        let outcome = learner.process_one(&mut inner, notification(2, n, "leader:3", "e2", None), 3);
        assert!(outcome.is_some());
        assert!(inner.log.is_empty());
    }
}
