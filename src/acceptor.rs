//! Phase-1 PROMISE / Phase-2 ACCEPT state machine. One [`Acceptor`]
//! instance per process, guarded by a single mutex per §5: the
//! critical section is the promise/accept decision only, never the
//! learner fan-out that follows it.

use crate::config::ProtocolConfig;
use crate::membership::MembershipClient;
use crate::message::{
    AcceptRequest, AcceptResponse, AcceptStatus, LearnNotification, PrepareRequest,
    PrepareResponse, PrepareStatus,
};
use crate::retry::with_backoff;
use crate::types::{ProposalNumber, Value};
use log::{info, warn};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// A cached response is kept exactly as it was first produced; a cache
/// hit must replay it byte-for-byte rather than recompute it from
/// current state (see the response-cache design note).
#[derive(Clone)]
enum CachedResponse {
    Prepare(PrepareResponse),
    Accept(AcceptResponse),
}

struct CacheEntry {
    response: CachedResponse,
    inserted_at: SystemTime,
}

#[derive(Default, Clone, Debug)]
struct Metrics {
    promises_made: u64,
    promises_rejected: u64,
    values_accepted: u64,
    accepts_rejected: u64,
    learner_notifications: u64,
    heartbeats_received: u64,
}

#[derive(Clone, Debug)]
struct HistoryEntry {
    description: String,
}

struct AcceptorInner {
    max_promised: ProposalNumber,
    max_accepted: ProposalNumber,
    accepted_value: Option<Value>,
    current_leader: Option<u64>,
    last_heartbeat_received: Option<SystemTime>,
    history: VecDeque<HistoryEntry>,
    response_cache: HashMap<String, CacheEntry>,
    pending_notifications: Vec<LearnNotification>,
    metrics: Metrics,
}

impl AcceptorInner {
    fn new(proposer_id_floor: u64) -> Self {
        AcceptorInner {
            max_promised: ProposalNumber::zero(proposer_id_floor),
            max_accepted: ProposalNumber::zero(proposer_id_floor),
            accepted_value: None,
            current_leader: None,
            last_heartbeat_received: None,
            history: VecDeque::new(),
            response_cache: HashMap::new(),
            pending_notifications: Vec::new(),
            metrics: Metrics::default(),
        }
    }

    fn record_history(&mut self, max_history_size: usize, description: String) {
        self.history.push_back(HistoryEntry { description });
        while self.history.len() > max_history_size {
            self.history.pop_front();
        }
    }
}

pub struct Acceptor {
    pub node_id: u64,
    config: ProtocolConfig,
    membership: MembershipClient,
    http: reqwest::Client,
    inner: Mutex<AcceptorInner>,
}

fn cache_key_prepare(proposer_id: u64, n: ProposalNumber) -> String {
    format!("prepare:{}:{}", proposer_id, n)
}

fn cache_key_accept(proposer_id: u64, n: ProposalNumber, value: &Value) -> String {
    format!("accept:{}:{}:{}", proposer_id, n, value)
}

fn new_tid(node_id: u64) -> String {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let salt: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("{}-{}-{:04}", node_id, timestamp_ms, salt)
}

impl Acceptor {
    pub fn new(node_id: u64, config: ProtocolConfig, membership: MembershipClient) -> Self {
        Acceptor {
            node_id,
            config,
            membership,
            http: reqwest::Client::new(),
            inner: Mutex::new(AcceptorInner::new(node_id)),
        }
    }

    /// `PREPARE(proposer_id, n) -> PROMISE(max_accepted, accepted_value) | REJECT(max_promised)`.
    /// Strict `>`: a new round must beat, not merely match, the current promise.
    pub async fn handle_prepare(&self, req: PrepareRequest) -> PrepareResponse {
        let key = cache_key_prepare(req.proposer_id, req.proposal_number);
        let mut inner = self.inner.lock().await;

        if let Some(cached) = self.cache_lookup(&inner, &key) {
            if let CachedResponse::Prepare(r) = cached {
                return r;
            }
        }

        let response = if req.proposal_number > inner.max_promised {
            inner.max_promised = req.proposal_number;
            inner.metrics.promises_made += 1;
            let response = PrepareResponse {
                status: PrepareStatus::Promise,
                accepted_proposal_number: inner.accepted_value.as_ref().map(|_| inner.max_accepted),
                accepted_value: inner.accepted_value.clone(),
                message: None,
            };
            info!(
                "acceptor {} promised {} to proposer {}",
                self.node_id, req.proposal_number, req.proposer_id
            );
            response
        } else {
            inner.metrics.promises_rejected += 1;
            warn!(
                "acceptor {} rejected prepare {} from proposer {} (max_promised={})",
                self.node_id, req.proposal_number, req.proposer_id, inner.max_promised
            );
            PrepareResponse {
                status: PrepareStatus::Rejected,
                accepted_proposal_number: Some(inner.max_promised),
                accepted_value: None,
                message: Some("a higher-numbered proposal is already promised".into()),
            }
        };

        let max_history_size = self.config.max_history_size;
        inner.record_history(
            max_history_size,
            format!("prepare({}, {}) -> {:?}", req.proposer_id, req.proposal_number, response.status),
        );
        self.cache_insert(&mut inner, key, CachedResponse::Prepare(response.clone()));
        response
    }

    /// `ACCEPT(proposer_id, n, v) -> ACCEPTED | REJECT`. Non-strict `>=`:
    /// the round we just promised to must still be able to complete.
    pub async fn handle_accept(&self, req: AcceptRequest) -> AcceptResponse {
        let key = cache_key_accept(req.proposer_id, req.proposal_number, &req.value);
        let mut inner = self.inner.lock().await;

        if let Some(cached) = self.cache_lookup(&inner, &key) {
            if let CachedResponse::Accept(r) = cached {
                return r;
            }
        }

        let (response, notification) = if req.proposal_number >= inner.max_promised {
            inner.max_promised = inner.max_promised.max(req.proposal_number);
            inner.max_accepted = req.proposal_number;
            inner.accepted_value = Some(req.value.clone());
            inner.metrics.values_accepted += 1;

            let tid = new_tid(self.node_id);
            let notification = LearnNotification {
                acceptor_id: self.node_id,
                proposal_number: req.proposal_number,
                value: req.value.clone(),
                tid,
                is_leader_election: req.is_leader_election,
                client_id: req.client_id.clone(),
            };
            info!(
                "acceptor {} accepted {} = {:?} from proposer {}",
                self.node_id, req.proposal_number, req.value, req.proposer_id
            );
            (AcceptResponse { status: AcceptStatus::Accepted, message: None }, Some(notification))
        } else {
            inner.metrics.accepts_rejected += 1;
            (
                AcceptResponse {
                    status: AcceptStatus::Rejected,
                    message: Some("a higher-numbered proposal has since been promised".into()),
                },
                None,
            )
        };

        let max_history_size = self.config.max_history_size;
        inner.record_history(
            max_history_size,
            format!("accept({}, {}) -> {:?}", req.proposer_id, req.proposal_number, response.status),
        );
        self.cache_insert(&mut inner, key, CachedResponse::Accept(response.clone()));
        if let Some(n) = notification {
            inner.pending_notifications.push(n);
        }
        drop(inner);

        if self.should_drain_now().await {
            self.drain_notifications().await;
        }
        response
    }

    pub async fn handle_heartbeat(&self, leader_id: u64) {
        let mut inner = self.inner.lock().await;
        inner.current_leader = Some(leader_id);
        inner.last_heartbeat_received = Some(SystemTime::now());
        inner.metrics.heartbeats_received += 1;
    }

    fn cache_lookup(&self, inner: &AcceptorInner, key: &str) -> Option<CachedResponse> {
        inner.response_cache.get(key).and_then(|entry| {
            if entry.inserted_at.elapsed().unwrap_or_default()
                < Duration::from_secs(self.config.cache_ttl_secs)
            {
                Some(entry.response.clone())
            } else {
                None
            }
        })
    }

    fn cache_insert(&self, inner: &mut AcceptorInner, key: String, response: CachedResponse) {
        inner.response_cache.insert(key, CacheEntry { response, inserted_at: SystemTime::now() });
    }

    async fn should_drain_now(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.pending_notifications.len() >= self.config.notification_batch_size
    }

    /// Sends every pending ACCEPT notification to every known Learner.
    /// Runs outside the state lock: only the queue swap is guarded.
    pub async fn drain_notifications(&self) {
        let batch = {
            let mut inner = self.inner.lock().await;
            if inner.pending_notifications.is_empty() {
                return;
            }
            std::mem::take(&mut inner.pending_notifications)
        };

        let learners = match self.membership.discover(Some(crate::types::Role::Learner)).await {
            Ok(l) => l,
            Err(e) => {
                warn!("acceptor {} could not discover learners: {}", self.node_id, e);
                self.requeue_election_only(batch).await;
                return;
            }
        };

        if learners.is_empty() {
            self.requeue_election_only(batch).await;
            return;
        }

        for learner in learners {
            let url = format!("http://{}:{}/learn", learner.address, learner.port);
            let http = self.http.clone();
            let body = serde_json::json!({ "notifications": batch });
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
                    inner.metrics.learner_notifications += batch.len() as u64;
                }
                Err(e) => {
                    warn!(
                        "acceptor {} failed to notify learner {} after retries: {}",
                        self.node_id, learner.id, e
                    );
                    self.requeue_election_only(batch.clone()).await;
                }
            }
        }
    }

    /// On terminal failure, application-value notifications are
    /// dropped (a new ACCEPT will re-propagate the value once the
    /// learner reappears) but election notifications are requeued —
    /// losing a leader-election result has no self-healing retry path.
    async fn requeue_election_only(&self, batch: Vec<LearnNotification>) {
        let election_only: Vec<_> = batch.into_iter().filter(|n| n.is_leader_election).collect();
        if election_only.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.pending_notifications.extend(election_only);
    }

    pub async fn cleanup_cache(&self) {
        let mut inner = self.inner.lock().await;
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        inner.response_cache.retain(|_, entry| entry.inserted_at.elapsed().unwrap_or_default() < ttl);
    }

    pub async fn metrics_snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "promises_made": inner.metrics.promises_made,
            "promises_rejected": inner.metrics.promises_rejected,
            "values_accepted": inner.metrics.values_accepted,
            "accepts_rejected": inner.metrics.accepts_rejected,
            "learner_notifications": inner.metrics.learner_notifications,
            "heartbeats_received": inner.metrics.heartbeats_received,
        })
    }

    pub async fn status_snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "node_id": self.node_id,
            "max_promised": inner.max_promised,
            "max_accepted": inner.max_accepted,
            "accepted_value": inner.accepted_value,
            "current_leader": inner.current_leader,
            "pending_notifications": inner.pending_notifications.len(),
            "cache_size": inner.response_cache.len(),
        })
    }

    pub async fn view_logs(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "history": inner.history.iter().map(|h| h.description.clone()).collect::<Vec<_>>(),
        })
    }
}

pub type SharedAcceptor = Arc<Acceptor>;

/// Background task: drains whatever notifications have accumulated at
/// a fixed interval even if the batch threshold was never reached.
pub async fn run_notification_drain_loop(acceptor: SharedAcceptor) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(acceptor.config.notification_drain_interval_ms));
    loop {
        interval.tick().await;
        acceptor.drain_notifications().await;
    }
}

pub async fn run_cache_cleanup_loop(acceptor: SharedAcceptor) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(acceptor.config.cache_cleanup_interval_secs));
    loop {
        interval.tick().await;
        acceptor.cleanup_cache().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn test_acceptor(node_id: u64) -> Acceptor {
        let membership =
            MembershipClient::new("http://localhost:7000".into(), node_id, Role::Acceptor, "localhost".into(), 4000);
        Acceptor::new(node_id, ProtocolConfig::default(), membership)
    }

    #[tokio::test]
    async fn first_prepare_is_always_promised() {
        let acceptor = test_acceptor(1);
        let req = PrepareRequest { proposer_id: 1, proposal_number: ProposalNumber::new(1, 1), is_leader_election: false };
        let resp = acceptor.handle_prepare(req).await;
        assert_eq!(resp.status, PrepareStatus::Promise);
        assert!(resp.accepted_value.is_none());
    }

    #[tokio::test]
    async fn prepare_rejects_non_increasing_number() {
        let acceptor = test_acceptor(1);
        acceptor
            .handle_prepare(PrepareRequest { proposer_id: 1, proposal_number: ProposalNumber::new(5, 1), is_leader_election: false })
            .await;
        let resp = acceptor
            .handle_prepare(PrepareRequest { proposer_id: 2, proposal_number: ProposalNumber::new(5, 1), is_leader_election: false })
            .await;
        assert_eq!(resp.status, PrepareStatus::Rejected);
    }

    #[tokio::test]
    async fn accept_uses_non_strict_comparison() {
        let acceptor = test_acceptor(1);
        let n = ProposalNumber::new(10, 1);
        acceptor
            .handle_prepare(PrepareRequest { proposer_id: 1, proposal_number: n, is_leader_election: false })
            .await;
        let resp = acceptor
            .handle_accept(AcceptRequest {
                proposer_id: 1,
                proposal_number: n,
                value: "x".into(),
                is_leader_election: false,
                client_id: None,
            })
            .await;
        assert_eq!(resp.status, AcceptStatus::Accepted);
    }

    #[tokio::test]
    async fn accept_below_max_promised_is_rejected() {
        let acceptor = test_acceptor(1);
        acceptor
            .handle_prepare(PrepareRequest { proposer_id: 2, proposal_number: ProposalNumber::new(20, 2), is_leader_election: false })
            .await;
        let resp = acceptor
            .handle_accept(AcceptRequest {
                proposer_id: 1,
                proposal_number: ProposalNumber::new(10, 1),
                value: "x".into(),
                is_leader_election: false,
                client_id: None,
            })
            .await;
        assert_eq!(resp.status, AcceptStatus::Rejected);
    }

    #[tokio::test]
    async fn cached_prepare_response_replays_identically() {
        let acceptor = test_acceptor(1);
        let req = PrepareRequest { proposer_id: 1, proposal_number: ProposalNumber::new(1, 1), is_leader_election: false };
        let first = acceptor.handle_prepare(req.clone()).await;
        let second = acceptor.handle_prepare(req).await;
        assert_eq!(first.status, second.status);
        assert_eq!(first.accepted_proposal_number, second.accepted_proposal_number);
    }

    #[tokio::test]
    async fn scenario_s6_partial_promise_preserves_prior_value() {
        // Two acceptors already accepted (n=50, "old"); this acceptor's
        // view matters only insofar as its own PROMISE carries that state
        // back to the proposer so it can re-propose "old" instead of its
        // own intended value.
        let acceptor = test_acceptor(1);
        let old = ProposalNumber::new(50, 9);
        acceptor
            .handle_prepare(PrepareRequest { proposer_id: 9, proposal_number: old, is_leader_election: false })
            .await;
        acceptor
            .handle_accept(AcceptRequest {
                proposer_id: 9,
                proposal_number: old,
                value: "old".into(),
                is_leader_election: false,
                client_id: None,
            })
            .await;

        let resp = acceptor
            .handle_prepare(PrepareRequest { proposer_id: 1, proposal_number: ProposalNumber::new(150, 1), is_leader_election: false })
            .await;
        assert_eq!(resp.status, PrepareStatus::Promise);
        assert_eq!(resp.accepted_value, Some("old".to_string()));
        assert_eq!(resp.accepted_proposal_number, Some(old));
    }
}
