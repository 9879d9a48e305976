//! Wire types for every HTTP/JSON exchange between nodes. Field names
//! match the external interface exactly; these structs are the
//! `#[derive(Serialize, Deserialize)]` request/response bodies axum
//! extracts and returns directly.

use crate::types::{ProposalNumber, Value};
use serde::{Deserialize, Serialize};

// ---- Acceptor ----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub proposer_id: u64,
    pub proposal_number: ProposalNumber,
    #[serde(default)]
    pub is_leader_election: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub status: PrepareStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_proposal_number: Option<ProposalNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrepareStatus {
    Promise,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub proposer_id: u64,
    pub proposal_number: ProposalNumber,
    pub value: Value,
    #[serde(default)]
    pub is_leader_election: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub status: AcceptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptorHeartbeatRequest {
    pub leader_id: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgedResponse {
    pub status: &'static str,
}

impl Default for AcknowledgedResponse {
    fn default() -> Self {
        AcknowledgedResponse { status: "acknowledged" }
    }
}

// ---- Learner ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnNotification {
    pub acceptor_id: u64,
    pub proposal_number: ProposalNumber,
    pub value: Value,
    pub tid: String,
    #[serde(default)]
    pub is_leader_election: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// `/learn` accepts either a single notification or a batch; this
/// untagged enum mirrors that without requiring a discriminant field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LearnRequest {
    Batch { notifications: Vec<LearnNotification> },
    Single(LearnNotification),
}

impl LearnRequest {
    pub fn into_notifications(self) -> Vec<LearnNotification> {
        match self {
            LearnRequest::Batch { notifications } => notifications,
            LearnRequest::Single(n) => vec![n],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetValuesResponse {
    pub values: Vec<Value>,
    pub total_count: usize,
    pub returned_count: usize,
}

// ---- Proposer -------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeRequest {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub is_leader_election: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeResponse {
    pub status: ProposeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposeStatus {
    ProposalInitiated,
    Queued,
    ElectionStarted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotLeaderResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_leader: Option<u64>,
    pub retry_suggested: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposerHeartbeatRequest {
    pub leader_id: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub first_heartbeat: bool,
}

// ---- Client ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSendRequest {
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientNotification {
    pub learner_id: u64,
    pub proposal_number: ProposalNumber,
    pub value: Value,
    pub learned_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learn_request_accepts_single_object() {
        let body = serde_json::json!({
            "acceptor_id": 1,
            "proposal_number": {"counter": 1, "proposer_id": 2},
            "value": "x",
            "tid": "2-123-4567",
        });
        let parsed: LearnRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.into_notifications().len(), 1);
    }

    #[test]
    fn learn_request_accepts_batch() {
        let body = serde_json::json!({
            "notifications": [
                {"acceptor_id": 1, "proposal_number": {"counter": 1, "proposer_id": 2}, "value": "x", "tid": "a"},
                {"acceptor_id": 2, "proposal_number": {"counter": 1, "proposer_id": 2}, "value": "x", "tid": "b"},
            ]
        });
        let parsed: LearnRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.into_notifications().len(), 2);
    }
}
