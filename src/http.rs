//! Builds the axum `Router` for each role. Every router shares the
//! `/health` and `/view-logs` shape; role-specific protocol handlers
//! are layered on top, per the "shared membership+lifecycle value,
//! role-specific handler set" design rather than a type hierarchy.

use crate::acceptor::Acceptor;
use crate::client::Client;
use crate::learner::Learner;
use crate::message::{
    AcceptRequest, AcceptResponse, AcceptorHeartbeatRequest, AcknowledgedResponse, ClientNotification,
    ClientSendRequest, GetValuesResponse, LearnRequest, PrepareRequest, PrepareResponse, ProposeRequest,
    ProposeResponse, ProposerHeartbeatRequest,
};
use crate::proposer::Proposer;
use crate::types::Role;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;

async fn health(role: Role, node_id: u64) -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "role": role.to_string(), "id": node_id }))
}

// ---- Acceptor ---------------------------------------------------------

pub fn acceptor_router(acceptor: Arc<Acceptor>) -> Router {
    Router::new()
        .route("/prepare", post(prepare_handler))
        .route("/accept", post(accept_handler))
        .route("/heartbeat", post(acceptor_heartbeat_handler))
        .route("/health", get(acceptor_health_handler))
        .route("/status", get(acceptor_status_handler))
        .route("/view-logs", get(acceptor_view_logs_handler))
        .with_state(acceptor)
}

async fn prepare_handler(State(acceptor): State<Arc<Acceptor>>, Json(req): Json<PrepareRequest>) -> Json<PrepareResponse> {
    Json(acceptor.handle_prepare(req).await)
}

async fn accept_handler(State(acceptor): State<Arc<Acceptor>>, Json(req): Json<AcceptRequest>) -> Json<AcceptResponse> {
    Json(acceptor.handle_accept(req).await)
}

async fn acceptor_heartbeat_handler(
    State(acceptor): State<Arc<Acceptor>>,
    Json(req): Json<AcceptorHeartbeatRequest>,
) -> Json<AcknowledgedResponse> {
    acceptor.handle_heartbeat(req.leader_id).await;
    Json(AcknowledgedResponse::default())
}

async fn acceptor_health_handler(State(acceptor): State<Arc<Acceptor>>) -> impl IntoResponse {
    health(Role::Acceptor, acceptor.node_id).await
}

async fn acceptor_status_handler(State(acceptor): State<Arc<Acceptor>>) -> Json<serde_json::Value> {
    Json(acceptor.status_snapshot().await)
}

async fn acceptor_view_logs_handler(State(acceptor): State<Arc<Acceptor>>) -> Json<serde_json::Value> {
    Json(acceptor.view_logs().await)
}

// ---- Learner ------------------------------------------------------------

pub fn learner_router(learner: Arc<Learner>) -> Router {
    Router::new()
        .route("/learn", post(learn_handler))
        .route("/get-values", get(get_values_handler))
        .route("/health", get(learner_health_handler))
        .route("/status", get(learner_status_handler))
        .route("/view-logs", get(learner_view_logs_handler))
        .with_state(learner)
}

async fn learn_handler(State(learner): State<Arc<Learner>>, Json(req): Json<LearnRequest>) -> impl IntoResponse {
    let is_batch = matches!(req, LearnRequest::Batch { .. });
    learner.handle_learn(req.into_notifications(), is_batch).await;
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct GetValuesQuery {
    limit: Option<usize>,
}

async fn get_values_handler(
    State(learner): State<Arc<Learner>>,
    Query(query): Query<GetValuesQuery>,
) -> Json<GetValuesResponse> {
    let (values, total_count) = learner.get_values(query.limit).await;
    let returned_count = values.len();
    Json(GetValuesResponse { values, total_count, returned_count })
}

async fn learner_health_handler(State(learner): State<Arc<Learner>>) -> impl IntoResponse {
    health(Role::Learner, learner.node_id).await
}

async fn learner_status_handler(State(learner): State<Arc<Learner>>) -> Json<serde_json::Value> {
    Json(learner.status_snapshot().await)
}

async fn learner_view_logs_handler(State(learner): State<Arc<Learner>>) -> Json<serde_json::Value> {
    Json(learner.view_logs().await)
}

// ---- Proposer -------------------------------------------------------------

pub fn proposer_router(proposer: Arc<Proposer>) -> Router {
    Router::new()
        .route("/propose", post(propose_handler))
        .route("/heartbeat", post(proposer_heartbeat_handler))
        .route("/health", get(proposer_health_handler))
        .route("/status", get(proposer_status_handler))
        .route("/view-logs", get(proposer_view_logs_handler))
        .with_state(proposer)
}

async fn propose_handler(State(proposer): State<Arc<Proposer>>, Json(req): Json<ProposeRequest>) -> impl IntoResponse {
    match proposer.handle_propose(req.value, req.client_id).await {
        Ok((status, position)) => (StatusCode::OK, Json(ProposeResponse { status, position })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn proposer_heartbeat_handler(
    State(proposer): State<Arc<Proposer>>,
    Json(req): Json<ProposerHeartbeatRequest>,
) -> Json<AcknowledgedResponse> {
    proposer.handle_heartbeat(req.leader_id).await;
    Json(AcknowledgedResponse::default())
}

async fn proposer_health_handler(State(proposer): State<Arc<Proposer>>) -> impl IntoResponse {
    health(Role::Proposer, proposer.node_id).await
}

async fn proposer_status_handler(State(proposer): State<Arc<Proposer>>) -> Json<serde_json::Value> {
    Json(proposer.status_snapshot().await)
}

async fn proposer_view_logs_handler(State(proposer): State<Arc<Proposer>>) -> Json<serde_json::Value> {
    Json(proposer.view_logs().await)
}

// ---- Client ---------------------------------------------------------------

pub fn client_router(client: Arc<Client>) -> Router {
    Router::new()
        .route("/send", post(send_handler))
        .route("/notify", post(notify_handler))
        .route("/read", get(read_handler))
        .route("/get-responses", get(get_responses_handler))
        .route("/health", get(client_health_handler))
        .route("/view-logs", get(client_view_logs_handler))
        .with_state(client)
}

async fn send_handler(State(client): State<Arc<Client>>, Json(req): Json<ClientSendRequest>) -> impl IntoResponse {
    match client.send(req.value).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn notify_handler(State(client): State<Arc<Client>>, Json(req): Json<ClientNotification>) -> impl IntoResponse {
    client.handle_notify(req).await;
    StatusCode::OK
}

async fn read_handler(State(client): State<Arc<Client>>) -> impl IntoResponse {
    match client.read().await {
        Ok(values) => Json(serde_json::json!({ "values": values })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_responses_handler(State(client): State<Arc<Client>>) -> Json<Vec<ClientNotification>> {
    Json(client.get_responses().await)
}

async fn client_health_handler(State(client): State<Arc<Client>>) -> impl IntoResponse {
    health(Role::Client, client.node_id).await
}

async fn client_view_logs_handler(State(client): State<Arc<Client>>) -> Json<serde_json::Value> {
    Json(client.view_logs().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::membership::MembershipClient;
    use crate::message::LearnNotification;
    use crate::types::ProposalNumber;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn membership_for(role: Role, port: u16) -> MembershipClient {
        MembershipClient::new("http://localhost:7000".into(), 1, role, "localhost".into(), port)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn acceptor_health_reports_role_and_id() {
        let acceptor = Arc::new(Acceptor::new(1, ProtocolConfig::default(), membership_for(Role::Acceptor, 4000)));
        let router = acceptor_router(acceptor);
        let response = router.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["role"], "acceptor");
        assert_eq!(body["id"], 1);
    }

    #[tokio::test]
    async fn proposer_propose_without_leadership_returns_409_with_redirect_body() {
        let proposer = Arc::new(Proposer::new(1, ProtocolConfig::default(), membership_for(Role::Proposer, 3000)));
        let router = proposer_router(proposer);
        let req_body = serde_json::json!({ "value": "x", "client_id": "7" }).to_string();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/propose")
                    .header("content-type", "application/json")
                    .body(Body::from(req_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["retry_suggested"], true);
    }

    #[tokio::test]
    async fn learner_get_values_respects_limit_query() {
        let learner = Arc::new(Learner::new(1, ProtocolConfig::default(), membership_for(Role::Learner, 5000)));
        for (i, v) in ["a", "b", "c"].iter().enumerate() {
            let n = ProposalNumber::new(i as u64 + 1, 9);
            let from = |acceptor_id: u64| LearnNotification {
                acceptor_id,
                proposal_number: n,
                value: v.to_string(),
                tid: format!("t{}-{}", i, acceptor_id),
                is_leader_election: false,
                client_id: None,
            };
            learner.handle_learn(vec![from(1)], false).await;
            learner.handle_learn(vec![from(2)], false).await;
        }

        let router = learner_router(learner);
        let response =
            router.oneshot(Request::builder().uri("/get-values?limit=2").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["returned_count"], 2);
        assert_eq!(body["total_count"], 3);
    }

    #[tokio::test]
    async fn proposer_propose_with_reserved_value_prefix_returns_400() {
        let proposer = Arc::new(Proposer::new(1, ProtocolConfig::default(), membership_for(Role::Proposer, 3001)));
        let router = proposer_router(proposer);
        let req_body = serde_json::json!({ "value": "leader:1" }).to_string();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/propose")
                    .header("content-type", "application/json")
                    .body(Body::from(req_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn client_send_with_no_known_proposers_returns_503() {
        let client = Arc::new(Client::new(1, ProtocolConfig::default(), membership_for(Role::Client, 6000)));
        let router = client_router(client);
        let req_body = serde_json::json!({ "value": "x" }).to_string();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/send")
                    .header("content-type", "application/json")
                    .body(Body::from(req_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
