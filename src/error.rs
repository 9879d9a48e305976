//! Crate-wide error type. Handlers turn each variant into the HTTP
//! status/body spec'd for node-to-node calls; the binaries turn the
//! fatal ones into a non-zero exit.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("not the leader, current leader is {current_leader:?}")]
    NotLeader { current_leader: Option<u64> },

    #[error("no quorum available: {0}")]
    NoQuorum(String),

    #[error("peer request failed: {0}")]
    Peer(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid node role or id: {0}")]
    Setup(String),

    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// HTTP mapping per the error handling design: `Malformed` → 400,
/// `NotLeader` → 409 with the redirect body, `NoQuorum` and any
/// downstream peer failure that reaches a handler → 503. The
/// remaining variants are startup-only and never returned by a
/// handler, but still map somewhere sane rather than panicking.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Malformed(msg) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": msg }))).into_response(),
            Error::NotLeader { current_leader } => (
                StatusCode::CONFLICT,
                Json(crate::message::NotLeaderResponse {
                    error: "Not the leader".to_string(),
                    current_leader,
                    retry_suggested: true,
                }),
            )
                .into_response(),
            Error::NoQuorum(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "error": msg }))).into_response()
            }
            Error::Peer(e) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
            }
            Error::Config(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
            }
            Error::Setup(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": msg }))).into_response()
            }
            Error::Bind(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
            }
        }
    }
}
