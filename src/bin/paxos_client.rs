//! Entry point for the Client gateway process: submits values, serves
//! `/notify` for learner callbacks, and exposes `/read` /
//! `/get-responses` for retrieval.
//!
//! Run as:
//!     RUST_LOG=multi_paxos=info NODE_ID=1 NODE_ROLE=client PORT=6001 \
//!         DISCOVERY_SERVICE=http://localhost:7000 cargo run --bin paxos-client

use multi_paxos::client::Client;
use multi_paxos::config::{NodeIdentity, ProtocolConfig};
use multi_paxos::error::{Error, Result};
use multi_paxos::http;
use multi_paxos::membership::MembershipClient;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let identity = NodeIdentity::from_env()?;
    let config = ProtocolConfig::load()?;
    let membership = MembershipClient::new(
        identity.discovery_url.clone(),
        identity.node_id,
        identity.role,
        "127.0.0.1".to_string(),
        identity.port,
    );

    let client = Arc::new(Client::new(identity.node_id, config, membership));
    if let Err(e) = client.register_with_discovery().await {
        log::warn!("client {} failed initial registration: {}", identity.node_id, e);
    }
    tokio::spawn(client.clone().run_heartbeat_loop());

    let addr = SocketAddr::from(([0, 0, 0, 0], identity.port));
    log::info!("client {} listening on {}", identity.node_id, addr);
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(Error::Bind)?;
    axum::serve(listener, http::client_router(client)).await.map_err(Error::Bind)?;
    Ok(())
}
