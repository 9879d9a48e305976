//! Entry point for an Acceptor, Learner, or Proposer process. Which
//! one is decided entirely by `NODE_ROLE`; see `Config (environment)`
//! for the full variable list.
//!
//! Run as:
//!     RUST_LOG=multi_paxos=info NODE_ID=1 NODE_ROLE=acceptor PORT=4001 \
//!         DISCOVERY_SERVICE=http://localhost:7000 cargo run --bin paxos-node

use multi_paxos::acceptor::{self, Acceptor};
use multi_paxos::config::{NodeIdentity, ProtocolConfig};
use multi_paxos::error::{Error, Result};
use multi_paxos::http;
use multi_paxos::learner::Learner;
use multi_paxos::membership::MembershipClient;
use multi_paxos::proposer::Proposer;
use multi_paxos::types::Role;
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

    if let Err(e) = membership.register().await {
        log::warn!("node {} failed initial registration: {}", identity.node_id, e);
    }

    let router = match identity.role {
        Role::Acceptor => {
            let acceptor = Arc::new(Acceptor::new(identity.node_id, config.clone(), membership.clone()));
            tokio::spawn(acceptor::run_notification_drain_loop(acceptor.clone()));
            tokio::spawn(acceptor::run_cache_cleanup_loop(acceptor.clone()));
            tokio::spawn(run_membership_heartbeat_loop(membership.clone(), config.clone()));
            http::acceptor_router(acceptor)
        }
        Role::Learner => {
            let learner = Arc::new(Learner::new(identity.node_id, config.clone(), membership.clone()));
            tokio::spawn(run_membership_heartbeat_loop(membership.clone(), config.clone()));
            http::learner_router(learner)
        }
        Role::Proposer => {
            let proposer = Arc::new(Proposer::new(identity.node_id, config.clone(), membership.clone()));
            tokio::spawn(proposer.clone().run_proposal_processor_loop());
            tokio::spawn(proposer.clone().run_heartbeat_loop());
            tokio::spawn(proposer.clone().run_leader_monitor_loop());
            tokio::spawn(run_membership_heartbeat_loop(membership.clone(), config.clone()));
            http::proposer_router(proposer)
        }
        Role::Client => {
            return Err(Error::Setup(
                "NODE_ROLE=client runs via the paxos-client binary, not paxos-node".to_string(),
            ));
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], identity.port));
    log::info!("{} {} listening on {}", identity.role, identity.node_id, addr);
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(Error::Bind)?;
    axum::serve(listener, router).await.map_err(Error::Bind)?;
    Ok(())
}

async fn run_membership_heartbeat_loop(membership: MembershipClient, config: ProtocolConfig) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_millis(config.membership_heartbeat_interval_ms));
    loop {
        interval.tick().await;
        if let Err(e) = membership.heartbeat().await {
            log::warn!("membership heartbeat failed: {}", e);
        }
    }
}
