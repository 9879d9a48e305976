//! A replicated value-log built on Multi-Paxos: Proposer, Acceptor,
//! Learner, and Client roles exchanging JSON over HTTP, plus the
//! leader-election overlay that keeps one Proposer in charge at a
//! time.

pub mod acceptor;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod learner;
pub mod membership;
pub mod message;
pub mod proposer;
pub mod retry;
pub mod types;
