//! Core data types shared by every role: the proposal ordering and the
//! value that flows through prepare/accept/learn.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// `(counter, proposer_id)`, compared lexicographically. `counter` gives
/// each proposer an increasing sequence of its own rounds; `proposer_id`
/// breaks ties between proposers that happen to pick the same counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalNumber {
    pub counter: u64,
    pub proposer_id: u64,
}

impl ProposalNumber {
    pub fn new(counter: u64, proposer_id: u64) -> Self {
        ProposalNumber { counter, proposer_id }
    }

    pub fn zero(proposer_id: u64) -> Self {
        ProposalNumber { counter: 0, proposer_id }
    }

    pub fn next(self) -> Self {
        ProposalNumber { counter: self.counter + 1, proposer_id: self.proposer_id }
    }
}

impl Ord for ProposalNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter.cmp(&other.counter).then(self.proposer_id.cmp(&other.proposer_id))
    }
}

impl PartialOrd for ProposalNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ProposalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.counter, self.proposer_id)
    }
}

/// The opaque payload Paxos agrees on. Election rounds use the
/// `leader:<id>` convention; every other value is an ordinary
/// client-submitted string.
pub type Value = String;

pub fn leader_value(proposer_id: u64) -> Value {
    format!("leader:{}", proposer_id)
}

pub fn leader_id_from_value(value: &Value) -> Option<u64> {
    value.strip_prefix("leader:").and_then(|s| s.parse().ok())
}

/// The four node roles a process can run as, set via `NODE_ROLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Proposer,
    Acceptor,
    Learner,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Proposer => "proposer",
            Role::Acceptor => "acceptor",
            Role::Learner => "learner",
            Role::Client => "client",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proposer" => Ok(Role::Proposer),
            "acceptor" => Ok(Role::Acceptor),
            "learner" => Ok(Role::Learner),
            "client" => Ok(Role::Client),
            other => Err(format!("unknown node role: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_number_orders_by_counter_then_id() {
        let a = ProposalNumber::new(1, 5);
        let b = ProposalNumber::new(1, 9);
        let c = ProposalNumber::new(2, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn next_only_bumps_counter() {
        let a = ProposalNumber::new(3, 7);
        let b = a.next();
        assert_eq!(b.counter, 4);
        assert_eq!(b.proposer_id, 7);
    }

    #[test]
    fn leader_value_round_trips() {
        let v = leader_value(42);
        assert_eq!(v, "leader:42");
        assert_eq!(leader_id_from_value(&v), Some(42));
        assert_eq!(leader_id_from_value(&"hello".to_string()), None);
    }
}
