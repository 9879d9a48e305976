//! Node configuration: per-process identity comes from the environment
//! (so an orchestrator can start many identical binaries); protocol
//! tuning constants come from a TOML file with environment overrides,
//! continuing the teacher's own `config`+`toml`-backed approach.

use crate::error::{Error, Result};
use crate::types::Role;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Identifies a single running node: which role it plays, which id it
/// holds within that role, and where it (and the membership registry)
/// listen. Set exclusively through environment variables per the
/// external interface.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub node_id: u64,
    pub role: Role,
    pub port: u16,
    pub discovery_url: String,
}

impl NodeIdentity {
    pub fn from_env() -> Result<Self> {
        let node_id = env::var("NODE_ID")
            .map_err(|_| Error::Setup("NODE_ID is required".into()))?
            .parse()
            .map_err(|_| Error::Setup("NODE_ID must be an integer".into()))?;

        let role = env::var("NODE_ROLE")
            .map_err(|_| Error::Setup("NODE_ROLE is required".into()))?;
        let role = Role::from_str(&role).map_err(Error::Setup)?;

        let port = env::var("PORT")
            .map_err(|_| Error::Setup("PORT is required".into()))?
            .parse()
            .map_err(|_| Error::Setup("PORT must be a u16".into()))?;

        let discovery_url =
            env::var("DISCOVERY_SERVICE").unwrap_or_else(|_| "http://discovery:7000".to_string());

        Ok(NodeIdentity { node_id, role, port, discovery_url })
    }
}

/// Tunable constants governing timing, batching, and bounded-memory
/// behavior. Defaults mirror the values observed in the prototype this
/// protocol was distilled from; every field can be overridden by an
/// environment variable of the same name, upper-cased (e.g.
/// `HEARTBEAT_INTERVAL_MS`).
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "defaults::heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "defaults::leader_timeout_ms")]
    pub leader_timeout_ms: u64,
    #[serde(default = "defaults::bootstrap_base_delay_ms")]
    pub bootstrap_base_delay_ms: u64,
    #[serde(default = "defaults::election_backoff_base_ms")]
    pub election_backoff_base_ms: u64,
    #[serde(default = "defaults::election_backoff_max_ms")]
    pub election_backoff_max_ms: u64,
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::retry_base_timeout_ms")]
    pub retry_base_timeout_ms: u64,
    #[serde(default = "defaults::notification_batch_size")]
    pub notification_batch_size: usize,
    #[serde(default = "defaults::notification_drain_interval_ms")]
    pub notification_drain_interval_ms: u64,
    #[serde(default = "defaults::cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "defaults::cache_cleanup_interval_secs")]
    pub cache_cleanup_interval_secs: u64,
    #[serde(default = "defaults::max_history_size")]
    pub max_history_size: usize,
    #[serde(default = "defaults::max_processed_tids")]
    pub max_processed_tids: usize,
    #[serde(default = "defaults::membership_heartbeat_interval_ms")]
    pub membership_heartbeat_interval_ms: u64,
}

mod defaults {
    pub fn heartbeat_interval_ms() -> u64 {
        1000
    }
    pub fn leader_timeout_ms() -> u64 {
        10_000
    }
    pub fn bootstrap_base_delay_ms() -> u64 {
        5000
    }
    pub fn election_backoff_base_ms() -> u64 {
        1000
    }
    pub fn election_backoff_max_ms() -> u64 {
        30_000
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn retry_base_timeout_ms() -> u64 {
        1000
    }
    pub fn notification_batch_size() -> usize {
        10
    }
    pub fn notification_drain_interval_ms() -> u64 {
        1000
    }
    pub fn cache_ttl_secs() -> u64 {
        60
    }
    pub fn cache_cleanup_interval_secs() -> u64 {
        300
    }
    pub fn max_history_size() -> usize {
        100
    }
    pub fn max_processed_tids() -> usize {
        10_000
    }
    pub fn membership_heartbeat_interval_ms() -> u64 {
        5000
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            heartbeat_interval_ms: defaults::heartbeat_interval_ms(),
            leader_timeout_ms: defaults::leader_timeout_ms(),
            bootstrap_base_delay_ms: defaults::bootstrap_base_delay_ms(),
            election_backoff_base_ms: defaults::election_backoff_base_ms(),
            election_backoff_max_ms: defaults::election_backoff_max_ms(),
            max_retries: defaults::max_retries(),
            retry_base_timeout_ms: defaults::retry_base_timeout_ms(),
            notification_batch_size: defaults::notification_batch_size(),
            notification_drain_interval_ms: defaults::notification_drain_interval_ms(),
            cache_ttl_secs: defaults::cache_ttl_secs(),
            cache_cleanup_interval_secs: defaults::cache_cleanup_interval_secs(),
            max_history_size: defaults::max_history_size(),
            max_processed_tids: defaults::max_processed_tids(),
            membership_heartbeat_interval_ms: defaults::membership_heartbeat_interval_ms(),
        }
    }
}

impl ProtocolConfig {
    /// Loads `Settings.toml` from the current directory if present, then
    /// layers environment variable overrides on top, falling back
    /// entirely to [`ProtocolConfig::default`] when neither is set.
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("Settings").required(false))
            .add_source(config::Environment::default());

        let built = builder.build()?;
        match built.try_deserialize::<ProtocolConfig>() {
            Ok(cfg) => Ok(cfg),
            Err(_) => Ok(ProtocolConfig::default()),
        }
    }

    pub fn bootstrap_delay(&self, node_id: u64) -> std::time::Duration {
        let millis = self.bootstrap_base_delay_ms as f64 * (1.0 + 0.5 * node_id as f64);
        std::time::Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ProtocolConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.notification_batch_size, 10);
    }

    #[test]
    fn bootstrap_delay_scales_with_node_id() {
        let cfg = ProtocolConfig::default();
        let d0 = cfg.bootstrap_delay(0);
        let d2 = cfg.bootstrap_delay(2);
        assert!(d2 > d0);
    }
}
