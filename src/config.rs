//! Run configuration.
//!
//! All fields have defaults. Use the builder pattern:
//!
//! ```rust
//! use hopsim::{NodeId, SimConfig, VirtualTime};
//!
//! let config = SimConfig::new()
//!     .start_time(VirtualTime::new(100))
//!     .pause_on_request(NodeId::new(1), "scanner");
//! assert_eq!(config.start_time, VirtualTime::new(100));
//! ```
//!
//! [`SimConfig::from_env`] reads the same settings from `HOPSIM_*`
//! environment variables.

use crate::error::ConfigError;
use crate::network::NodeId;
use crate::time::VirtualTime;

pub const ENV_RUN_ID: &str = "HOPSIM_RUN_ID";
pub const ENV_START_TIME: &str = "HOPSIM_START_TIME";
pub const ENV_PAUSE_ON_REQUEST: &str = "HOPSIM_PAUSE_ON_REQUEST";
pub const ENV_PAUSE_ON_RESPONSE: &str = "HOPSIM_PAUSE_ON_RESPONSE";

// ── Pause Point ───────────────────────────────────────────────────────

/// A `(node, service)` pair the run loop stops at.
///
/// Written `node.service` in configuration, e.g. `3.api`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PausePoint {
    pub node: NodeId,
    pub service: String,
}

impl PausePoint {
    pub fn new(node: impl Into<NodeId>, service: impl Into<String>) -> Self {
        PausePoint {
            node: node.into(),
            service: service.into(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidPausePoint(s.to_string());
        let (node, service) = s.trim().split_once('.').ok_or_else(invalid)?;
        let node: u64 = node.parse().map_err(|_| invalid())?;
        if service.is_empty() {
            return Err(invalid());
        }
        Ok(PausePoint::new(node, service))
    }

    /// Parse a comma-separated list; empty items are skipped.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, ConfigError> {
        s.split(',')
            .filter(|item| !item.trim().is_empty())
            .map(PausePoint::parse)
            .collect()
    }
}

impl std::fmt::Display for PausePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node.raw(), self.service)
    }
}

// ── Sim Config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SimConfig {
    /// Identifies the run in logs and traces. A fresh UUID by default.
    pub run_id: String,
    /// Clock reading before the first delivery.
    pub start_time: VirtualTime,
    /// Requests sent from these services pause the run loop.
    pub pause_on_request: Vec<PausePoint>,
    /// Responses delivered to these services pause the run loop.
    pub pause_on_response: Vec<PausePoint>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimConfig {
    /// Create a config with defaults and a freshly generated run id.
    pub fn new() -> Self {
        SimConfig {
            run_id: uuid::Uuid::new_v4().to_string(),
            start_time: VirtualTime::ZERO,
            pause_on_request: Vec::new(),
            pause_on_response: Vec::new(),
        }
    }

    /// Build a config from the process environment.
    ///
    /// Unset variables keep their defaults; set but malformed ones are
    /// an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SimConfig::new();

        if let Some(run_id) = lookup(ENV_RUN_ID).filter(|v| !v.trim().is_empty()) {
            config.run_id = run_id.trim().to_string();
        }
        if let Some(value) = lookup(ENV_START_TIME) {
            let ticks = value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                var: ENV_START_TIME.to_string(),
                value: value.clone(),
            })?;
            config.start_time = VirtualTime::new(ticks);
        }
        if let Some(value) = lookup(ENV_PAUSE_ON_REQUEST) {
            config.pause_on_request = PausePoint::parse_list(&value)?;
        }
        if let Some(value) = lookup(ENV_PAUSE_ON_RESPONSE) {
            config.pause_on_response = PausePoint::parse_list(&value)?;
        }
        Ok(config)
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn start_time(mut self, start: VirtualTime) -> Self {
        self.start_time = start;
        self
    }

    pub fn pause_on_request(mut self, node: impl Into<NodeId>, service: impl Into<String>) -> Self {
        self.pause_on_request.push(PausePoint::new(node, service));
        self
    }

    pub fn pause_on_response(mut self, node: impl Into<NodeId>, service: impl Into<String>) -> Self {
        self.pause_on_response.push(PausePoint::new(node, service));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let a = SimConfig::new();
        let b = SimConfig::new();
        assert_eq!(a.start_time, VirtualTime::ZERO);
        assert!(a.pause_on_request.is_empty());
        assert!(uuid::Uuid::parse_str(&a.run_id).is_ok());
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_from_lookup_reads_everything() {
        let config = SimConfig::from_lookup(lookup(&[
            (ENV_RUN_ID, "replay-7"),
            (ENV_START_TIME, "250"),
            (ENV_PAUSE_ON_REQUEST, "1.scanner, 2.api"),
            (ENV_PAUSE_ON_RESPONSE, "3.client"),
        ]))
        .unwrap();

        assert_eq!(config.run_id, "replay-7");
        assert_eq!(config.start_time, VirtualTime::new(250));
        assert_eq!(
            config.pause_on_request,
            vec![PausePoint::new(1, "scanner"), PausePoint::new(2, "api")]
        );
        assert_eq!(config.pause_on_response, vec![PausePoint::new(3, "client")]);
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let config = SimConfig::from_lookup(lookup(&[(ENV_RUN_ID, "  ")])).unwrap();
        assert!(uuid::Uuid::parse_str(&config.run_id).is_ok());
        assert_eq!(config.start_time, VirtualTime::ZERO);
    }

    #[test]
    fn test_bad_start_time() {
        let err = SimConfig::from_lookup(lookup(&[(ENV_START_TIME, "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: ENV_START_TIME.into(),
                value: "soon".into(),
            }
        );
    }

    #[test]
    fn test_bad_pause_points() {
        for bad in ["api", "x.api", "3.", ".api"] {
            assert_eq!(
                PausePoint::parse(bad),
                Err(ConfigError::InvalidPausePoint(bad.to_string())),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn test_pause_point_service_may_contain_dots() {
        let p = PausePoint::parse("4.svc.internal").unwrap();
        assert_eq!(p.node, NodeId::new(4));
        assert_eq!(p.service, "svc.internal");
        assert_eq!(p.to_string(), "4.svc.internal");
    }

    #[test]
    fn test_builder() {
        let config = SimConfig::new()
            .run_id("fixed")
            .pause_on_response(2, "client");
        assert_eq!(config.run_id, "fixed");
        assert_eq!(config.pause_on_response, vec![PausePoint::new(2, "client")]);
    }
}
