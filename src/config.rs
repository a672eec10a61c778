use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{error::AgentError, filter::Filter, filter::FilterPolicy, rdf};

/// Agent wide settings. Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Poll period of the polling change tracker.
    pub poll_interval_ms: u64,
    pub reconnect: ReconnectConfig,
    pub filter_policy: FilterPolicy,
    /// Media type used to serialize outgoing notifications and system notification bodies.
    pub content_type: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            poll_interval_ms: 5000,
            reconnect: ReconnectConfig::default(),
            filter_policy: FilterPolicy::default(),
            content_type: rdf::N_TRIPLES.to_string(),
        }
    }
}

impl AgentConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, AgentError> {
        let config: AgentConfig = toml::from_str(content)?;
        tracing::debug!("Loaded agent config: {:?}", config);
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, AgentError> {
        Ok(toml::to_string(self)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Tracker reconnection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    /// 1.0 keeps the delay constant across attempts.
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Restarts allowed over the lifetime of a subscription.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            base_delay_ms: 1000,
            backoff_multiplier: 1.0,
            max_delay_ms: 60_000,
            max_attempts: 6,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnection attempt number `attempt` (1-based).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

/// Options of a list, watch or clear call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListingOptions {
    /// Inbox to read. Takes precedence over `uri`.
    pub inbox: Option<String>,
    /// Resource advertising the inbox to read.
    pub uri: Option<String>,
    /// Delete every delivered notification from the pod.
    pub delete: bool,
    /// Raise a system notification for every delivered notification.
    pub notify: bool,
    /// Notification IDs that are never delivered.
    pub ignore: Vec<String>,
    pub filters: Vec<Filter>,
}

impl ListingOptions {
    pub fn for_inbox(inbox: impl Into<String>) -> Self {
        ListingOptions {
            inbox: Some(inbox.into()),
            ..Default::default()
        }
    }

    pub fn for_resource(uri: impl Into<String>) -> Self {
        ListingOptions {
            uri: Some(uri.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AgentConfig::from_toml_str("").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 6);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(AgentConfig::from_toml_str("verbose = true").is_err());
    }

    #[test]
    fn constant_backoff_by_default() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.delay(1), Duration::from_secs(1));
        assert_eq!(reconnect.delay(6), Duration::from_secs(1));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let reconnect = ReconnectConfig {
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 500,
            max_attempts: 10,
        };
        assert_eq!(reconnect.delay(1), Duration::from_millis(100));
        assert_eq!(reconnect.delay(3), Duration::from_millis(400));
        assert_eq!(reconnect.delay(4), Duration::from_millis(500));
    }

    #[test]
    fn parses_nested_sections() {
        let config = AgentConfig::from_toml_str(
            r#"
poll_interval_ms = 250
filter_policy = "match_on_conformance"

[reconnect]
base_delay_ms = 10
max_attempts = 2
"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.filter_policy, FilterPolicy::MatchOnConformance);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.backoff_multiplier, 1.0);
    }
}
