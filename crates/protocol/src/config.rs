//! Protocol configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How each process determines the two group roots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootDiscovery {
    /// Roots are the smallest announced rank of each color.
    #[default]
    Announced,

    /// First-gap rule over the own group's sorted ranks: the group holding
    /// rank 0 takes the rank after its first gap (or after its last member),
    /// the other group takes rank 0.
    Contiguous,
}

/// Configuration for the coordination protocol.
///
/// Must be identical on every process: `verify_record_layout` and
/// `flush_final_exchange` change the sequence of collective calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Root discovery strategy.
    pub root_discovery: RootDiscovery,

    /// Compare spike record layouts between group roots before negotiating.
    pub verify_record_layout: bool,

    /// Run one extra exchange after the last step without advancing time.
    pub flush_final_exchange: bool,

    /// Simulated time to cover. Only the leaf root's value is used.
    pub total_duration: f64,

    /// Per-collective liveness timeout in milliseconds. `None` blocks forever.
    pub collective_timeout_ms: Option<u64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            root_discovery: RootDiscovery::default(),
            verify_record_layout: true,
            flush_final_exchange: true,
            total_duration: 100.0,
            collective_timeout_ms: None,
        }
    }
}

impl ProtocolConfig {
    /// Set the simulated duration of the run.
    pub fn with_total_duration(mut self, total_duration: f64) -> Self {
        self.total_duration = total_duration;
        self
    }

    /// Set the root discovery strategy.
    pub fn with_root_discovery(mut self, root_discovery: RootDiscovery) -> Self {
        self.root_discovery = root_discovery;
        self
    }

    /// Enable or disable the record layout check.
    pub fn with_layout_check(mut self, enabled: bool) -> Self {
        self.verify_record_layout = enabled;
        self
    }

    /// Enable or disable the trailing flush exchange.
    pub fn with_final_flush(mut self, enabled: bool) -> Self {
        self.flush_final_exchange = enabled;
        self
    }

    /// Set the per-collective timeout.
    pub fn with_collective_timeout(mut self, timeout: Duration) -> Self {
        self.collective_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Per-collective timeout as a duration.
    pub fn collective_timeout(&self) -> Option<Duration> {
        self.collective_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.root_discovery, RootDiscovery::Announced);
        assert!(config.verify_record_layout);
        assert!(config.flush_final_exchange);
        assert_eq!(config.collective_timeout(), None);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: ProtocolConfig = toml::from_str(
            r#"
            root_discovery = "contiguous"
            total_duration = 97.0
            collective_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.root_discovery, RootDiscovery::Contiguous);
        assert_eq!(config.total_duration, 97.0);
        assert_eq!(config.collective_timeout(), Some(Duration::from_millis(2500)));
        assert!(config.flush_final_exchange);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<ProtocolConfig, _> = toml::from_str("debug = true");
        assert!(result.is_err());
    }

    #[test]
    fn test_builders() {
        let config = ProtocolConfig::default()
            .with_total_duration(5.0)
            .with_final_flush(false)
            .with_layout_check(false)
            .with_collective_timeout(Duration::from_secs(2));
        assert_eq!(config.total_duration, 5.0);
        assert!(!config.flush_final_exchange);
        assert!(!config.verify_record_layout);
        assert_eq!(config.collective_timeout_ms, Some(2000));
    }
}
