//! Configuration for the triage engine
//!
//! Every threshold the engine consults lives here rather than in code:
//! classifier confidence, guard failure biases, handler deadlines, the
//! escalation cap, and session lifecycle knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::guard::GuardConfig;

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Classifications below this confidence default to the general category
    pub confidence_threshold: f64,

    /// Guard behavior when a predicate evaluator fails, per direction
    pub guard: GuardConfig,

    /// Deadline for a single handler invocation; a timeout is treated as a
    /// refusal and escalated
    pub handler_deadline: Duration,

    /// Maximum reroutes per turn (used when no explicit escalation policy
    /// is supplied)
    pub max_escalations: usize,

    /// Sessions inactive past this duration are eligible for teardown
    pub session_idle_timeout: Duration,

    /// How many recent turns a session snapshot carries
    pub history_window: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            guard: GuardConfig::default(),
            handler_deadline: Duration::from_secs(30),
            max_escalations: 1,
            session_idle_timeout: Duration::from_secs(30 * 60),
            history_window: 20,
        }
    }
}

/// Configuration builder
pub struct ConfigBuilder {
    config: TriageConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TriageConfig::default(),
        }
    }

    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.config.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn guard(mut self, guard: GuardConfig) -> Self {
        self.config.guard = guard;
        self
    }

    pub fn handler_deadline(mut self, deadline: Duration) -> Self {
        self.config.handler_deadline = deadline;
        self
    }

    pub fn max_escalations(mut self, max_escalations: usize) -> Self {
        self.config.max_escalations = max_escalations;
        self
    }

    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_idle_timeout = timeout;
        self
    }

    pub fn history_window(mut self, window: usize) -> Self {
        self.config.history_window = window;
        self
    }

    pub fn build(self) -> TriageConfig {
        self.config
    }
}

/// Load configuration from environment variables
pub fn from_env() -> TriageConfig {
    let mut config = TriageConfig::default();

    if let Ok(threshold) = std::env::var("TRIAGE_CONFIDENCE_THRESHOLD") {
        if let Ok(value) = threshold.parse::<f64>() {
            config.confidence_threshold = value.clamp(0.0, 1.0);
        }
    }

    if let Ok(deadline) = std::env::var("TRIAGE_HANDLER_DEADLINE_SECS") {
        if let Ok(secs) = deadline.parse::<u64>() {
            config.handler_deadline = Duration::from_secs(secs);
        }
    }

    if let Ok(max) = std::env::var("TRIAGE_MAX_ESCALATIONS") {
        if let Ok(value) = max.parse::<usize>() {
            config.max_escalations = value;
        }
    }

    if let Ok(idle) = std::env::var("TRIAGE_SESSION_IDLE_SECS") {
        if let Ok(secs) = idle.parse::<u64>() {
            config.session_idle_timeout = Duration::from_secs(secs);
        }
    }

    config
}

/// Load configuration from a TOML file
pub fn from_file(
    path: impl AsRef<std::path::Path>,
) -> Result<TriageConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: TriageConfig = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::FailureBias;

    #[test]
    fn test_default_config() {
        let config = TriageConfig::default();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.max_escalations, 1);
        assert_eq!(config.handler_deadline, Duration::from_secs(30));
        assert_eq!(config.guard.input_failure, FailureBias::Open);
        assert_eq!(config.guard.output_failure, FailureBias::Closed);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .confidence_threshold(0.7)
            .handler_deadline(Duration::from_secs(5))
            .max_escalations(2)
            .history_window(8)
            .build();

        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.handler_deadline, Duration::from_secs(5));
        assert_eq!(config.max_escalations, 2);
        assert_eq!(config.history_window, 8);
    }

    #[test]
    fn test_builder_clamps_threshold() {
        let config = ConfigBuilder::new().confidence_threshold(3.0).build();
        assert_eq!(config.confidence_threshold, 1.0);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = ConfigBuilder::new().max_escalations(3).build();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: TriageConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.max_escalations, 3);
        assert_eq!(parsed.confidence_threshold, 0.5);
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;

        let config = ConfigBuilder::new().confidence_threshold(0.8).build();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = from_file(file.path()).unwrap();
        assert_eq!(loaded.confidence_threshold, 0.8);
    }
}
