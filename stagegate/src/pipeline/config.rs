//! Engine configuration and per-run options.

use crate::bus::is_topic_segment;
use crate::errors::GateError;
use crate::utils::Payload;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When resolved control points are released from the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Release each point as soon as it is resolved.
    #[default]
    Immediate,
    /// Keep resolved points until the run finishes.
    Deferred,
}

/// Configuration for [`super::StagedEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default decision wait in seconds.
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_seconds: f64,
    /// When resolved control points are released.
    #[serde(default)]
    pub cleanup_policy: CleanupPolicy,
    /// Component id used on the bus.
    #[serde(default = "default_component_id")]
    pub component_id: String,
    /// Whether `cancel.#` messages cancel runs.
    #[serde(default = "default_listen_for_cancellations")]
    pub listen_for_cancellations: bool,
}

fn default_decision_timeout() -> f64 {
    300.0
}

fn default_component_id() -> String {
    "staged-engine".to_string()
}

fn default_listen_for_cancellations() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_timeout_seconds: default_decision_timeout(),
            cleanup_policy: CleanupPolicy::default(),
            component_id: default_component_id(),
            listen_for_cancellations: default_listen_for_cancellations(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] for invalid JSON or a non-positive
    /// timeout.
    pub fn from_json(json: &str) -> Result<Self, GateError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| GateError::Config(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the timeout is not a positive number
    /// representable as a [`Duration`], or the component id is empty.
    pub fn validate(&self) -> Result<(), GateError> {
        let timeout = Duration::try_from_secs_f64(self.decision_timeout_seconds).map_err(|e| {
            GateError::Config(format!(
                "decision_timeout_seconds {} is not a valid duration: {e}",
                self.decision_timeout_seconds
            ))
        })?;
        if timeout.is_zero() {
            return Err(GateError::Config(format!(
                "decision_timeout_seconds must be positive, got {}",
                self.decision_timeout_seconds
            )));
        }
        if self.component_id.trim().is_empty() {
            return Err(GateError::Config("component_id cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Sets the default decision timeout.
    #[must_use]
    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the cleanup policy.
    #[must_use]
    pub fn with_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    /// Sets the component id.
    #[must_use]
    pub fn with_component_id(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = component_id.into();
        self
    }

    /// Enables or disables bus-driven cancellation.
    #[must_use]
    pub fn with_cancellation_listener(mut self, enabled: bool) -> Self {
        self.listen_for_cancellations = enabled;
        self
    }

    /// Gets the decision timeout as a Duration.
    ///
    /// A value that fails [`EngineConfig::validate`] falls back to the
    /// default of 300 seconds.
    #[must_use]
    pub fn decision_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.decision_timeout_seconds)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_decision_timeout()))
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Metadata visible to every stage and control point.
    pub metadata: Payload,
    /// Overrides the engine's decision timeout.
    pub decision_timeout: Option<Duration>,
    /// Joins an existing pipeline lineage instead of starting a new one.
    pub pipeline_id: Option<String>,
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the metadata map.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn with_metadata_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets the decision timeout for this run.
    #[must_use]
    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = Some(timeout);
        self
    }

    /// Sets the pipeline id.
    ///
    /// The id becomes the last segment of every topic the run publishes on,
    /// so it must not be empty or contain `.`, `*`, `#` or whitespace.
    #[must_use]
    pub fn with_pipeline_id(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    /// Checks the options before a run starts.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Validation`] if the pipeline id cannot be used
    /// as a topic segment.
    pub fn validate(&self) -> Result<(), GateError> {
        match self.pipeline_id.as_deref() {
            Some(pipeline_id) if !is_topic_segment(pipeline_id) => Err(GateError::validation(format!(
                "pipeline id '{pipeline_id}' must be a single topic segment without '.', '*', '#' or whitespace"
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.decision_timeout(), Duration::from_secs(300));
        assert_eq!(config.cleanup_policy, CleanupPolicy::Immediate);
        assert_eq!(config.component_id, "staged-engine");
        assert!(config.listen_for_cancellations);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"decision_timeout_seconds": 2.5, "cleanup_policy": "deferred"}"#).unwrap();
        assert_eq!(config.decision_timeout(), Duration::from_millis(2500));
        assert_eq!(config.cleanup_policy, CleanupPolicy::Deferred);
        assert_eq!(config.component_id, "staged-engine");
    }

    #[test]
    fn test_from_json_rejects_bad_timeout() {
        let err = EngineConfig::from_json(r#"{"decision_timeout_seconds": 0}"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG");
        assert!(EngineConfig::from_json(r#"{"decision_timeout_seconds": -1.5}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());

        let err = EngineConfig::from_json(r#"{"decision_timeout_seconds": 1e30}"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG");
        assert!(err.to_string().contains("not a valid duration"));
    }

    #[test]
    fn test_decision_timeout_never_panics() {
        let mut config = EngineConfig::default();
        config.decision_timeout_seconds = 1e30;
        assert!(config.validate().is_err());
        assert_eq!(config.decision_timeout(), Duration::from_secs(300));

        config.decision_timeout_seconds = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.decision_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_run_options_reject_unroutable_pipeline_ids() {
        assert!(RunOptions::new().validate().is_ok());
        assert!(RunOptions::new().with_pipeline_id("orders-eu").validate().is_ok());

        for bad in ["", "orders.eu", "orders.*", "#", "orders eu"] {
            let err = RunOptions::new().with_pipeline_id(bad).validate().unwrap_err();
            assert_eq!(err.code(), "PIPELINE_VALIDATION", "pipeline id {bad:?}");
        }
    }

    #[test]
    fn test_run_options_builder() {
        let options = RunOptions::new()
            .with_pipeline_id("lineage")
            .with_decision_timeout(Duration::from_millis(10))
            .with_metadata_value("tenant", serde_json::json!("acme"));
        assert_eq!(options.pipeline_id.as_deref(), Some("lineage"));
        assert_eq!(options.decision_timeout, Some(Duration::from_millis(10)));
        assert_eq!(options.metadata["tenant"], serde_json::json!("acme"));
    }
}
