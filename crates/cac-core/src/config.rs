//! Layered configuration
//!
//! One section per layer. Every field has a default, so a config file only
//! needs to name what it changes. Durations are integer milliseconds on disk.
//!
//! ```toml
//! [detection]
//! confidence_threshold = 0.8
//!
//! [propagation.topology]
//! mcp = ["a2a", "acp"]
//!
//! [modification]
//! max_concurrent_modifications = 1
//! ```

use crate::error::ConfigError;
use crate::types::CapabilityLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Complete coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    /// Detection instrumentor settings
    pub detection: DetectionConfig,
    /// Propagation bus settings
    pub propagation: PropagationConfig,
    /// Modification workflow settings
    pub modification: ModificationConfig,
    /// Controller settings
    pub controller: ControllerConfig,
}

impl AdaptationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML
    /// - `ConfigError::InvalidValue` when a value is out of range
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Same as [`AdaptationConfig::from_toml_str`], plus `ConfigError::Io`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Serialize to TOML
    ///
    /// # Errors
    /// Fails only if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detection.validate()?;
        self.propagation.validate()?;
        self.modification.validate()?;
        self.controller.validate()
    }

    /// With detection section
    #[inline]
    #[must_use]
    pub fn with_detection(mut self, detection: DetectionConfig) -> Self {
        self.detection = detection;
        self
    }

    /// With propagation section
    #[inline]
    #[must_use]
    pub fn with_propagation(mut self, propagation: PropagationConfig) -> Self {
        self.propagation = propagation;
        self
    }

    /// With modification section
    #[inline]
    #[must_use]
    pub fn with_modification(mut self, modification: ModificationConfig) -> Self {
        self.modification = modification;
        self
    }

    /// With controller section
    #[inline]
    #[must_use]
    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }
}

/// Detection instrumentor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Detections below this confidence are discarded
    pub confidence_threshold: f64,
    /// Maximum detections kept in history
    pub max_history: usize,
    /// Debounce between an error-recovery detection and its auto-reaction
    pub auto_reaction_delay_ms: u64,
    /// Rolling window used by the error-pattern sensor
    pub error_window_ms: u64,
    /// Same-kind errors inside the window needed to flag a pattern
    pub error_pattern_threshold: usize,
    /// Maximum error observations kept per component
    pub max_error_observations: usize,
}

impl DetectionConfig {
    /// Auto-reaction debounce
    #[inline]
    #[must_use]
    pub fn auto_reaction_delay(&self) -> Duration {
        Duration::from_millis(self.auto_reaction_delay_ms)
    }

    /// Error-pattern rolling window
    #[inline]
    #[must_use]
    pub fn error_window(&self) -> Duration {
        Duration::from_millis(self.error_window_ms)
    }

    /// With confidence threshold
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// With auto-reaction delay
    #[inline]
    #[must_use]
    pub fn with_auto_reaction_delay(mut self, delay: Duration) -> Self {
        self.auto_reaction_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With history capacity
    #[inline]
    #[must_use]
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::invalid(
                "detection.confidence_threshold",
                format!("{} is outside [0, 1]", self.confidence_threshold),
            ));
        }
        if self.max_history == 0 {
            return Err(ConfigError::invalid("detection.max_history", "must be > 0"));
        }
        if self.error_pattern_threshold == 0 {
            return Err(ConfigError::invalid(
                "detection.error_pattern_threshold",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            max_history: 1000,
            auto_reaction_delay_ms: 5_000,
            error_window_ms: 3_600_000,
            error_pattern_threshold: 3,
            max_error_observations: 1000,
        }
    }
}

/// Propagation bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Queue capacity; overflow trims the low-priority tail
    pub max_queue_size: usize,
    /// Drain loop period
    pub drain_interval_ms: u64,
    /// TTL applied when a message does not set one
    pub default_ttl_ms: u64,
    /// Priority applied when a message does not set one
    pub default_priority: i32,
    /// Extra attempts for a failing delivery
    pub retry_attempts: u32,
    /// Backoff before the first retry, doubled per attempt
    pub retry_backoff_ms: u64,
    /// Deadline for an acknowledged delivery
    pub ack_timeout_ms: u64,
    /// Hierarchical channel adjacency: source -> downstream components
    pub topology: BTreeMap<String, Vec<String>>,
}

impl PropagationConfig {
    /// Drain loop period
    #[inline]
    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// Default TTL
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Initial retry backoff
    #[inline]
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Ack deadline
    #[inline]
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// With queue capacity
    #[inline]
    #[must_use]
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With an adjacency entry for the hierarchical channel
    #[must_use]
    pub fn with_edge(mut self, source: impl Into<String>, targets: &[&str]) -> Self {
        self.topology.insert(
            source.into(),
            targets.iter().map(|t| (*t).to_string()).collect(),
        );
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::invalid(
                "propagation.max_queue_size",
                "must be > 0",
            ));
        }
        if self.drain_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "propagation.drain_interval_ms",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            drain_interval_ms: 100,
            default_ttl_ms: 60_000,
            default_priority: 5,
            retry_attempts: 2,
            retry_backoff_ms: 50,
            ack_timeout_ms: 5_000,
            topology: BTreeMap::new(),
        }
    }
}

/// Modification workflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModificationConfig {
    /// Run every change's validation rule before applying anything
    pub validation_required: bool,
    /// Run the rollback plan when a change fails
    pub auto_rollback_on_failure: bool,
    /// Upper bound on concurrently executing requests
    pub max_concurrent_modifications: usize,
    /// Maximum executions kept in history
    pub max_execution_history: usize,
}

impl ModificationConfig {
    /// With validation toggle
    #[inline]
    #[must_use]
    pub fn with_validation(mut self, required: bool) -> Self {
        self.validation_required = required;
        self
    }

    /// With auto-rollback toggle
    #[inline]
    #[must_use]
    pub fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback_on_failure = enabled;
        self
    }

    /// With concurrency bound
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_modifications = max;
        self
    }

    /// With execution history capacity
    #[inline]
    #[must_use]
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_execution_history = max;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_modifications == 0 {
            return Err(ConfigError::invalid(
                "modification.max_concurrent_modifications",
                "must be > 0",
            ));
        }
        if self.max_execution_history == 0 {
            return Err(ConfigError::invalid(
                "modification.max_execution_history",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for ModificationConfig {
    fn default() -> Self {
        Self {
            validation_required: true,
            auto_rollback_on_failure: true,
            max_concurrent_modifications: 3,
            max_execution_history: 500,
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Broadcast every detection on the bus
    pub auto_propagate: bool,
    /// Turn auto-reactions into modification requests
    pub auto_modify: bool,
    /// Capability granted on instrumentation
    pub default_capability: CapabilityLevel,
    /// Whether auto-generated requests wait for approval
    pub require_approval: bool,
    /// Minimum spacing between a component's own health re-propagations
    pub health_repropagate_interval_ms: u64,
}

impl ControllerConfig {
    /// Health re-propagation spacing
    #[inline]
    #[must_use]
    pub fn health_repropagate_interval(&self) -> Duration {
        Duration::from_millis(self.health_repropagate_interval_ms)
    }

    /// With auto-propagate toggle
    #[inline]
    #[must_use]
    pub fn with_auto_propagate(mut self, enabled: bool) -> Self {
        self.auto_propagate = enabled;
        self
    }

    /// With auto-modify toggle
    #[inline]
    #[must_use]
    pub fn with_auto_modify(mut self, enabled: bool) -> Self {
        self.auto_modify = enabled;
        self
    }

    /// With approval toggle for generated requests
    #[inline]
    #[must_use]
    pub fn with_require_approval(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            auto_propagate: true,
            auto_modify: false,
            default_capability: CapabilityLevel::Behavior,
            require_approval: true,
            health_repropagate_interval_ms: 60_000,
        }
    }
}
