//! Component introspection and instrumentation hooks
//!
//! The coordinator never owns components. It reads them through the narrow
//! [`Component`] interface and is invoked by the host pipeline at named
//! [`InstrumentationPoint`]s.

use crate::types::ComponentId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Introspectable component (protocol adapter, service, ...)
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable component identifier
    fn id(&self) -> ComponentId;

    /// Feature support summary
    async fn capabilities(&self) -> CapabilitySummary;

    /// Current health snapshot
    async fn health(&self) -> HealthSnapshot;

    /// Version information
    async fn version_info(&self) -> VersionInfo;
}

/// Support level of a single feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureSupport {
    /// Fully supported
    Full,
    /// Partially supported
    Partial,
    /// Not supported
    Unsupported,
}

/// Feature support summary reported by a component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySummary {
    /// Feature name -> support level
    pub features: Vec<(String, FeatureSupport)>,
}

impl CapabilitySummary {
    /// Create an empty summary
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feature
    #[inline]
    #[must_use]
    pub fn with_feature(mut self, name: impl Into<String>, support: FeatureSupport) -> Self {
        self.features.push((name.into(), support));
        self
    }

    /// Number of partially supported features
    #[must_use]
    pub fn partial_count(&self) -> usize {
        self.features
            .iter()
            .filter(|(_, s)| *s == FeatureSupport::Partial)
            .count()
    }

    /// Ratio of partially supported features (0 when no features are declared)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn partial_ratio(&self) -> f64 {
        if self.features.is_empty() {
            return 0.0;
        }
        self.partial_count() as f64 / self.features.len() as f64
    }
}

/// Coarse health classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    /// Operating normally
    #[default]
    Healthy,
    /// Working with reduced quality
    Degraded,
    /// Not working
    Unhealthy,
}

/// What the component suggests doing about its own health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthRecommendation {
    /// Nothing to do
    #[default]
    Continue,
    /// Needs evaluation
    Evaluate,
    /// Should be replaced
    Replace,
}

/// Base health snapshot reported by a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Classification
    pub status: HealthStatus,
    /// Score in [0, 100]
    pub score: f64,
    /// Errors observed recently
    pub recent_error_count: u32,
    /// Recommendation
    pub recommendation: HealthRecommendation,
    /// When the snapshot was taken
    pub checked_at: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Healthy snapshot with a perfect score
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            score: 100.0,
            recent_error_count: 0,
            recommendation: HealthRecommendation::Continue,
            checked_at: Utc::now(),
        }
    }

    /// With score
    #[inline]
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 100.0);
        self
    }

    /// With recent error count
    #[inline]
    #[must_use]
    pub fn with_errors(mut self, count: u32) -> Self {
        self.recent_error_count = count;
        self
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: HealthStatus) -> Self {
        self.status = status;
        self
    }

    /// With recommendation
    #[inline]
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: HealthRecommendation) -> Self {
        self.recommendation = recommendation;
        self
    }
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self::healthy()
    }
}

/// Version information reported by a component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Installed version (semver)
    pub current: String,
    /// Latest known upstream version
    pub latest: Option<String>,
    /// Whether the installed version is deprecated upstream
    pub deprecated: bool,
    /// Open security advisories against the installed version
    pub security_advisories: Vec<String>,
}

impl VersionInfo {
    /// Create version info for an installed version
    #[inline]
    #[must_use]
    pub fn new(current: impl Into<String>) -> Self {
        Self {
            current: current.into(),
            ..Self::default()
        }
    }

    /// With latest upstream version
    #[inline]
    #[must_use]
    pub fn with_latest(mut self, latest: impl Into<String>) -> Self {
        self.latest = Some(latest.into());
        self
    }

    /// Mark deprecated
    #[inline]
    #[must_use]
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Add a security advisory
    #[inline]
    #[must_use]
    pub fn with_advisory(mut self, advisory: impl Into<String>) -> Self {
        self.security_advisories.push(advisory.into());
        self
    }
}

/// Named point in the host pipeline where sensors run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstrumentationPoint {
    /// Before a conversion
    PreConversion,
    /// After a conversion
    PostConversion,
    /// While recovering from an error
    ErrorRecovery,
}

impl InstrumentationPoint {
    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentationPoint::PreConversion => "pre-conversion",
            InstrumentationPoint::PostConversion => "post-conversion",
            InstrumentationPoint::ErrorRecovery => "error-recovery",
        }
    }
}

impl std::fmt::Display for InstrumentationPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error observed by the host pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedError {
    /// Error kind used for grouping (e.g. `timeout`, `schema-mismatch`)
    pub kind: String,
    /// Message
    pub message: String,
}

impl ObservedError {
    /// Create an observed error
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Context handed to a hook by the host pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookContext {
    /// Payload being converted
    pub data: Value,
    /// Pipeline metadata
    pub metadata: Map<String, Value>,
    /// Error being recovered from, if any
    pub error: Option<ObservedError>,
}

impl HookContext {
    /// Context carrying a payload
    #[inline]
    #[must_use]
    pub fn with_data(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Context for an error-recovery hook
    #[inline]
    #[must_use]
    pub fn for_error(error: ObservedError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Add a metadata entry
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Result returned to the host pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookOutcome {
    /// Whether the pipeline may continue
    pub success: bool,
    /// Pass-through payload (conversion hooks)
    pub data: Option<Value>,
    /// Whether the error was recovered (error-recovery hook)
    pub recovered: Option<bool>,
}

impl HookOutcome {
    /// Conversion hook outcome that passes the payload through
    #[inline]
    #[must_use]
    pub fn passed(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            recovered: None,
        }
    }

    /// Error-recovery outcome: observed, not recovered
    #[inline]
    #[must_use]
    pub fn not_recovered() -> Self {
        Self {
            success: false,
            data: None,
            recovered: Some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_ratio_of_empty_summary_is_zero() {
        assert_eq!(CapabilitySummary::new().partial_ratio(), 0.0);
    }

    #[test]
    fn partial_ratio_counts_partials() {
        let summary = CapabilitySummary::new()
            .with_feature("tools", FeatureSupport::Full)
            .with_feature("sampling", FeatureSupport::Partial)
            .with_feature("roots", FeatureSupport::Unsupported)
            .with_feature("prompts", FeatureSupport::Partial);
        assert_eq!(summary.partial_count(), 2);
        assert!((summary.partial_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn health_score_is_clamped() {
        let health = HealthSnapshot::healthy().with_score(140.0);
        assert_eq!(health.score, 100.0);
    }

    #[test]
    fn instrumentation_point_names() {
        assert_eq!(InstrumentationPoint::ErrorRecovery.as_str(), "error-recovery");
        let json = serde_json::to_string(&InstrumentationPoint::PreConversion).unwrap();
        assert_eq!(json, "\"pre-conversion\"");
    }
}
