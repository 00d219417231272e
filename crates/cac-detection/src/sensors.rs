//! Sensors and the built-in probes
//!
//! A sensor inspects a component at an instrumentation point and optionally
//! yields a [`PatternDetection`]. `Ok(None)` is the normal "nothing to report"
//! result, not a failure.

use crate::error::SensorError;
use crate::history::ErrorObservation;
use async_trait::async_trait;
use cac_core::{
    CapabilitySummary, ComponentId, HealthSnapshot, HookContext, InstrumentationPoint,
    PatternDetection, PatternType, VersionInfo,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Sensor classification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SensorKind {
    /// Feature-support ratio probe
    ApiSurface,
    /// Health/error-rate probe
    Behavior,
    /// Upstream version probe
    Version,
    /// Repeated-error probe
    ErrorPattern,
    /// Host-provided probe
    Custom(String),
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::ApiSurface => f.write_str("api-surface"),
            SensorKind::Behavior => f.write_str("behavior"),
            SensorKind::Version => f.write_str("version"),
            SensorKind::ErrorPattern => f.write_str("error-pattern"),
            SensorKind::Custom(name) => f.write_str(name),
        }
    }
}

/// Everything a sensor may look at
///
/// Component state is fetched once per check and shared by all sensors.
#[derive(Debug, Clone)]
pub struct SensorContext<'a> {
    pub component_id: &'a ComponentId,
    pub point: InstrumentationPoint,
    pub hook: &'a HookContext,
    pub capabilities: &'a CapabilitySummary,
    pub health: &'a HealthSnapshot,
    pub version: &'a VersionInfo,
    /// Error observations for this component, oldest first, current one included
    pub recent_errors: &'a [ErrorObservation],
    pub error_window: Duration,
    pub error_pattern_threshold: usize,
    pub now: DateTime<Utc>,
}

/// A typed probe
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Classification
    fn kind(&self) -> SensorKind;

    /// Points this sensor runs at
    fn points(&self) -> &[InstrumentationPoint];

    /// Inspect the component
    async fn probe(
        &self,
        ctx: &SensorContext<'_>,
    ) -> Result<Option<PatternDetection>, SensorError>;
}

/// The four built-in sensors
#[must_use]
pub fn builtin_sensors() -> Vec<Arc<dyn Sensor>> {
    vec![
        Arc::new(ApiSurfaceSensor::default()),
        Arc::new(BehaviorSensor::default()),
        Arc::new(VersionSensor),
        Arc::new(ErrorPatternSensor),
    ]
}

/// Flags components whose partially-supported feature ratio is too high
#[derive(Debug, Clone)]
pub struct ApiSurfaceSensor {
    max_partial_ratio: f64,
}

impl Default for ApiSurfaceSensor {
    fn default() -> Self {
        Self {
            max_partial_ratio: 0.3,
        }
    }
}

#[async_trait]
impl Sensor for ApiSurfaceSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::ApiSurface
    }

    fn points(&self) -> &[InstrumentationPoint] {
        &[InstrumentationPoint::PreConversion]
    }

    async fn probe(
        &self,
        ctx: &SensorContext<'_>,
    ) -> Result<Option<PatternDetection>, SensorError> {
        let ratio = ctx.capabilities.partial_ratio();
        if ratio <= self.max_partial_ratio {
            return Ok(None);
        }

        let partial: Vec<_> = ctx
            .capabilities
            .features
            .iter()
            .filter(|(_, s)| *s == cac_core::FeatureSupport::Partial)
            .map(|(name, _)| name.clone())
            .collect();

        Ok(Some(
            PatternDetection::new(
                ctx.component_id.clone(),
                PatternType::Enhancement,
                format!(
                    "{:.0}% of declared features are only partially supported",
                    ratio * 100.0
                ),
                (0.6 + 0.4 * ratio).min(1.0),
            )
            .with_evidence("partial_ratio", json!(ratio))
            .with_evidence("partial_features", json!(partial))
            .with_suggested_action("complete partial feature mappings"),
        ))
    }
}

/// Flags components with many recent errors or a poor health score
#[derive(Debug, Clone)]
pub struct BehaviorSensor {
    max_recent_errors: u32,
    min_health_score: f64,
}

impl Default for BehaviorSensor {
    fn default() -> Self {
        Self {
            max_recent_errors: 10,
            min_health_score: 50.0,
        }
    }
}

#[async_trait]
impl Sensor for BehaviorSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Behavior
    }

    fn points(&self) -> &[InstrumentationPoint] {
        &[
            InstrumentationPoint::PostConversion,
            InstrumentationPoint::ErrorRecovery,
        ]
    }

    async fn probe(
        &self,
        ctx: &SensorContext<'_>,
    ) -> Result<Option<PatternDetection>, SensorError> {
        let too_many_errors = ctx.health.recent_error_count > self.max_recent_errors;
        let unhealthy = ctx.health.score < self.min_health_score;
        if !too_many_errors && !unhealthy {
            return Ok(None);
        }

        let confidence = if too_many_errors && unhealthy { 0.9 } else { 0.75 };
        Ok(Some(
            PatternDetection::new(
                ctx.component_id.clone(),
                PatternType::BreakingChange,
                format!(
                    "behavior degraded: {} recent errors, health score {:.0}",
                    ctx.health.recent_error_count, ctx.health.score
                ),
                confidence,
            )
            .with_evidence("recent_errors", json!(ctx.health.recent_error_count))
            .with_evidence("health_score", json!(ctx.health.score))
            .with_suggested_action("investigate upstream behavior change"),
        ))
    }
}

/// Compares the installed version against upstream information
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionSensor;

impl VersionSensor {
    fn parse(raw: &str) -> Option<semver::Version> {
        semver::Version::parse(raw.trim().trim_start_matches('v')).ok()
    }
}

#[async_trait]
impl Sensor for VersionSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Version
    }

    fn points(&self) -> &[InstrumentationPoint] {
        &[InstrumentationPoint::PreConversion]
    }

    async fn probe(
        &self,
        ctx: &SensorContext<'_>,
    ) -> Result<Option<PatternDetection>, SensorError> {
        let version = ctx.version;
        let id = ctx.component_id.clone();

        if !version.security_advisories.is_empty() {
            return Ok(Some(
                PatternDetection::new(
                    id,
                    PatternType::Security,
                    format!(
                        "{} open security advisories against {}",
                        version.security_advisories.len(),
                        version.current
                    ),
                    0.95,
                )
                .with_evidence("advisories", json!(version.security_advisories))
                .with_suggested_action("apply security patch"),
            ));
        }

        if version.deprecated {
            return Ok(Some(
                PatternDetection::new(
                    id,
                    PatternType::Deprecation,
                    format!("installed version {} is deprecated", version.current),
                    0.85,
                )
                .with_evidence("current", json!(version.current))
                .with_suggested_action("wrap deprecated surface and plan migration"),
            ));
        }

        let (Some(current), Some(latest)) = (
            Self::parse(&version.current),
            version.latest.as_deref().and_then(Self::parse),
        ) else {
            return Ok(None);
        };
        if latest <= current {
            return Ok(None);
        }

        let (pattern_type, confidence, action) = if latest.major > current.major {
            (PatternType::BreakingChange, 0.8, "prepare breaking-change migration")
        } else if latest.minor > current.minor {
            (PatternType::Enhancement, 0.7, "adopt new upstream features")
        } else {
            return Ok(None);
        };

        Ok(Some(
            PatternDetection::new(
                id,
                pattern_type,
                format!("upstream moved from {current} to {latest}"),
                confidence,
            )
            .with_evidence("current", json!(current.to_string()))
            .with_evidence("latest", json!(latest.to_string()))
            .with_suggested_action(action),
        ))
    }
}

/// Flags repeated same-kind errors inside the rolling window
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorPatternSensor;

#[async_trait]
impl Sensor for ErrorPatternSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::ErrorPattern
    }

    fn points(&self) -> &[InstrumentationPoint] {
        &[InstrumentationPoint::ErrorRecovery]
    }

    async fn probe(
        &self,
        ctx: &SensorContext<'_>,
    ) -> Result<Option<PatternDetection>, SensorError> {
        let Some(error) = ctx.hook.error.as_ref() else {
            return Ok(None);
        };

        let window = chrono::Duration::from_std(ctx.error_window)
            .map_err(|e| SensorError::failed("error-pattern", e.to_string()))?;
        let since = ctx.now - window;
        let count = ctx
            .recent_errors
            .iter()
            .filter(|o| o.kind == error.kind && o.at >= since)
            .count();

        if count < ctx.error_pattern_threshold {
            return Ok(None);
        }

        #[allow(clippy::cast_precision_loss)]
        let confidence = (0.6 + 0.1 * count as f64).min(0.95);
        Ok(Some(
            PatternDetection::new(
                ctx.component_id.clone(),
                PatternType::BreakingChange,
                format!("error '{}' occurred {count} times in the last window", error.kind),
                confidence,
            )
            .with_evidence("error_kind", json!(error.kind))
            .with_evidence("occurrences", json!(count))
            .with_evidence("last_message", json!(error.message))
            .with_suggested_action("add recovery handler for recurring error"),
        ))
    }
}
