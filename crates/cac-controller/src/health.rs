//! Adaptive health
//!
//! A component's own health snapshot merged with what the coordinator knows
//! about it: recent detections and the outcome of its modifications.

use cac_core::{ComponentId, HealthSnapshot, PatternDetection};
use cac_modification::{ExecutionStatus, ModificationExecution};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Detections per hour that saturate the detection half of the evolution score
pub const DETECTION_SATURATION: f64 = 10.0;

/// Completed modifications that saturate the modification half of the evolution score
pub const COMPLETION_SATURATION: f64 = 5.0;

/// What the coordinator is currently doing with a component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdaptationStatus {
    /// Nothing in flight or recent
    #[default]
    Idle,
    /// A request is queued, approved or executing
    Adapting,
    /// A rollback ran within the last hour
    Recovering,
    /// A modification completed within the last hour
    Evolving,
}

impl fmt::Display for AdaptationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdaptationStatus::Idle => "idle",
            AdaptationStatus::Adapting => "adapting",
            AdaptationStatus::Recovering => "recovering",
            AdaptationStatus::Evolving => "evolving",
        })
    }
}

/// Base health plus derived adaptation metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveHealth {
    pub component_id: ComponentId,
    pub base: HealthSnapshot,
    pub detections_last_hour: usize,
    /// Completed over total executions; 1.0 with no executions
    pub modification_success_rate: f64,
    pub rollback_count: usize,
    /// In [0, 1]
    pub evolution_score: f64,
    pub status: AdaptationStatus,
    pub checked_at: DateTime<Utc>,
}

impl AdaptiveHealth {
    /// Derive from the component's recent detections and its executions
    ///
    /// `detections` may contain older entries; only the last hour counts.
    #[must_use]
    pub fn derive(
        component_id: ComponentId,
        base: HealthSnapshot,
        detections: &[PatternDetection],
        executions: &[ModificationExecution],
        has_active_request: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let hour_ago = now - Duration::hours(1);
        let detections_last_hour = detections
            .iter()
            .filter(|d| d.timestamp >= hour_ago)
            .count();

        let completed = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let modification_success_rate = if executions.is_empty() {
            1.0
        } else {
            completed as f64 / executions.len() as f64
        };
        let rollback_count = executions.iter().filter(|e| e.rollback_performed).count();

        #[allow(clippy::cast_precision_loss)]
        let evolution_score = 0.5 * (detections_last_hour as f64 / DETECTION_SATURATION).min(1.0)
            + 0.5 * (completed as f64 / COMPLETION_SATURATION).min(1.0);

        let finished_recently =
            |e: &&ModificationExecution| e.finished_at.is_some_and(|at| at >= hour_ago);
        let status = if has_active_request {
            AdaptationStatus::Adapting
        } else if executions
            .iter()
            .filter(finished_recently)
            .any(|e| e.rollback_performed)
        {
            AdaptationStatus::Recovering
        } else if executions
            .iter()
            .filter(finished_recently)
            .any(|e| e.status == ExecutionStatus::Completed)
        {
            AdaptationStatus::Evolving
        } else {
            AdaptationStatus::Idle
        };

        Self {
            component_id,
            base,
            detections_last_hour,
            modification_success_rate,
            rollback_count,
            evolution_score,
            status,
            checked_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cac_core::{CapabilityLevel, ModificationConfig, PatternType};
    use cac_modification::{
        ChangeOperation, ModificationChange, ModificationRequest, ModificationType,
        ModificationWorkflow, RequestOutcome,
    };
    use pretty_assertions::assert_eq;

    fn detection_at(at: DateTime<Utc>) -> PatternDetection {
        PatternDetection::new("mcp".into(), PatternType::Enhancement, "d", 0.8).at(at)
    }

    async fn completed_execution() -> ModificationExecution {
        let workflow = ModificationWorkflow::new(ModificationConfig::default());
        workflow.register_capability("mcp", CapabilityLevel::Full);
        let request = ModificationRequest::new("mcp", ModificationType::TypeUpdate, "t")
            .with_change(ModificationChange::new("types.a", ChangeOperation::Add))
            .with_approval_required(false);
        match workflow.request_modification(request).await {
            Ok(RequestOutcome::Executed(execution)) => execution,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn no_history_is_idle_and_perfect() {
        let health = AdaptiveHealth::derive(
            "mcp".into(),
            HealthSnapshot::healthy(),
            &[],
            &[],
            false,
            Utc::now(),
        );
        assert_eq!(health.status, AdaptationStatus::Idle);
        assert_eq!(health.modification_success_rate, 1.0);
        assert_eq!(health.evolution_score, 0.0);
    }

    #[test]
    fn only_last_hour_detections_count() {
        let now = Utc::now();
        let detections = vec![
            detection_at(now - Duration::minutes(5)),
            detection_at(now - Duration::minutes(59)),
            detection_at(now - Duration::minutes(90)),
        ];
        let health = AdaptiveHealth::derive(
            "mcp".into(),
            HealthSnapshot::healthy(),
            &detections,
            &[],
            false,
            now,
        );
        assert_eq!(health.detections_last_hour, 2);
        assert!((health.evolution_score - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn status_priority_is_adapting_recovering_evolving() {
        let now = Utc::now();
        let completed = completed_execution().await;
        let mut rolled_back = completed.clone();
        rolled_back.rollback_performed = true;
        rolled_back.status = ExecutionStatus::RolledBack;

        let derive = |executions: &[ModificationExecution], active: bool| {
            AdaptiveHealth::derive(
                "mcp".into(),
                HealthSnapshot::healthy(),
                &[],
                executions,
                active,
                now,
            )
        };

        assert_eq!(derive(&[completed.clone()], false).status, AdaptationStatus::Evolving);
        assert_eq!(
            derive(&[completed.clone(), rolled_back.clone()], false).status,
            AdaptationStatus::Recovering
        );
        assert_eq!(
            derive(&[completed.clone(), rolled_back.clone()], true).status,
            AdaptationStatus::Adapting
        );

        let mixed = derive(&[completed, rolled_back], false);
        assert_eq!(mixed.modification_success_rate, 0.5);
        assert_eq!(mixed.rollback_count, 1);
    }

    #[tokio::test]
    async fn completion_volume_saturates() {
        let execution = completed_execution().await;
        let executions = vec![execution; 8];
        let health = AdaptiveHealth::derive(
            "mcp".into(),
            HealthSnapshot::healthy(),
            &[],
            &executions,
            false,
            Utc::now(),
        );
        assert!((health.evolution_score - 0.5).abs() < 1e-9);
    }
}
