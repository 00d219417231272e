//! Synthetic adaptation scenario
//!
//! Drives a controller with simulated components whose state triggers each
//! built-in sensor, then reports what the coordinator did.

use crate::controller::AdaptationController;
use crate::error::ControllerError;
use crate::health::AdaptiveHealth;
use async_trait::async_trait;
use cac_core::{
    AdaptationConfig, CapabilityLevel, CapabilitySummary, Component, ComponentId,
    FeatureSupport, HealthRecommendation, HealthSnapshot, HealthStatus, HookContext,
    InstrumentationPoint, NamedEvent, ObservedError, VersionInfo,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const NAMES: [&str; 6] = ["mcp", "a2a", "acp", "anp", "agora", "lmos"];

/// Scenario size
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Simulated components
    pub components: usize,
    /// Hook rounds per component
    pub rounds: usize,
    /// Approve every request still queued after the rounds
    pub approve_pending: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            components: 4,
            rounds: 3,
            approve_pending: true,
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub components: Vec<ComponentId>,
    pub rounds: usize,
    pub detections: usize,
    /// Unified events seen, by name
    pub events: BTreeMap<String, usize>,
    pub approved: usize,
    pub still_pending: usize,
    pub executions: usize,
    pub health: Vec<AdaptiveHealth>,
}

impl SimulationReport {
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.events.get(event).copied().unwrap_or(0)
    }
}

/// Which sensor a simulated component trips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    Deprecated,
    PartialSurface,
    Degraded,
    Outdated,
}

impl Profile {
    fn for_index(index: usize) -> Self {
        match index % 4 {
            0 => Profile::Deprecated,
            1 => Profile::PartialSurface,
            2 => Profile::Degraded,
            _ => Profile::Outdated,
        }
    }
}

struct SimulatedComponent {
    id: ComponentId,
    profile: Profile,
}

impl SimulatedComponent {
    fn new(index: usize) -> Self {
        let base = NAMES[index % NAMES.len()];
        let id = if index < NAMES.len() {
            base.to_string()
        } else {
            format!("{base}-{}", index / NAMES.len())
        };
        Self {
            id: ComponentId::new(id),
            profile: Profile::for_index(index),
        }
    }
}

#[async_trait]
impl Component for SimulatedComponent {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn capabilities(&self) -> CapabilitySummary {
        let partial = if self.profile == Profile::PartialSurface { 4 } else { 0 };
        (0..6).fold(CapabilitySummary::new(), |summary, i| {
            let support = if i < partial {
                FeatureSupport::Partial
            } else {
                FeatureSupport::Full
            };
            summary.with_feature(format!("feature-{i}"), support)
        })
    }

    async fn health(&self) -> HealthSnapshot {
        match self.profile {
            Profile::Degraded => HealthSnapshot::healthy()
                .with_status(HealthStatus::Degraded)
                .with_score(40.0)
                .with_errors(12)
                .with_recommendation(HealthRecommendation::Evaluate),
            _ => HealthSnapshot::healthy(),
        }
    }

    async fn version_info(&self) -> VersionInfo {
        match self.profile {
            Profile::Deprecated => VersionInfo::new("0.9.0").deprecated(),
            Profile::Outdated => VersionInfo::new("1.4.0").with_latest("1.5.0"),
            _ => VersionInfo::new("1.0.0").with_latest("1.0.0"),
        }
    }
}

/// Run the scenario on a fresh controller
///
/// Waits long enough for debounced reactions and a few drain cycles before
/// collecting the report, so wall time follows the configured delays.
///
/// # Errors
/// `Config` when `config` does not validate.
pub async fn run_simulation(
    config: AdaptationConfig,
    simulation: &SimulationConfig,
) -> Result<SimulationReport, ControllerError> {
    let settle = config.detection.auto_reaction_delay() + config.propagation.drain_interval() * 3;
    let drain = config.propagation.drain_interval() * 3;
    let controller = AdaptationController::new(config)?;
    let mut events = controller.events().subscribe();
    controller.start();

    let components: Vec<_> = (0..simulation.components)
        .map(|i| Arc::new(SimulatedComponent::new(i)))
        .collect();
    for component in &components {
        // recurring errors lead to structural migrations
        if component.profile == Profile::Degraded {
            controller
                .workflow()
                .register_capability(component.id.clone(), CapabilityLevel::Structural);
        }
        controller.instrument(Arc::clone(component) as Arc<dyn Component>);
    }
    tracing::info!(components = components.len(), rounds = simulation.rounds, "simulation started");

    let mut detections = 0;
    for round in 0..simulation.rounds {
        for component in &components {
            let context = HookContext::with_data(json!({ "round": round }));
            for point in [
                InstrumentationPoint::PreConversion,
                InstrumentationPoint::PostConversion,
            ] {
                detections += controller.run_hook(&component.id, point, &context).await.len();
            }
            if component.profile == Profile::Degraded {
                let error = HookContext::for_error(ObservedError::new("timeout", "upstream timed out"));
                detections += controller
                    .run_hook(&component.id, InstrumentationPoint::ErrorRecovery, &error)
                    .await
                    .len();
            }
        }
    }
    for component in components.iter().filter(|c| c.profile == Profile::Degraded) {
        controller.report_health(&component.id).await?;
    }
    tokio::time::sleep(settle).await;

    let mut approved = 0;
    if simulation.approve_pending {
        for request in controller.workflow().pending() {
            match controller.workflow().approve(request.id).await {
                Ok(_) => approved += 1,
                Err(error) => tracing::warn!(request = %request.id, %error, "approval failed"),
            }
        }
        tokio::time::sleep(drain).await;
    }

    let health = controller.adaptive_health_all().await;
    let still_pending = controller.workflow().pending().len();
    let executions = controller.workflow().execution_history().len();
    controller.shutdown().await;

    let mut counts = BTreeMap::new();
    while let Ok(event) = events.try_recv() {
        *counts.entry(event.name().to_string()).or_insert(0) += 1;
    }
    tracing::info!(detections, approved, executions, "simulation finished");

    Ok(SimulationReport {
        components: components.iter().map(|c| c.id.clone()).collect(),
        rounds: simulation.rounds,
        detections,
        events: counts,
        approved,
        still_pending,
        executions,
        health,
    })
}

/// Quick config for interactive runs: short reaction delay, auto-modify on
#[must_use]
pub fn fast_config(mut config: AdaptationConfig) -> AdaptationConfig {
    config.detection = config
        .detection
        .with_auto_reaction_delay(Duration::from_millis(200));
    config.controller = config.controller.with_auto_modify(true);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_past_the_table() {
        let ids: std::collections::BTreeSet<_> =
            (0..14).map(|i| SimulatedComponent::new(i).id).collect();
        assert_eq!(ids.len(), 14);
    }

    #[test]
    fn profiles_cycle() {
        assert_eq!(Profile::for_index(0), Profile::Deprecated);
        assert_eq!(Profile::for_index(6), Profile::Degraded);
    }
}
