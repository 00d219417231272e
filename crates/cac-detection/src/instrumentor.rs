//! Detection instrumentor
//!
//! Owns the per-component sensor registry, the bounded detection history and
//! the error-observation log. Sensor checks never fail as a whole: each
//! sensor runs in isolation and its failure is reported as an event.

use crate::error::SensorError;
use crate::events::DetectionEvent;
use crate::history::{DetectionHistory, ErrorLog, ErrorObservation};
use crate::sensors::{builtin_sensors, Sensor, SensorContext, SensorKind};
use cac_core::{
    Component, ComponentId, DetectionConfig, EventStream, HookContext, InstrumentationPoint,
    PatternDetection, PatternType,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

#[derive(Clone)]
struct InstalledSensor {
    sensor: Arc<dyn Sensor>,
    enabled: bool,
}

type ReactionKey = (ComponentId, PatternType);

/// Runs sensors at instrumentation points and records qualifying detections
pub struct DetectionInstrumentor {
    config: DetectionConfig,
    sensors: RwLock<HashMap<ComponentId, Vec<InstalledSensor>>>,
    history: Mutex<DetectionHistory>,
    errors: Mutex<ErrorLog>,
    events: EventStream<DetectionEvent>,
    /// Latest scheduled reaction per (component, pattern type)
    reactions: Arc<Mutex<HashMap<ReactionKey, u64>>>,
}

impl std::fmt::Debug for DetectionInstrumentor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionInstrumentor")
            .field("config", &self.config)
            .field("components", &self.sensors.read().len())
            .field("history_len", &self.history.lock().len())
            .finish_non_exhaustive()
    }
}

impl DetectionInstrumentor {
    /// Create an instrumentor
    #[must_use]
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            history: Mutex::new(DetectionHistory::new(config.max_history)),
            errors: Mutex::new(ErrorLog::new(
                config.max_error_observations,
                config.error_window(),
            )),
            sensors: RwLock::new(HashMap::new()),
            events: EventStream::new("detection"),
            reactions: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Event stream (`pattern-detected`, `auto-reaction`, `sensor-failed`)
    #[must_use]
    pub fn events(&self) -> &EventStream<DetectionEvent> {
        &self.events
    }

    /// Install the four built-in sensors for a component
    ///
    /// Re-installing replaces the component's sensor set. Returns the number
    /// of sensors installed.
    pub fn install_sensors(&self, component: &dyn Component) -> usize {
        let id = component.id();
        let installed: Vec<_> = builtin_sensors()
            .into_iter()
            .map(|sensor| InstalledSensor {
                sensor,
                enabled: true,
            })
            .collect();
        let count = installed.len();
        self.sensors.write().insert(id.clone(), installed);
        tracing::info!(component = %id, sensors = count, "sensors installed");
        count
    }

    /// Add a single sensor for a component
    pub fn install_sensor(&self, component_id: &ComponentId, sensor: Arc<dyn Sensor>) {
        tracing::debug!(component = %component_id, sensor = %sensor.kind(), "sensor added");
        self.sensors
            .write()
            .entry(component_id.clone())
            .or_default()
            .push(InstalledSensor {
                sensor,
                enabled: true,
            });
    }

    /// Remove every sensor and error observation for a component
    pub fn uninstall(&self, component_id: &ComponentId) -> bool {
        self.errors.lock().remove(component_id);
        self.sensors.write().remove(component_id).is_some()
    }

    /// Enable or disable sensors of one kind; returns whether any matched
    pub fn set_sensor_enabled(
        &self,
        component_id: &ComponentId,
        kind: &SensorKind,
        enabled: bool,
    ) -> bool {
        let mut sensors = self.sensors.write();
        let Some(installed) = sensors.get_mut(component_id) else {
            return false;
        };
        let mut matched = false;
        for entry in installed.iter_mut().filter(|s| &s.sensor.kind() == kind) {
            entry.enabled = enabled;
            matched = true;
        }
        matched
    }

    /// Installed sensors and their enabled flag
    #[must_use]
    pub fn sensors_for(&self, component_id: &ComponentId) -> Vec<(SensorKind, bool)> {
        self.sensors
            .read()
            .get(component_id)
            .map(|installed| {
                installed
                    .iter()
                    .map(|s| (s.sensor.kind(), s.enabled))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether sensors are installed for a component
    #[must_use]
    pub fn is_installed(&self, component_id: &ComponentId) -> bool {
        self.sensors.read().contains_key(component_id)
    }

    /// Run every enabled sensor registered for `point`
    ///
    /// Returns the detections that cleared the confidence threshold; those
    /// are also recorded and emitted. Detections at the error-recovery point
    /// schedule a debounced auto-reaction.
    pub async fn run_sensor_check(
        &self,
        component: &dyn Component,
        point: InstrumentationPoint,
        hook: &HookContext,
    ) -> Vec<PatternDetection> {
        let id = component.id();
        let active: Vec<Arc<dyn Sensor>> = self
            .sensors
            .read()
            .get(&id)
            .map(|installed| {
                installed
                    .iter()
                    .filter(|s| s.enabled && s.sensor.points().contains(&point))
                    .map(|s| Arc::clone(&s.sensor))
                    .collect()
            })
            .unwrap_or_default();

        if point == InstrumentationPoint::ErrorRecovery {
            if let Some(error) = &hook.error {
                self.errors.lock().record(
                    &id,
                    ErrorObservation {
                        kind: error.kind.clone(),
                        message: error.message.clone(),
                        at: Utc::now(),
                    },
                );
            }
        }

        if active.is_empty() {
            tracing::debug!(component = %id, point = %point, "no sensors for point");
            return Vec::new();
        }

        let capabilities = component.capabilities().await;
        let health = component.health().await;
        let version = component.version_info().await;
        let recent_errors = self.errors.lock().for_component(&id);

        let ctx = SensorContext {
            component_id: &id,
            point,
            hook,
            capabilities: &capabilities,
            health: &health,
            version: &version,
            recent_errors: &recent_errors,
            error_window: self.config.error_window(),
            error_pattern_threshold: self.config.error_pattern_threshold,
            now: Utc::now(),
        };

        let mut qualifying = Vec::new();
        for sensor in active {
            let kind = sensor.kind();
            let outcome = AssertUnwindSafe(sensor.probe(&ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(SensorError::Panicked {
                        sensor: kind.to_string(),
                    })
                });

            match outcome {
                Ok(Some(detection)) => {
                    if !detection.meets(self.config.confidence_threshold) {
                        tracing::debug!(
                            component = %id,
                            sensor = %kind,
                            confidence = detection.confidence,
                            "detection below threshold discarded"
                        );
                        continue;
                    }
                    self.record(detection.clone(), point);
                    qualifying.push(detection);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(component = %id, sensor = %kind, %error, "sensor failed");
                    self.events.emit(DetectionEvent::SensorFailed {
                        component_id: id.clone(),
                        sensor: kind,
                        error: error.to_string(),
                    });
                }
            }
        }
        qualifying
    }

    fn record(&self, detection: PatternDetection, point: InstrumentationPoint) {
        tracing::info!(
            component = %detection.component_id,
            pattern = %detection.pattern_type,
            confidence = detection.confidence,
            point = %point,
            "pattern detected"
        );
        self.history.lock().push(detection.clone());
        if point == InstrumentationPoint::ErrorRecovery {
            self.schedule_auto_reaction(detection.clone());
        }
        self.events
            .emit(DetectionEvent::PatternDetected { detection, point });
    }

    /// Emit `auto-reaction` after the configured delay unless a newer
    /// detection for the same component and pattern type supersedes it
    fn schedule_auto_reaction(&self, detection: PatternDetection) {
        let key = (detection.component_id.clone(), detection.pattern_type);
        let generation = {
            let mut reactions = self.reactions.lock();
            let slot = reactions.entry(key.clone()).or_insert(0);
            *slot += 1;
            *slot
        };

        let reactions = Arc::clone(&self.reactions);
        let events = self.events.clone();
        let delay = self.config.auto_reaction_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut reactions = reactions.lock();
                if reactions.get(&key) == Some(&generation) {
                    reactions.remove(&key);
                    true
                } else {
                    false
                }
            };
            if current {
                events.emit(DetectionEvent::AutoReaction { detection });
            } else {
                tracing::debug!(component = %key.0, pattern = %key.1, "auto-reaction superseded");
            }
        });
    }

    /// Whole detection history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<PatternDetection> {
        self.history.lock().snapshot()
    }

    /// Detection history for one component
    #[must_use]
    pub fn history_for(&self, component_id: &ComponentId) -> Vec<PatternDetection> {
        self.history.lock().for_component(component_id)
    }

    /// Detection history of one pattern type
    #[must_use]
    pub fn history_of_type(&self, pattern_type: PatternType) -> Vec<PatternDetection> {
        self.history.lock().of_type(pattern_type)
    }

    /// Number of retained detections
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Count detections at or after `since`
    #[must_use]
    pub fn detections_since(
        &self,
        component_id: Option<&ComponentId>,
        since: DateTime<Utc>,
    ) -> usize {
        self.history.lock().count_since(component_id, since)
    }

    /// Error observations for a component, oldest first
    #[must_use]
    pub fn error_observations(&self, component_id: &ComponentId) -> Vec<ErrorObservation> {
        self.errors.lock().for_component(component_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cac_core::{ObservedError, VersionInfo};
    use cac_test_utils::MockComponent;
    use std::time::Duration;

    struct FixedSensor {
        confidence: f64,
        points: Vec<InstrumentationPoint>,
    }

    #[async_trait]
    impl Sensor for FixedSensor {
        fn kind(&self) -> SensorKind {
            SensorKind::Custom("fixed".into())
        }

        fn points(&self) -> &[InstrumentationPoint] {
            &self.points
        }

        async fn probe(
            &self,
            ctx: &SensorContext<'_>,
        ) -> Result<Option<PatternDetection>, SensorError> {
            Ok(Some(PatternDetection::new(
                ctx.component_id.clone(),
                PatternType::Optimization,
                "fixed",
                self.confidence,
            )))
        }
    }

    struct PanickingSensor;

    #[async_trait]
    impl Sensor for PanickingSensor {
        fn kind(&self) -> SensorKind {
            SensorKind::Custom("panics".into())
        }

        fn points(&self) -> &[InstrumentationPoint] {
            &[InstrumentationPoint::PreConversion]
        }

        async fn probe(
            &self,
            _ctx: &SensorContext<'_>,
        ) -> Result<Option<PatternDetection>, SensorError> {
            panic!("probe exploded");
        }
    }

    struct FailingSensor;

    #[async_trait]
    impl Sensor for FailingSensor {
        fn kind(&self) -> SensorKind {
            SensorKind::Custom("fails".into())
        }

        fn points(&self) -> &[InstrumentationPoint] {
            &[InstrumentationPoint::PreConversion]
        }

        async fn probe(
            &self,
            _ctx: &SensorContext<'_>,
        ) -> Result<Option<PatternDetection>, SensorError> {
            Err(SensorError::failed("fails", "registry unreachable"))
        }
    }

    fn fixed(confidence: f64) -> Arc<dyn Sensor> {
        Arc::new(FixedSensor {
            confidence,
            points: vec![
                InstrumentationPoint::PreConversion,
                InstrumentationPoint::ErrorRecovery,
            ],
        })
    }

    #[tokio::test]
    async fn detection_below_threshold_is_discarded() {
        let instrumentor = DetectionInstrumentor::new(DetectionConfig::default());
        let mut events = instrumentor.events().subscribe();
        let component = MockComponent::new("mcp");
        instrumentor.install_sensor(&component.id(), fixed(0.5));

        let found = instrumentor
            .run_sensor_check(&component, InstrumentationPoint::PreConversion, &HookContext::default())
            .await;

        assert!(found.is_empty());
        assert_eq!(instrumentor.history_len(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failing_and_panicking_sensors_do_not_block_others() {
        let instrumentor = DetectionInstrumentor::new(DetectionConfig::default());
        let mut events = instrumentor.events().subscribe();
        let component = MockComponent::new("mcp");
        let id = component.id();
        instrumentor.install_sensor(&id, Arc::new(PanickingSensor));
        instrumentor.install_sensor(&id, Arc::new(FailingSensor));
        instrumentor.install_sensor(&id, fixed(0.9));

        let found = instrumentor
            .run_sensor_check(&component, InstrumentationPoint::PreConversion, &HookContext::default())
            .await;
        assert_eq!(found.len(), 1);

        let names: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| cac_core::NamedEvent::name(&e))
            .collect();
        assert_eq!(names, vec!["sensor-failed", "sensor-failed", "pattern-detected"]);
    }

    #[tokio::test]
    async fn disabled_sensors_are_skipped() {
        let instrumentor = DetectionInstrumentor::new(DetectionConfig::default());
        let component =
            MockComponent::new("mcp").with_version(VersionInfo::new("1.0.0").deprecated());
        instrumentor.install_sensors(&component);
        assert!(instrumentor.set_sensor_enabled(&component.id(), &SensorKind::Version, false));

        let found = instrumentor
            .run_sensor_check(&component, InstrumentationPoint::PreConversion, &HookContext::default())
            .await;
        assert!(found.is_empty());
        assert!(instrumentor
            .sensors_for(&component.id())
            .contains(&(SensorKind::Version, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_reaction_is_debounced() {
        let config = DetectionConfig::default().with_auto_reaction_delay(Duration::from_millis(100));
        let instrumentor = DetectionInstrumentor::new(config);
        let mut events = instrumentor.events().subscribe();
        let component = MockComponent::new("mcp");
        instrumentor.install_sensor(&component.id(), fixed(0.9));
        let hook = HookContext::for_error(ObservedError::new("timeout", "slow"));

        instrumentor
            .run_sensor_check(&component, InstrumentationPoint::ErrorRecovery, &hook)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        instrumentor
            .run_sensor_check(&component, InstrumentationPoint::ErrorRecovery, &hook)
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let reactions = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, DetectionEvent::AutoReaction { .. }))
            .count();
        assert_eq!(reactions, 1);
        assert_eq!(instrumentor.error_observations(&component.id()).len(), 2);
    }

    #[tokio::test]
    async fn pre_conversion_detections_do_not_react() {
        let config = DetectionConfig::default().with_auto_reaction_delay(Duration::ZERO);
        let instrumentor = DetectionInstrumentor::new(config);
        let mut events = instrumentor.events().subscribe();
        let component = MockComponent::new("mcp");
        instrumentor.install_sensor(&component.id(), fixed(0.9));

        instrumentor
            .run_sensor_check(&component, InstrumentationPoint::PreConversion, &HookContext::default())
            .await;
        tokio::task::yield_now().await;

        let names: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| cac_core::NamedEvent::name(&e))
            .collect();
        assert_eq!(names, vec!["pattern-detected"]);
    }

    #[tokio::test]
    async fn uninstall_forgets_component() {
        let instrumentor = DetectionInstrumentor::new(DetectionConfig::default());
        let component = MockComponent::new("mcp");
        assert_eq!(instrumentor.install_sensors(&component), 4);
        assert!(instrumentor.uninstall(&component.id()));
        assert!(!instrumentor.is_installed(&component.id()));
    }
}
