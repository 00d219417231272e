//! The adaptation controller
//!
//! Owns one detection instrumentor, one propagation bus and one modification
//! workflow, and connects them:
//!
//! - detections are broadcast as `pattern-detected` (when `auto_propagate`)
//! - auto-reactions become modification requests (when `auto_modify`)
//! - completed modifications are broadcast as `adaptation`
//!
//! Every layer's events, plus the controller's own, are re-emitted on one
//! [`AdaptationEvent`] stream.

use crate::error::ControllerError;
use crate::events::{AdaptationEvent, ControllerEvent};
use crate::health::AdaptiveHealth;
use crate::reaction::request_for;
use async_trait::async_trait;
use cac_core::{
    AdaptationConfig, CapabilityLevel, Component, ComponentId, EventStream, HealthRecommendation,
    HookContext, HookOutcome, InstrumentationPoint, MessageId, NamedEvent, PatternDetection,
};
use cac_detection::{DetectionEvent, DetectionInstrumentor};
use cac_modification::{ModificationWorkflow, WorkflowEvent};
use cac_propagation::{
    BusEvent, ChangeHandler, DispatchError, PropagateOptions, PropagationBus,
    PropagationMessage, Subscription, SubscriptionId,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Change type of detection broadcasts
pub const PATTERN_DETECTED: &str = "pattern-detected";
/// Change type of completed-modification broadcasts
pub const ADAPTATION: &str = "adaptation";
/// Change type of health broadcasts
pub const HEALTH_CHANGE: &str = "health-change";

struct Instrumented {
    component: Arc<dyn Component>,
    subscription: SubscriptionId,
}

/// Composes detection, propagation and modification
pub struct AdaptationController {
    config: AdaptationConfig,
    detection: DetectionInstrumentor,
    bus: Arc<PropagationBus>,
    workflow: Arc<ModificationWorkflow>,
    components: DashMap<ComponentId, Instrumented>,
    last_health_propagation: Mutex<HashMap<ComponentId, Instant>>,
    events: EventStream<AdaptationEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for AdaptationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptationController")
            .field("components", &self.components.len())
            .field("running", &!self.tasks.lock().is_empty())
            .finish_non_exhaustive()
    }
}

impl AdaptationController {
    /// Controller with a bookkeeping-only modification workflow
    ///
    /// # Errors
    /// `Config` when the configuration does not validate.
    pub fn new(config: AdaptationConfig) -> Result<Arc<Self>, ControllerError> {
        let workflow = ModificationWorkflow::new(config.modification.clone());
        Self::with_workflow(config, workflow)
    }

    /// Controller around a caller-built workflow (custom appliers, rollback executors)
    ///
    /// The workflow keeps its own modification settings.
    ///
    /// # Errors
    /// `Config` when the configuration does not validate.
    pub fn with_workflow(
        config: AdaptationConfig,
        workflow: ModificationWorkflow,
    ) -> Result<Arc<Self>, ControllerError> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            detection: DetectionInstrumentor::new(config.detection.clone()),
            bus: Arc::new(PropagationBus::new(config.propagation.clone())),
            workflow: Arc::new(workflow),
            components: DashMap::new(),
            last_health_propagation: Mutex::new(HashMap::new()),
            events: EventStream::new("controller"),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            config,
        }))
    }

    #[must_use]
    pub fn config(&self) -> &AdaptationConfig {
        &self.config
    }

    #[must_use]
    pub fn detection(&self) -> &DetectionInstrumentor {
        &self.detection
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<PropagationBus> {
        &self.bus
    }

    #[must_use]
    pub fn workflow(&self) -> &Arc<ModificationWorkflow> {
        &self.workflow
    }

    /// Unified event stream
    #[must_use]
    pub fn events(&self) -> &EventStream<AdaptationEvent> {
        &self.events
    }

    /// Spawn the wiring task and the bus drain loop; no-op when already running
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        self.shutdown.send_replace(false);

        let detections = self.detection.events().subscribe();
        let bus_events = self.bus.events().subscribe();
        let workflow_events = self.workflow.events().subscribe();
        tasks.push(tokio::spawn(wire(
            Arc::downgrade(self),
            detections,
            bus_events,
            workflow_events,
            self.shutdown.subscribe(),
        )));
        tasks.push(self.bus.spawn_drain_loop(self.shutdown.subscribe()));
        tracing::info!("adaptation controller started");
    }

    /// Stop background tasks and close the workflow to new executions
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.workflow.close();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(error) = result {
                tracing::warn!(%error, "controller task ended abnormally");
            }
        }
        tracing::info!("adaptation controller stopped");
    }

    /// Bring a component under adaptation
    ///
    /// Installs the built-in sensors, subscribes the component to the bus and
    /// grants the default capability unless one is already registered.
    /// Instrumenting again replaces the previous sensors and subscription.
    /// Returns the number of sensors installed.
    pub fn instrument(self: &Arc<Self>, component: Arc<dyn Component>) -> usize {
        let id = component.id();
        let sensors = self.detection.install_sensors(component.as_ref());

        if self.workflow.capability_of(&id) == CapabilityLevel::None {
            self.workflow
                .register_capability(id.clone(), self.config.controller.default_capability);
        }
        let capability = self.workflow.capability_of(&id);

        let handler = Arc::new(ControllerHandler {
            controller: Arc::downgrade(self),
            component_id: id.clone(),
        });
        let subscription = self.bus.subscribe(Subscription::new(id.clone(), handler));
        if let Some(previous) = self.components.insert(
            id.clone(),
            Instrumented {
                component,
                subscription,
            },
        ) {
            self.bus.unsubscribe(&id, previous.subscription);
        }

        tracing::info!(component = %id, sensors, %capability, "component instrumented");
        self.emit(ControllerEvent::AdapterInstrumented {
            component_id: id,
            sensors,
            capability,
        });
        sensors
    }

    /// Remove sensors and the bus subscription; capabilities and history stay
    pub fn uninstrument(&self, component_id: &ComponentId) -> bool {
        let Some((_, instrumented)) = self.components.remove(component_id) else {
            return false;
        };
        self.detection.uninstall(component_id);
        self.bus.unsubscribe(component_id, instrumented.subscription);
        tracing::info!(component = %component_id, "component uninstrumented");
        true
    }

    /// Instrumented component ids, sorted
    #[must_use]
    pub fn instrumented_components(&self) -> Vec<ComponentId> {
        let mut ids: Vec<_> = self.components.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Pre-conversion hook: runs sensors and passes the payload through
    pub async fn pre_conversion(&self, component_id: &ComponentId, context: HookContext) -> HookOutcome {
        self.run_hook(component_id, InstrumentationPoint::PreConversion, &context)
            .await;
        HookOutcome::passed(context.data)
    }

    /// Post-conversion hook: runs sensors and passes the payload through
    pub async fn post_conversion(&self, component_id: &ComponentId, context: HookContext) -> HookOutcome {
        self.run_hook(component_id, InstrumentationPoint::PostConversion, &context)
            .await;
        HookOutcome::passed(context.data)
    }

    /// Error-recovery hook: records the error and runs sensors; never recovers
    pub async fn error_recovery(&self, component_id: &ComponentId, context: HookContext) -> HookOutcome {
        self.run_hook(component_id, InstrumentationPoint::ErrorRecovery, &context)
            .await;
        HookOutcome::not_recovered()
    }

    /// Run the sensors of an instrumented component at `point`
    ///
    /// Unknown components yield no detections; the host pipeline is never blocked.
    pub async fn run_hook(
        &self,
        component_id: &ComponentId,
        point: InstrumentationPoint,
        context: &HookContext,
    ) -> Vec<PatternDetection> {
        let component = self
            .components
            .get(component_id)
            .map(|e| Arc::clone(&e.component));
        let Some(component) = component else {
            tracing::debug!(component = %component_id, %point, "hook for uninstrumented component");
            return Vec::new();
        };
        self.detection
            .run_sensor_check(component.as_ref(), point, context)
            .await
    }

    /// Broadcast a component's current health as `health-change`
    ///
    /// # Errors
    /// `NotInstrumented` for unknown components.
    pub async fn report_health(&self, component_id: &ComponentId) -> Result<MessageId, ControllerError> {
        let component = self.component(component_id)?;
        let health = component.health().await;
        self.last_health_propagation
            .lock()
            .insert(component_id.clone(), Instant::now());
        self.broadcast(component_id, HEALTH_CHANGE, json!(health))
    }

    /// React to a bus message delivered to `receiver`
    ///
    /// - `adaptation`: re-emitted as `adaptation-observed`
    /// - `health-change`: the receiver re-broadcasts its own health when it
    ///   recommends evaluation, at most once per re-propagation interval
    /// - `pattern-detected`: re-emitted as `related-pattern`
    ///
    /// A component never reacts to its own messages.
    ///
    /// # Errors
    /// `NotInstrumented` for unknown receivers, `Bus` when re-propagation fails.
    pub async fn handle_propagated_change(
        &self,
        receiver: &ComponentId,
        message: &PropagationMessage,
    ) -> Result<(), ControllerError> {
        if &message.source == receiver {
            return Ok(());
        }
        match message.change_type.as_str() {
            ADAPTATION => {
                tracing::debug!(component = %receiver, source = %message.source, "adaptation observed");
                self.emit(ControllerEvent::AdaptationObserved {
                    component_id: receiver.clone(),
                    message: message.clone(),
                });
            }
            HEALTH_CHANGE => {
                let component = self.component(receiver)?;
                let health = component.health().await;
                if health.recommendation != HealthRecommendation::Evaluate {
                    return Ok(());
                }
                if !self.claim_health_slot(receiver) {
                    tracing::debug!(component = %receiver, "health re-propagation suppressed");
                    return Ok(());
                }
                tracing::info!(component = %receiver, score = health.score, "re-propagating degraded health");
                self.broadcast(receiver, HEALTH_CHANGE, json!(health))?;
            }
            PATTERN_DETECTED => {
                match serde_json::from_value::<PatternDetection>(message.payload.clone()) {
                    Ok(detection) => self.emit(ControllerEvent::RelatedPattern {
                        component_id: receiver.clone(),
                        detection: Box::new(detection),
                    }),
                    Err(error) => {
                        tracing::warn!(component = %receiver, %error, "malformed pattern-detected payload");
                    }
                }
            }
            other => {
                tracing::trace!(component = %receiver, change_type = other, "change type ignored");
            }
        }
        Ok(())
    }

    /// Adaptive health of one component
    ///
    /// # Errors
    /// `NotInstrumented` for unknown components.
    pub async fn adaptive_health(&self, component_id: &ComponentId) -> Result<AdaptiveHealth, ControllerError> {
        let component = self.component(component_id)?;
        let base = component.health().await;
        let now = Utc::now();
        let detections = self.detection.history_for(component_id);
        let executions = self.workflow.executions_for(component_id);
        Ok(AdaptiveHealth::derive(
            component_id.clone(),
            base,
            &detections,
            &executions,
            self.workflow.has_active_request(component_id),
            now,
        ))
    }

    /// Adaptive health of every instrumented component, sorted by id
    pub async fn adaptive_health_all(&self) -> Vec<AdaptiveHealth> {
        let mut all = Vec::new();
        for id in self.instrumented_components() {
            match self.adaptive_health(&id).await {
                Ok(health) => all.push(health),
                // uninstrumented concurrently
                Err(ControllerError::NotInstrumented(_)) => {}
                Err(error) => tracing::warn!(component = %id, %error, "adaptive health unavailable"),
            }
        }
        all
    }

    fn component(&self, component_id: &ComponentId) -> Result<Arc<dyn Component>, ControllerError> {
        self.components
            .get(component_id)
            .map(|e| Arc::clone(&e.component))
            .ok_or_else(|| ControllerError::NotInstrumented(component_id.clone()))
    }

    fn claim_health_slot(&self, component_id: &ComponentId) -> bool {
        let interval = self.config.controller.health_repropagate_interval();
        let now = Instant::now();
        let mut last = self.last_health_propagation.lock();
        match last.get(component_id) {
            Some(at) if now.duration_since(*at) < interval => false,
            _ => {
                last.insert(component_id.clone(), now);
                true
            }
        }
    }

    fn broadcast(
        &self,
        source: &ComponentId,
        change_type: &str,
        payload: serde_json::Value,
    ) -> Result<MessageId, ControllerError> {
        let message_id = self.bus.propagate(
            change_type,
            payload,
            PropagateOptions::broadcast().from_source(source.clone()),
        )?;
        self.emit(ControllerEvent::AdaptationPropagated {
            message_id,
            component_id: source.clone(),
            change_type: change_type.to_string(),
        });
        Ok(message_id)
    }

    fn emit(&self, event: impl Into<AdaptationEvent>) {
        let event = event.into();
        tracing::debug!(event = event.name(), "adaptation event");
        self.events.emit(event);
    }

    fn on_detection(&self, event: &DetectionEvent) {
        match event {
            DetectionEvent::PatternDetected { detection, .. } if self.config.controller.auto_propagate => {
                if let Err(error) =
                    self.broadcast(&detection.component_id, PATTERN_DETECTED, json!(detection))
                {
                    tracing::warn!(component = %detection.component_id, %error, "detection not propagated");
                }
            }
            DetectionEvent::AutoReaction { detection } if self.config.controller.auto_modify => {
                let request = request_for(detection, self.config.controller.require_approval);
                let workflow = Arc::clone(&self.workflow);
                tokio::spawn(async move {
                    let component = request.component_id.clone();
                    if let Err(error) = workflow.request_modification(request).await {
                        tracing::warn!(%component, %error, "auto-reaction request not accepted");
                    }
                });
            }
            _ => {}
        }
    }

    fn on_workflow(&self, event: &WorkflowEvent) {
        if let WorkflowEvent::ModificationCompleted {
            modification_type,
            execution,
        } = event
        {
            let payload = json!({
                "request_id": execution.request_id.to_string(),
                "modification_type": modification_type,
                "changes_applied": execution.changes_applied,
            });
            if let Err(error) = self.broadcast(&execution.component_id, ADAPTATION, payload) {
                tracing::warn!(component = %execution.component_id, %error, "adaptation not propagated");
            }
        }
    }
}

/// Forward layer events to the unified stream and apply the reactions
async fn wire(
    controller: Weak<AdaptationController>,
    mut detections: mpsc::UnboundedReceiver<DetectionEvent>,
    mut bus_events: mpsc::UnboundedReceiver<BusEvent>,
    mut workflow_events: mpsc::UnboundedReceiver<WorkflowEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event: AdaptationEvent = tokio::select! {
            Some(event) = detections.recv() => event.into(),
            Some(event) = bus_events.recv() => event.into(),
            Some(event) = workflow_events.recv() => event.into(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            else => break,
        };
        let Some(controller) = controller.upgrade() else {
            break;
        };
        match &event {
            AdaptationEvent::Detection(e) => controller.on_detection(e),
            AdaptationEvent::Workflow(e) => controller.on_workflow(e),
            AdaptationEvent::Bus(_) | AdaptationEvent::Controller(_) => {}
        }
        controller.emit(event);
    }
    tracing::debug!("wiring task stopped");
}

/// Bus subscription of an instrumented component
struct ControllerHandler {
    controller: Weak<AdaptationController>,
    component_id: ComponentId,
}

#[async_trait]
impl ChangeHandler for ControllerHandler {
    async fn handle(&self, message: &PropagationMessage) -> Result<(), DispatchError> {
        let Some(controller) = self.controller.upgrade() else {
            return Ok(());
        };
        controller
            .handle_propagated_change(&self.component_id, message)
            .await
            .map_err(|e| DispatchError::handler(self.component_id.clone(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cac_core::{ControllerConfig, HealthSnapshot, PatternType, VersionInfo};
    use cac_propagation::Channel;
    use cac_test_utils::{drain_events, MockComponent};
    use pretty_assertions::assert_eq;

    fn controller(controller: ControllerConfig) -> Arc<AdaptationController> {
        AdaptationController::new(AdaptationConfig::new().with_controller(controller)).unwrap()
    }

    fn message(source: &str, change_type: &str, payload: serde_json::Value) -> PropagationMessage {
        PropagationMessage {
            id: MessageId::new(),
            timestamp: Utc::now(),
            channel: Channel::Broadcast,
            source: source.into(),
            targets: cac_propagation::Targets::All,
            change_type: change_type.into(),
            payload,
            priority: 5,
            ttl_ms: 60_000,
            requires_ack: false,
        }
    }

    #[tokio::test]
    async fn instrument_grants_default_capability_once() {
        let ctl = controller(ControllerConfig::default());
        ctl.workflow().register_capability("a2a", CapabilityLevel::Full);

        assert_eq!(ctl.instrument(Arc::new(MockComponent::new("mcp"))), 4);
        ctl.instrument(Arc::new(MockComponent::new("a2a")));

        assert_eq!(ctl.workflow().capability_of(&"mcp".into()), CapabilityLevel::Behavior);
        assert_eq!(ctl.workflow().capability_of(&"a2a".into()), CapabilityLevel::Full);
        assert_eq!(
            ctl.instrumented_components(),
            vec![ComponentId::new("a2a"), ComponentId::new("mcp")]
        );
        assert_eq!(ctl.bus().subscriber_count(), 2);
    }

    #[tokio::test]
    async fn reinstrument_replaces_subscription() {
        let ctl = controller(ControllerConfig::default());
        ctl.instrument(Arc::new(MockComponent::new("mcp")));
        ctl.instrument(Arc::new(MockComponent::new("mcp")));
        assert_eq!(ctl.bus().subscriptions_of(&"mcp".into()), 1);

        assert!(ctl.uninstrument(&"mcp".into()));
        assert!(!ctl.uninstrument(&"mcp".into()));
        assert_eq!(ctl.bus().subscriber_count(), 0);
        assert!(!ctl.detection().is_installed(&"mcp".into()));
    }

    #[tokio::test]
    async fn hooks_pass_payload_and_ignore_unknown_components() {
        let ctl = controller(ControllerConfig::default());
        let outcome = ctl
            .pre_conversion(&"ghost".into(), HookContext::with_data(json!({"k": 1})))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.data, Some(json!({"k": 1})));

        let outcome = ctl
            .error_recovery(&"ghost".into(), HookContext::default())
            .await;
        assert_eq!(outcome.recovered, Some(false));
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let ctl = controller(ControllerConfig::default());
        ctl.instrument(Arc::new(MockComponent::new("mcp")));
        let mut events = ctl.events().subscribe();
        let detection = PatternDetection::new("mcp".into(), PatternType::Deprecation, "d", 0.9);

        ctl.handle_propagated_change(&"mcp".into(), &message("mcp", PATTERN_DETECTED, json!(detection)))
            .await
            .unwrap();
        assert!(drain_events(&mut events).is_empty());
    }

    #[tokio::test]
    async fn related_pattern_and_adaptation_are_reemitted() {
        let ctl = controller(ControllerConfig::default());
        ctl.instrument(Arc::new(MockComponent::new("a2a")));
        let mut events = ctl.events().subscribe();
        let detection = PatternDetection::new("mcp".into(), PatternType::Deprecation, "d", 0.9);

        ctl.handle_propagated_change(&"a2a".into(), &message("mcp", PATTERN_DETECTED, json!(detection)))
            .await
            .unwrap();
        ctl.handle_propagated_change(&"a2a".into(), &message("mcp", ADAPTATION, json!({})))
            .await
            .unwrap();

        let names: Vec<_> = drain_events(&mut events).iter().map(NamedEvent::name).collect();
        assert_eq!(names, vec!["related-pattern", "adaptation-observed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_health_repropagates_at_most_once_per_interval() {
        let ctl = controller(ControllerConfig::default());
        let degraded = HealthSnapshot::healthy()
            .with_score(40.0)
            .with_recommendation(HealthRecommendation::Evaluate);
        ctl.instrument(Arc::new(MockComponent::new("a2a").with_health(degraded)));
        let inbound = message("mcp", HEALTH_CHANGE, json!({}));

        for _ in 0..3 {
            ctl.handle_propagated_change(&"a2a".into(), &inbound).await.unwrap();
        }
        assert_eq!(ctl.bus().queue_len(), 1);

        tokio::time::advance(ctl.config().controller.health_repropagate_interval()).await;
        ctl.handle_propagated_change(&"a2a".into(), &inbound).await.unwrap();
        assert_eq!(ctl.bus().queue_len(), 2);
        assert!(ctl
            .bus()
            .queued()
            .iter()
            .all(|m| m.source == ComponentId::new("a2a") && m.change_type == HEALTH_CHANGE));
    }

    #[tokio::test]
    async fn healthy_receiver_stays_quiet() {
        let ctl = controller(ControllerConfig::default());
        ctl.instrument(Arc::new(MockComponent::new("a2a")));
        ctl.handle_propagated_change(&"a2a".into(), &message("mcp", HEALTH_CHANGE, json!({})))
            .await
            .unwrap();
        assert_eq!(ctl.bus().queue_len(), 0);
    }

    #[tokio::test]
    async fn adaptive_health_requires_instrumentation() {
        let ctl = controller(ControllerConfig::default());
        let err = ctl.adaptive_health(&"ghost".into()).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotInstrumented(_)));
        assert!(err.is_caller_error());

        let component = MockComponent::new("mcp").with_version(VersionInfo::new("1.0.0").deprecated());
        ctl.instrument(Arc::new(component));
        ctl.pre_conversion(&"mcp".into(), HookContext::default()).await;
        let health = ctl.adaptive_health(&"mcp".into()).await.unwrap();
        assert_eq!(health.detections_last_hour, 1);
        assert_eq!(ctl.adaptive_health_all().await.len(), 1);
    }
}
