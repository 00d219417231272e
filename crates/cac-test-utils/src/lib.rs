//! Testing utilities for the CAC workspace
//!
//! Shared fixtures: a configurable component, recording bus handlers,
//! scripted modification extensions and event collection helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use cac_core::{
    CapabilitySummary, Component, ComponentId, FeatureSupport, HealthSnapshot, VersionInfo,
};
use cac_modification::{
    ChangeApplier, ExtensionError, ModificationChange, ModificationRequest, RollbackExecutor,
    RollbackStep, ValidationRule,
};
use cac_propagation::{ChangeHandler, DispatchError, PropagationMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Component whose reported state can be changed between checks
#[derive(Debug)]
pub struct MockComponent {
    id: ComponentId,
    capabilities: RwLock<CapabilitySummary>,
    health: RwLock<HealthSnapshot>,
    version: RwLock<VersionInfo>,
}

impl MockComponent {
    /// Healthy component at version 1.0.0 with no declared features
    pub fn new(id: &str) -> Self {
        Self {
            id: ComponentId::new(id),
            capabilities: RwLock::new(CapabilitySummary::new()),
            health: RwLock::new(HealthSnapshot::healthy()),
            version: RwLock::new(VersionInfo::new("1.0.0")),
        }
    }

    pub fn with_capabilities(self, capabilities: CapabilitySummary) -> Self {
        *self.capabilities.write() = capabilities;
        self
    }

    pub fn with_partial_features(self, partial: usize, full: usize) -> Self {
        let mut summary = CapabilitySummary::new();
        for i in 0..partial {
            summary = summary.with_feature(format!("partial-{i}"), FeatureSupport::Partial);
        }
        for i in 0..full {
            summary = summary.with_feature(format!("full-{i}"), FeatureSupport::Full);
        }
        self.with_capabilities(summary)
    }

    pub fn with_health(self, health: HealthSnapshot) -> Self {
        *self.health.write() = health;
        self
    }

    pub fn with_version(self, version: VersionInfo) -> Self {
        *self.version.write() = version;
        self
    }

    pub fn set_health(&self, health: HealthSnapshot) {
        *self.health.write() = health;
    }

    pub fn set_version(&self, version: VersionInfo) {
        *self.version.write() = version;
    }
}

#[async_trait]
impl Component for MockComponent {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    async fn capabilities(&self) -> CapabilitySummary {
        self.capabilities.read().clone()
    }

    async fn health(&self) -> HealthSnapshot {
        self.health.read().clone()
    }

    async fn version_info(&self) -> VersionInfo {
        self.version.read().clone()
    }
}

/// Bus handler that records every delivered message
#[derive(Debug, Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<PropagationMessage>>,
    fail: bool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that records and then fails every delivery
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<PropagationMessage> {
        self.messages.lock().clone()
    }

    pub fn change_types(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|m| m.change_type.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl ChangeHandler for RecordingHandler {
    async fn handle(&self, message: &PropagationMessage) -> Result<(), DispatchError> {
        self.messages.lock().push(message.clone());
        if self.fail {
            return Err(DispatchError::handler(
                message.source.clone(),
                "recording handler configured to fail",
            ));
        }
        Ok(())
    }
}

/// Applier that fails on chosen targets and records applied ones
#[derive(Debug, Default)]
pub struct ScriptedChangeApplier {
    fail_targets: BTreeSet<String>,
    reject_validation: BTreeSet<String>,
    applied: Mutex<Vec<String>>,
}

impl ScriptedChangeApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, target: &str) -> Self {
        self.fail_targets.insert(target.to_string());
        self
    }

    /// Validation rules of this kind fail
    pub fn rejecting_rule(mut self, kind: &str) -> Self {
        self.reject_validation.insert(kind.to_string());
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl ChangeApplier for ScriptedChangeApplier {
    async fn validate(
        &self,
        _request: &ModificationRequest,
        change: &ModificationChange,
        rule: &ValidationRule,
    ) -> Result<(), ExtensionError> {
        if self.reject_validation.contains(&rule.kind) {
            return Err(ExtensionError::new(format!(
                "{} rejected {}",
                rule.kind, change.target
            )));
        }
        Ok(())
    }

    async fn apply(
        &self,
        _request: &ModificationRequest,
        change: &ModificationChange,
    ) -> Result<(), ExtensionError> {
        if self.fail_targets.contains(&change.target) {
            return Err(ExtensionError::new(format!("{} is locked", change.target)));
        }
        self.applied.lock().push(change.target.clone());
        Ok(())
    }
}

/// Rollback executor counting action and verify calls
#[derive(Debug)]
pub struct CountingRollbackExecutor {
    actions: AtomicUsize,
    verifies: AtomicUsize,
    verify_result: bool,
    delay: Duration,
}

impl Default for CountingRollbackExecutor {
    fn default() -> Self {
        Self {
            actions: AtomicUsize::new(0),
            verifies: AtomicUsize::new(0),
            verify_result: true,
            delay: Duration::ZERO,
        }
    }
}

impl CountingRollbackExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every verification reports failure
    pub fn unverified(mut self) -> Self {
        self.verify_result = false;
        self
    }

    /// Each action sleeps before succeeding
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn actions(&self) -> usize {
        self.actions.load(Ordering::SeqCst)
    }

    pub fn verifies(&self) -> usize {
        self.verifies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RollbackExecutor for CountingRollbackExecutor {
    async fn action(
        &self,
        _request: &ModificationRequest,
        _step: &RollbackStep,
    ) -> Result<(), ExtensionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.actions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn verify(
        &self,
        _request: &ModificationRequest,
        _step: &RollbackStep,
    ) -> Result<bool, ExtensionError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        Ok(self.verify_result)
    }
}

/// Events already delivered to `rx`
pub fn drain_events<E>(rx: &mut UnboundedReceiver<E>) -> Vec<E> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Events received within `window`
pub async fn collect_events<E>(rx: &mut UnboundedReceiver<E>, window: Duration) -> Vec<E> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        events.push(event);
    }
    events
}

/// First event matching `predicate` within `timeout`
pub async fn wait_for<E, F>(rx: &mut UnboundedReceiver<E>, timeout: Duration, predicate: F) -> Option<E>
where
    F: Fn(&E) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        if predicate(&event) {
            return Some(event);
        }
    }
    None
}
