//! The modification workflow
//!
//! Lifecycle: queued -> (approved ->) executing -> completed | failed, with
//! completed -> rolled-back on explicit rollback and queued -> rejected.
//!
//! Executions are bounded by a semaphore of `max_concurrent_modifications`
//! permits and serialised per component.

use crate::capability::CapabilityRegistry;
use crate::error::WorkflowError;
use crate::events::WorkflowEvent;
use crate::extension::{BookkeepingApplier, ChangeApplier, NoopRollbackExecutor, RollbackExecutor};
use crate::state::validate_transition;
use crate::types::{
    ExecutionStatus, ModificationExecution, ModificationRequest, RequestOutcome, RequestStatus,
};
use cac_core::{CapabilityLevel, ComponentId, EventStream, ModificationConfig, RequestId};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
struct RequestRecord {
    request: ModificationRequest,
    status: RequestStatus,
    execution: Option<ModificationExecution>,
}

/// Serializable workflow state a host may persist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub capabilities: BTreeMap<ComponentId, CapabilityLevel>,
    pub pending: Vec<ModificationRequest>,
    pub executions: Vec<ModificationExecution>,
}

/// Capability-gated request/approval/execution/rollback bookkeeping
pub struct ModificationWorkflow {
    config: ModificationConfig,
    capabilities: CapabilityRegistry,
    records: DashMap<RequestId, RequestRecord>,
    pending: Mutex<IndexMap<RequestId, ModificationRequest>>,
    history: Mutex<VecDeque<ModificationExecution>>,
    rejected: Mutex<VecDeque<RequestId>>,
    applier: Arc<dyn ChangeApplier>,
    rollback: Arc<dyn RollbackExecutor>,
    slots: Semaphore,
    component_locks: DashMap<ComponentId, Arc<tokio::sync::Mutex<()>>>,
    events: EventStream<WorkflowEvent>,
}

impl std::fmt::Debug for ModificationWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModificationWorkflow")
            .field("config", &self.config)
            .field("requests", &self.records.len())
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl ModificationWorkflow {
    /// Workflow with bookkeeping-only extensions
    #[must_use]
    pub fn new(config: ModificationConfig) -> Self {
        Self {
            slots: Semaphore::new(config.max_concurrent_modifications.max(1)),
            capabilities: CapabilityRegistry::new(),
            records: DashMap::new(),
            pending: Mutex::new(IndexMap::new()),
            history: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(VecDeque::new()),
            applier: Arc::new(BookkeepingApplier),
            rollback: Arc::new(NoopRollbackExecutor),
            component_locks: DashMap::new(),
            events: EventStream::new("modification"),
            config,
        }
    }

    #[must_use]
    pub fn with_applier(mut self, applier: Arc<dyn ChangeApplier>) -> Self {
        self.applier = applier;
        self
    }

    #[must_use]
    pub fn with_rollback_executor(mut self, executor: Arc<dyn RollbackExecutor>) -> Self {
        self.rollback = executor;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ModificationConfig {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &EventStream<WorkflowEvent> {
        &self.events
    }

    /// Set the capability ceiling of a component
    pub fn register_capability(&self, component_id: impl Into<ComponentId>, level: CapabilityLevel) {
        let component_id = component_id.into();
        tracing::info!(component = %component_id, %level, "capability registered");
        self.capabilities.register(component_id, level);
    }

    #[must_use]
    pub fn capability_of(&self, component_id: &ComponentId) -> CapabilityLevel {
        self.capabilities.level_of(component_id)
    }

    /// Submit a request
    ///
    /// The required level is derived from the modification type. Requests
    /// that need no approval execute before this returns.
    ///
    /// # Errors
    /// `InsufficientCapability` before anything is recorded; otherwise the
    /// errors of [`Self::execute_modification`] for immediate executions.
    pub async fn request_modification(
        &self,
        mut request: ModificationRequest,
    ) -> Result<RequestOutcome, WorkflowError> {
        request.required_level = request.modification_type.required_level();
        if let Err(error) = self
            .capabilities
            .check(&request.component_id, request.required_level)
        {
            tracing::warn!(component = %request.component_id, %error, "modification refused");
            return Err(error);
        }

        let id = request.id;
        tracing::info!(
            request = %id,
            component = %request.component_id,
            kind = %request.modification_type,
            approval_required = request.approval_required,
            "modification requested"
        );
        self.records.insert(
            id,
            RequestRecord {
                request: request.clone(),
                status: RequestStatus::Queued,
                execution: None,
            },
        );
        self.events.emit(WorkflowEvent::ModificationRequested {
            request: request.clone(),
        });

        if request.approval_required {
            self.pending.lock().insert(id, request);
            return Ok(RequestOutcome::Queued(id));
        }
        self.execute_modification(id)
            .await
            .map(RequestOutcome::Executed)
    }

    /// Approve a queued request and execute it
    ///
    /// # Errors
    /// `RequestNotFound`, `InvalidTransition` when the request is no longer
    /// queued, or any execution error.
    pub async fn approve(&self, id: RequestId) -> Result<ModificationExecution, WorkflowError> {
        let taken = self.pending.lock().shift_remove(&id);
        let Some(request) = taken else {
            return Err(self.not_pending(id, RequestStatus::Approved));
        };
        self.transition(id, RequestStatus::Approved)?;
        tracing::info!(request = %id, component = %request.component_id, "modification approved");
        self.events.emit(WorkflowEvent::ModificationApproved {
            request_id: id,
            component_id: request.component_id,
        });
        self.execute_modification(id).await
    }

    /// Reject a queued request; nothing is executed
    ///
    /// # Errors
    /// `RequestNotFound`, or `InvalidTransition` when the request is no longer queued.
    pub fn reject(&self, id: RequestId, reason: Option<String>) -> Result<(), WorkflowError> {
        let taken = self.pending.lock().shift_remove(&id);
        let Some(request) = taken else {
            return Err(self.not_pending(id, RequestStatus::Rejected));
        };
        self.transition(id, RequestStatus::Rejected)?;
        tracing::info!(request = %id, component = %request.component_id, ?reason, "modification rejected");
        self.events.emit(WorkflowEvent::ModificationRejected {
            request_id: id,
            component_id: request.component_id,
            reason,
        });

        let evicted: Vec<_> = {
            let mut rejected = self.rejected.lock();
            rejected.push_back(id);
            let overflow = rejected.len().saturating_sub(self.history_capacity());
            rejected.drain(..overflow).collect()
        };
        self.forget(evicted);
        Ok(())
    }

    /// Execute a queued or approved request
    ///
    /// Validation (when required) covers every change before any is applied.
    /// Changes are applied in order and the first failure stops the rest.
    /// When an automated rollback runs, the failure is returned as a `failed`
    /// execution; otherwise the change error itself is returned.
    ///
    /// # Errors
    /// `RequestNotFound`, `InvalidTransition`, `ValidationFailed`,
    /// `ChangeFailed` (no rollback run) or `Closed`.
    pub async fn execute_modification(
        &self,
        id: RequestId,
    ) -> Result<ModificationExecution, WorkflowError> {
        let from = self.transition(id, RequestStatus::Executing)?;
        if from == RequestStatus::Queued {
            self.pending.lock().shift_remove(&id);
        }
        let request = self
            .records
            .get(&id)
            .map(|r| r.request.clone())
            .ok_or(WorkflowError::RequestNotFound(id))?;
        self.run(request).await
    }

    async fn run(&self, request: ModificationRequest) -> Result<ModificationExecution, WorkflowError> {
        let mut execution = ModificationExecution::start(&request);
        let Ok(_permit) = self.slots.acquire().await else {
            execution.error = Some(WorkflowError::Closed.to_string());
            execution.finish(ExecutionStatus::Failed);
            self.settle(&request, execution, RequestStatus::Failed);
            return Err(WorkflowError::Closed);
        };
        let lock = self.component_lock(&request.component_id);
        let _serialised = lock.lock().await;

        tracing::info!(request = %request.id, component = %request.component_id, "modification started");
        self.events.emit(WorkflowEvent::ModificationStarted {
            request_id: request.id,
            component_id: request.component_id.clone(),
        });

        if self.config.validation_required {
            if let Err(error) = self.validate_changes(&request).await {
                tracing::warn!(request = %request.id, %error, "validation failed");
                execution.error = Some(error.to_string());
                execution.finish(ExecutionStatus::Failed);
                self.settle(&request, execution, RequestStatus::Failed);
                return Err(error);
            }
        }

        let mut failure = None;
        for change in &request.changes {
            match self.applier.apply(&request, change).await {
                Ok(()) => execution.changes_applied += 1,
                Err(e) => {
                    execution.changes_failed += 1;
                    failure = Some(WorkflowError::ChangeFailed {
                        request: request.id,
                        target: change.target.clone(),
                        reason: e.0,
                    });
                    break;
                }
            }
        }

        let Some(error) = failure else {
            tracing::info!(
                request = %request.id,
                component = %request.component_id,
                applied = execution.changes_applied,
                "modification completed"
            );
            execution.finish(ExecutionStatus::Completed);
            self.settle(&request, execution.clone(), RequestStatus::Completed);
            return Ok(execution);
        };

        tracing::warn!(request = %request.id, %error, "change failed");
        execution.error = Some(error.to_string());
        let roll_back = self.config.auto_rollback_on_failure && request.rollback_plan.automated;
        if roll_back {
            execution.rollback_performed = true;
            if let Err(rollback_error) = self.run_rollback(&request).await {
                execution.rollback_error = Some(rollback_error.to_string());
            }
        }
        execution.finish(ExecutionStatus::Failed);
        self.settle(&request, execution.clone(), RequestStatus::Failed);

        if roll_back {
            Ok(execution)
        } else {
            Err(error)
        }
    }

    async fn validate_changes(&self, request: &ModificationRequest) -> Result<(), WorkflowError> {
        for change in &request.changes {
            let Some(rule) = &change.validation else {
                continue;
            };
            self.applier
                .validate(request, change, rule)
                .await
                .map_err(|e| WorkflowError::ValidationFailed {
                    request: request.id,
                    target: change.target.clone(),
                    reason: e.0,
                })?;
        }
        Ok(())
    }

    /// Run the plan's steps in ascending order, each action followed by its
    /// verification, racing the plan timeout
    async fn run_rollback(&self, request: &ModificationRequest) -> Result<(), WorkflowError> {
        let plan = &request.rollback_plan;
        tracing::warn!(request = %request.id, steps = plan.steps.len(), "rollback started");
        self.events.emit(WorkflowEvent::RollbackStarted {
            request_id: request.id,
            component_id: request.component_id.clone(),
        });

        let executor = Arc::clone(&self.rollback);
        let chain = async {
            for step in plan.ordered_steps() {
                executor
                    .action(request, step)
                    .await
                    .map_err(|e| WorkflowError::RollbackStepFailed {
                        request: request.id,
                        step: step.order,
                        reason: e.0,
                    })?;
                let reason = match executor.verify(request, step).await {
                    Ok(true) => continue,
                    Ok(false) => "verification returned false".to_string(),
                    Err(e) => e.0,
                };
                return Err(WorkflowError::RollbackVerificationFailed {
                    request: request.id,
                    step: step.order,
                    reason,
                });
            }
            Ok::<(), WorkflowError>(())
        };

        let result = match tokio::time::timeout(plan.timeout(), chain).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::RollbackTimeout {
                request: request.id,
                timeout_ms: plan.timeout_ms,
            }),
        };

        match &result {
            Ok(()) => {
                tracing::info!(request = %request.id, "rollback completed");
                self.events.emit(WorkflowEvent::RollbackCompleted {
                    request_id: request.id,
                    component_id: request.component_id.clone(),
                });
            }
            Err(error) => {
                tracing::error!(request = %request.id, %error, "rollback failed");
                self.events.emit(WorkflowEvent::RollbackFailed {
                    request_id: request.id,
                    component_id: request.component_id.clone(),
                    error: error.to_string(),
                });
            }
        }
        result
    }

    /// Undo a completed request by running its rollback plan
    ///
    /// Runs regardless of the plan's `automated` flag.
    ///
    /// Counts against `max_concurrent_modifications` like any execution.
    ///
    /// # Errors
    /// `RequestNotFound` (also once the request left the bounded history),
    /// `InvalidTransition` unless the request completed, `Closed`, or the
    /// rollback failure; the request then stays completed.
    pub async fn rollback_execution(
        &self,
        id: RequestId,
    ) -> Result<ModificationExecution, WorkflowError> {
        let (request, status) = self
            .records
            .get(&id)
            .map(|r| (r.request.clone(), r.status))
            .ok_or(WorkflowError::RequestNotFound(id))?;
        validate_transition(id, status, RequestStatus::RolledBack)?;

        let Ok(_permit) = self.slots.acquire().await else {
            return Err(WorkflowError::Closed);
        };
        let lock = self.component_lock(&request.component_id);
        let _serialised = lock.lock().await;
        self.run_rollback(&request).await?;
        self.transition(id, RequestStatus::RolledBack)?;

        let mut execution = self
            .records
            .get(&id)
            .and_then(|r| r.execution.clone())
            .unwrap_or_else(|| ModificationExecution::start(&request));
        execution.rollback_performed = true;
        execution.finish(ExecutionStatus::RolledBack);

        if let Some(mut record) = self.records.get_mut(&id) {
            record.execution = Some(execution.clone());
        }
        if let Some(entry) = self
            .history
            .lock()
            .iter_mut()
            .rev()
            .find(|e| e.request_id == id)
        {
            *entry = execution.clone();
        }
        tracing::info!(request = %id, component = %request.component_id, "modification rolled back");
        Ok(execution)
    }

    /// Stop accepting executions; waiting executions fail with `Closed`
    pub fn close(&self) {
        self.slots.close();
    }

    /// Queued requests in submission order
    #[must_use]
    pub fn pending(&self) -> Vec<ModificationRequest> {
        self.pending.lock().values().cloned().collect()
    }

    /// Bounded execution history, oldest first
    #[must_use]
    pub fn execution_history(&self) -> Vec<ModificationExecution> {
        self.history.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn executions_for(&self, component_id: &ComponentId) -> Vec<ModificationExecution> {
        self.history
            .lock()
            .iter()
            .filter(|e| &e.component_id == component_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.records.get(&id).map(|r| r.status)
    }

    #[must_use]
    pub fn request(&self, id: RequestId) -> Option<ModificationRequest> {
        self.records.get(&id).map(|r| r.request.clone())
    }

    /// Latest execution of a request
    #[must_use]
    pub fn execution(&self, id: RequestId) -> Option<ModificationExecution> {
        self.records.get(&id).and_then(|r| r.execution.clone())
    }

    /// Whether a component has a queued, approved or executing request
    #[must_use]
    pub fn has_active_request(&self, component_id: &ComponentId) -> bool {
        self.records
            .iter()
            .any(|r| &r.request.component_id == component_id && r.status.is_active())
    }

    #[must_use]
    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            capabilities: self.capabilities.snapshot(),
            pending: self.pending(),
            executions: self.execution_history(),
        }
    }

    /// Reload a snapshot: capabilities, execution history and queued requests
    ///
    /// Executions already in history, requests already known, and requests
    /// whose component no longer holds the required capability are skipped.
    /// Returns the number re-queued.
    pub fn restore_pending(&self, snapshot: WorkflowSnapshot) -> usize {
        for (component, level) in snapshot.capabilities {
            self.capabilities.register(component, level);
        }
        let known: HashSet<RequestId> = self
            .history
            .lock()
            .iter()
            .map(|e| e.request_id)
            .collect();
        for execution in snapshot.executions {
            if !known.contains(&execution.request_id) {
                self.push_history(execution);
            }
        }

        let mut restored = 0;
        for request in snapshot.pending {
            if self.records.contains_key(&request.id) {
                continue;
            }
            if let Err(error) = self
                .capabilities
                .check(&request.component_id, request.required_level)
            {
                tracing::warn!(request = %request.id, %error, "pending request not restored");
                continue;
            }
            self.records.insert(
                request.id,
                RequestRecord {
                    request: request.clone(),
                    status: RequestStatus::Queued,
                    execution: None,
                },
            );
            self.pending.lock().insert(request.id, request);
            restored += 1;
        }
        tracing::info!(restored, "pending requests restored");
        restored
    }

    fn transition(&self, id: RequestId, to: RequestStatus) -> Result<RequestStatus, WorkflowError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(WorkflowError::RequestNotFound(id))?;
        let from = record.status;
        validate_transition(id, from, to)?;
        record.status = to;
        tracing::debug!(request = %id, %from, %to, "request status changed");
        Ok(from)
    }

    fn not_pending(&self, id: RequestId, to: RequestStatus) -> WorkflowError {
        match self.records.get(&id) {
            Some(record) => WorkflowError::InvalidTransition {
                request: id,
                from: record.status,
                to,
            },
            None => WorkflowError::RequestNotFound(id),
        }
    }

    fn settle(
        &self,
        request: &ModificationRequest,
        execution: ModificationExecution,
        status: RequestStatus,
    ) {
        if let Err(error) = self.transition(request.id, status) {
            tracing::warn!(request = %request.id, %error, "unexpected status on settle");
        }
        if let Some(mut record) = self.records.get_mut(&request.id) {
            record.execution = Some(execution.clone());
        }
        self.push_history(execution.clone());

        let modification_type = request.modification_type.clone();
        let event = if status == RequestStatus::Completed {
            WorkflowEvent::ModificationCompleted {
                modification_type,
                execution,
            }
        } else {
            WorkflowEvent::ModificationFailed {
                modification_type,
                execution,
            }
        };
        self.events.emit(event);
    }

    /// Append to the bounded history; requests whose execution falls out
    /// are forgotten as well
    fn push_history(&self, execution: ModificationExecution) {
        let evicted: Vec<_> = {
            let mut history = self.history.lock();
            history.push_back(execution);
            let overflow = history.len().saturating_sub(self.history_capacity());
            history.drain(..overflow).map(|e| e.request_id).collect()
        };
        self.forget(evicted);
    }

    fn history_capacity(&self) -> usize {
        self.config.max_execution_history.max(1)
    }

    /// Drop records of settled requests; active ones are kept
    fn forget(&self, ids: Vec<RequestId>) {
        for id in ids {
            if self
                .records
                .remove_if(&id, |_, record| !record.status.is_active())
                .is_some()
            {
                tracing::trace!(request = %id, "request record evicted");
            }
        }
    }

    fn component_lock(&self, component_id: &ComponentId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.component_locks.entry(component_id.clone()).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::ExtensionError;
    use crate::types::{
        ChangeOperation, ModificationChange, ModificationType, RollbackPlan, RollbackStep,
        ValidationRule,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the change targeting the given name
    struct FailOn(&'static str);

    #[async_trait]
    impl ChangeApplier for FailOn {
        async fn validate(
            &self,
            _request: &ModificationRequest,
            change: &ModificationChange,
            rule: &ValidationRule,
        ) -> Result<(), ExtensionError> {
            crate::extension::check_builtin_rule(change, rule)
        }

        async fn apply(
            &self,
            _request: &ModificationRequest,
            change: &ModificationChange,
        ) -> Result<(), ExtensionError> {
            if change.target == self.0 {
                Err(ExtensionError::new("target locked"))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct Counting {
        actions: AtomicUsize,
        verifies: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl RollbackExecutor for Counting {
        async fn action(
            &self,
            _request: &ModificationRequest,
            _step: &RollbackStep,
        ) -> Result<(), ExtensionError> {
            tokio::time::sleep(self.delay).await;
            self.actions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn verify(
            &self,
            _request: &ModificationRequest,
            _step: &RollbackStep,
        ) -> Result<bool, ExtensionError> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn two_changes(plan: RollbackPlan) -> ModificationRequest {
        ModificationRequest::new("mcp", ModificationType::NewHandler, "add handler")
            .with_change(ModificationChange::new("handlers.a", ChangeOperation::Add))
            .with_change(ModificationChange::new("handlers.b", ChangeOperation::Add))
            .with_rollback_plan(plan)
            .with_approval_required(false)
    }

    fn workflow(executor: Arc<Counting>) -> ModificationWorkflow {
        let wf = ModificationWorkflow::new(ModificationConfig::default())
            .with_applier(Arc::new(FailOn("handlers.b")))
            .with_rollback_executor(executor);
        wf.register_capability("mcp", CapabilityLevel::Behavior);
        wf
    }

    #[tokio::test]
    async fn failed_change_runs_automated_rollback() {
        let counting = Arc::new(Counting::default());
        let wf = workflow(counting.clone());
        let plan = RollbackPlan::automated(vec![RollbackStep::new(1, "restore-snapshot", "restore")]);

        let outcome = wf.request_modification(two_changes(plan)).await.unwrap();
        let RequestOutcome::Executed(execution) = outcome else {
            panic!("expected immediate execution");
        };

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.changes_applied, 1);
        assert_eq!(execution.changes_failed, 1);
        assert!(execution.rollback_performed);
        assert_eq!(counting.verifies.load(Ordering::SeqCst), 1);
        assert_eq!(wf.status(execution.request_id), Some(RequestStatus::Failed));
    }

    #[tokio::test]
    async fn manual_plan_returns_original_error() {
        let counting = Arc::new(Counting::default());
        let wf = workflow(counting.clone());
        let plan = RollbackPlan::manual(vec![RollbackStep::new(1, "restore-snapshot", "restore")]);

        let err = wf.request_modification(two_changes(plan)).await.unwrap_err();

        assert!(matches!(err, WorkflowError::ChangeFailed { ref target, .. } if target == "handlers.b"));
        assert_eq!(counting.actions.load(Ordering::SeqCst), 0);
        let recorded = &wf.execution_history()[0];
        assert!(!recorded.rollback_performed);
        assert_eq!(recorded.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn validation_failure_applies_nothing() {
        let wf = ModificationWorkflow::new(ModificationConfig::default());
        wf.register_capability("mcp", CapabilityLevel::Behavior);
        let request = ModificationRequest::new("mcp", ModificationType::NewHandler, "x")
            .with_change(ModificationChange::new("a", ChangeOperation::Add).with_after(serde_json::json!(1)))
            .with_change(
                ModificationChange::new("b", ChangeOperation::Add)
                    .with_validation(ValidationRule::new("required-after")),
            );
        let outcome = wf.request_modification(request).await.unwrap();
        let id = outcome.request_id();

        let err = wf.approve(id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationFailed { .. }));
        let execution = wf.execution(id).unwrap();
        assert_eq!(execution.changes_applied, 0);
        assert_eq!(wf.status(id), Some(RequestStatus::Failed));
    }

    #[tokio::test]
    async fn insufficient_capability_is_rejected_synchronously() {
        let wf = ModificationWorkflow::new(ModificationConfig::default());
        wf.register_capability("mcp", CapabilityLevel::Behavior);
        let request =
            ModificationRequest::new("mcp", ModificationType::BreakingChangeMigration, "migrate");

        let err = wf.request_modification(request).await.unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InsufficientCapability {
                component: "mcp".into(),
                registered: CapabilityLevel::Behavior,
                required: CapabilityLevel::Structural,
            }
        );
        assert!(wf.pending().is_empty());
    }

    #[tokio::test]
    async fn reject_removes_without_executing() {
        let wf = ModificationWorkflow::new(ModificationConfig::default());
        wf.register_capability("mcp", CapabilityLevel::Full);
        let id = wf
            .request_modification(ModificationRequest::new("mcp", ModificationType::TypeUpdate, "t"))
            .await
            .unwrap()
            .request_id();

        wf.reject(id, Some("not now".into())).unwrap();
        assert!(wf.pending().is_empty());
        assert!(wf.execution_history().is_empty());
        assert!(matches!(
            wf.approve(id).await,
            Err(WorkflowError::InvalidTransition { from: RequestStatus::Rejected, .. })
        ));
        assert!(matches!(
            wf.reject(RequestId::new(), None),
            Err(WorkflowError::RequestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn reads_are_idempotent() {
        let wf = ModificationWorkflow::new(ModificationConfig::default());
        wf.register_capability("mcp", CapabilityLevel::Full);
        for _ in 0..3 {
            wf.request_modification(ModificationRequest::new("mcp", ModificationType::TypeUpdate, "t"))
                .await
                .unwrap();
        }
        assert_eq!(wf.pending(), wf.pending());
        assert_eq!(wf.execution_history(), wf.execution_history());
        assert_eq!(wf.pending().len(), 3);
    }

    #[tokio::test]
    async fn completed_request_can_be_rolled_back() {
        let counting = Arc::new(Counting::default());
        let wf = ModificationWorkflow::new(ModificationConfig::default())
            .with_rollback_executor(counting.clone());
        wf.register_capability("mcp", CapabilityLevel::Behavior);
        let request = ModificationRequest::new("mcp", ModificationType::NewHandler, "x")
            .with_change(ModificationChange::new("a", ChangeOperation::Add))
            .with_rollback_plan(RollbackPlan::manual(vec![
                RollbackStep::new(2, "b", "second"),
                RollbackStep::new(1, "a", "first"),
            ]))
            .with_approval_required(false);
        let id = wf.request_modification(request).await.unwrap().request_id();

        let rolled = wf.rollback_execution(id).await.unwrap();
        assert_eq!(rolled.status, ExecutionStatus::RolledBack);
        assert_eq!(counting.actions.load(Ordering::SeqCst), 2);
        assert_eq!(wf.status(id), Some(RequestStatus::RolledBack));
        assert_eq!(wf.execution_history()[0].status, ExecutionStatus::RolledBack);
        assert!(wf.rollback_execution(id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_rollback_times_out() {
        let counting = Arc::new(Counting {
            delay: Duration::from_secs(5),
            ..Counting::default()
        });
        let wf = workflow(counting.clone());
        let plan = RollbackPlan::automated(vec![RollbackStep::new(1, "restore-snapshot", "restore")])
            .with_timeout(Duration::from_millis(100));
        let mut events = wf.events().subscribe();

        let outcome = wf.request_modification(two_changes(plan)).await.unwrap();
        let RequestOutcome::Executed(execution) = outcome else {
            panic!("expected immediate execution");
        };

        assert!(execution.rollback_performed);
        assert!(execution.rollback_error.unwrap().contains("timed out"));
        assert_eq!(counting.verifies.load(Ordering::SeqCst), 0);
        let rollback_failed = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, WorkflowEvent::RollbackFailed { .. }));
        assert!(rollback_failed);
    }

    #[tokio::test]
    async fn closed_workflow_fails_executions() {
        let wf = ModificationWorkflow::new(ModificationConfig::default());
        wf.register_capability("mcp", CapabilityLevel::Full);
        wf.close();
        let request = ModificationRequest::new("mcp", ModificationType::TypeUpdate, "t")
            .with_approval_required(false);

        let err = wf.request_modification(request).await.unwrap_err();
        assert_eq!(err, WorkflowError::Closed);
        assert!(!wf.has_active_request(&"mcp".into()));
    }

    #[tokio::test]
    async fn snapshot_restores_pending_requests() {
        let source = ModificationWorkflow::new(ModificationConfig::default());
        source.register_capability("mcp", CapabilityLevel::Behavior);
        source
            .request_modification(ModificationRequest::new("mcp", ModificationType::SecurityPatch, "p"))
            .await
            .unwrap();
        source
            .request_modification(
                ModificationRequest::new("mcp", ModificationType::NewHandler, "done")
                    .with_approval_required(false),
            )
            .await
            .unwrap();
        let json = serde_json::to_string(&source.snapshot()).unwrap();

        let target = ModificationWorkflow::new(ModificationConfig::default());
        let snapshot: WorkflowSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.executions.len(), 1);
        assert_eq!(target.restore_pending(snapshot.clone()), 1);
        assert_eq!(target.restore_pending(snapshot), 0);
        assert_eq!(target.capability_of(&"mcp".into()), CapabilityLevel::Behavior);
        assert!(target.has_active_request(&"mcp".into()));
        assert_eq!(target.execution_history(), source.execution_history());
    }

    #[tokio::test]
    async fn settled_requests_leave_with_history() {
        let wf = ModificationWorkflow::new(ModificationConfig::default().with_max_history(2));
        wf.register_capability("mcp", CapabilityLevel::Full);

        let mut executed = Vec::new();
        for i in 0..50 {
            let request = ModificationRequest::new("mcp", ModificationType::TypeUpdate, format!("t{i}"))
                .with_approval_required(false);
            executed.push(wf.request_modification(request).await.unwrap().request_id());
        }
        let mut rejected = Vec::new();
        for i in 0..5 {
            let request = ModificationRequest::new("mcp", ModificationType::TypeUpdate, format!("r{i}"));
            let id = wf.request_modification(request).await.unwrap().request_id();
            wf.reject(id, None).unwrap();
            rejected.push(id);
        }
        let queued = wf
            .request_modification(ModificationRequest::new("mcp", ModificationType::TypeUpdate, "q"))
            .await
            .unwrap()
            .request_id();

        let retained = executed.iter().filter(|id| wf.status(**id).is_some()).count();
        assert_eq!(wf.execution_history().len(), 2);
        assert_eq!(retained, 2);
        assert!(executed[48..].iter().all(|id| wf.execution(*id).is_some()));
        assert_eq!(rejected.iter().filter(|id| wf.status(**id).is_some()).count(), 2);
        assert_eq!(wf.status(queued), Some(RequestStatus::Queued));
        assert!(wf.has_active_request(&"mcp".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_rollback_takes_an_execution_slot() {
        let counting = Arc::new(Counting {
            delay: Duration::from_secs(1),
            ..Counting::default()
        });
        let wf = Arc::new(
            ModificationWorkflow::new(ModificationConfig::default().with_max_concurrent(1))
                .with_rollback_executor(counting.clone()),
        );
        wf.register_capability("mcp", CapabilityLevel::Full);
        wf.register_capability("docs", CapabilityLevel::Full);
        let request = ModificationRequest::new("mcp", ModificationType::TypeUpdate, "t")
            .with_rollback_plan(RollbackPlan::manual(vec![RollbackStep::new(1, "restore-snapshot", "restore")]))
            .with_approval_required(false);
        let id = wf.request_modification(request).await.unwrap().request_id();

        let rolling = tokio::spawn({
            let wf = Arc::clone(&wf);
            async move { wf.rollback_execution(id).await }
        });
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        let other = ModificationRequest::new("docs", ModificationType::TypeUpdate, "d")
            .with_approval_required(false);
        wf.request_modification(other).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(rolling.await.unwrap().is_ok());
        assert_eq!(counting.actions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_workflow_refuses_manual_rollback() {
        let wf = ModificationWorkflow::new(ModificationConfig::default());
        wf.register_capability("mcp", CapabilityLevel::Full);
        let request = ModificationRequest::new("mcp", ModificationType::TypeUpdate, "t")
            .with_approval_required(false);
        let id = wf.request_modification(request).await.unwrap().request_id();
        wf.close();

        assert_eq!(wf.rollback_execution(id).await.unwrap_err(), WorkflowError::Closed);
        assert_eq!(wf.status(id), Some(RequestStatus::Completed));
    }
}
