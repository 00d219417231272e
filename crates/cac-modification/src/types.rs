//! Modification requests, changes, rollback plans and executions
//!
//! Every record here is plain serializable data. Behavior attached to a
//! record (validating a change, running a rollback step) is looked up by the
//! record's `kind` through the extension traits in [`crate::extension`].

use cac_core::{CapabilityLevel, ComponentId, PatternType, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Default rollback timeout
pub const DEFAULT_ROLLBACK_TIMEOUT_MS: u64 = 30_000;

/// Kind of proposed modification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModificationType {
    TypeUpdate,
    MappingUpdate,
    NewHandler,
    DeprecationWrapper,
    SecurityPatch,
    BreakingChangeMigration,
    /// Any other proposal; gated at the configuration level
    Other(String),
}

impl ModificationType {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TypeUpdate => "type-update",
            Self::MappingUpdate => "mapping-update",
            Self::NewHandler => "new-handler",
            Self::DeprecationWrapper => "deprecation-wrapper",
            Self::SecurityPatch => "security-patch",
            Self::BreakingChangeMigration => "breaking-change-migration",
            Self::Other(name) => name,
        }
    }

    /// Capability a component must hold to authorize this modification
    #[must_use]
    pub fn required_level(&self) -> CapabilityLevel {
        match self {
            Self::TypeUpdate | Self::MappingUpdate | Self::Other(_) => {
                CapabilityLevel::Configuration
            }
            Self::NewHandler | Self::DeprecationWrapper | Self::SecurityPatch => {
                CapabilityLevel::Behavior
            }
            Self::BreakingChangeMigration => CapabilityLevel::Structural,
        }
    }

    /// Modification proposed in reaction to a detected pattern
    #[must_use]
    pub fn for_pattern(pattern: PatternType) -> Self {
        match pattern {
            PatternType::Deprecation => Self::DeprecationWrapper,
            PatternType::Security => Self::SecurityPatch,
            PatternType::BreakingChange => Self::BreakingChangeMigration,
            PatternType::Enhancement => Self::NewHandler,
            PatternType::Optimization => Self::MappingUpdate,
        }
    }
}

impl From<&str> for ModificationType {
    fn from(value: &str) -> Self {
        match value {
            "type-update" => Self::TypeUpdate,
            "mapping-update" => Self::MappingUpdate,
            "new-handler" => Self::NewHandler,
            "deprecation-wrapper" => Self::DeprecationWrapper,
            "security-patch" => Self::SecurityPatch,
            "breaking-change-migration" => Self::BreakingChangeMigration,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ModificationType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ModificationType> for String {
    fn from(value: ModificationType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ModificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeOperation {
    Add,
    Modify,
    Remove,
    Replace,
}

/// Named validation check interpreted by a `ChangeApplier`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

impl ValidationRule {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Value::Null,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// One change inside a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationChange {
    pub target: String,
    pub operation: ChangeOperation,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub validation: Option<ValidationRule>,
}

impl ModificationChange {
    #[must_use]
    pub fn new(target: impl Into<String>, operation: ChangeOperation) -> Self {
        Self {
            target: target.into(),
            operation,
            before: None,
            after: None,
            validation: None,
        }
    }

    #[must_use]
    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    #[must_use]
    pub fn with_after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation = Some(rule);
        self
    }
}

/// One undo step; run by a `RollbackExecutor` according to `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub order: u32,
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub params: Value,
}

impl RollbackStep {
    #[must_use]
    pub fn new(order: u32, kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            order,
            kind: kind.into(),
            description: description.into(),
            params: Value::Null,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Ordered undo procedure for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub steps: Vec<RollbackStep>,
    /// Only automated plans run after a failed change
    pub automated: bool,
    pub timeout_ms: u64,
    pub triggers: Vec<String>,
}

impl Default for RollbackPlan {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            automated: false,
            timeout_ms: DEFAULT_ROLLBACK_TIMEOUT_MS,
            triggers: Vec::new(),
        }
    }
}

impl RollbackPlan {
    /// Plan run automatically on change failure
    #[must_use]
    pub fn automated(steps: Vec<RollbackStep>) -> Self {
        Self {
            steps,
            automated: true,
            ..Self::default()
        }
    }

    /// Plan run only on explicit request
    #[must_use]
    pub fn manual(steps: Vec<RollbackStep>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.triggers.push(trigger.into());
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Steps in ascending `order`; equal orders keep their listed position
    #[must_use]
    pub fn ordered_steps(&self) -> Vec<&RollbackStep> {
        let mut steps: Vec<_> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

/// A proposed modification of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub component_id: ComponentId,
    /// Derived from `modification_type` when the request is submitted
    pub required_level: CapabilityLevel,
    pub modification_type: ModificationType,
    pub description: String,
    pub changes: Vec<ModificationChange>,
    pub rollback_plan: RollbackPlan,
    pub approval_required: bool,
    pub confidence: f64,
}

impl ModificationRequest {
    /// New request requiring approval, with an empty manual rollback plan
    #[must_use]
    pub fn new(
        component_id: impl Into<ComponentId>,
        modification_type: ModificationType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            timestamp: Utc::now(),
            component_id: component_id.into(),
            required_level: modification_type.required_level(),
            modification_type,
            description: description.into(),
            changes: Vec::new(),
            rollback_plan: RollbackPlan::default(),
            approval_required: true,
            confidence: 1.0,
        }
    }

    #[must_use]
    pub fn with_change(mut self, change: ModificationChange) -> Self {
        self.changes.push(change);
        self
    }

    #[must_use]
    pub fn with_rollback_plan(mut self, plan: RollbackPlan) -> Self {
        self.rollback_plan = plan;
        self
    }

    #[must_use]
    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.approval_required = required;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Lifecycle status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Queued,
    Approved,
    Executing,
    Completed,
    Failed,
    RolledBack,
    Rejected,
}

impl RequestStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        crate::state::allowed_transitions(*self).is_empty()
    }

    /// Queued, approved or executing
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Approved | Self::Executing)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

/// Record of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationExecution {
    pub request_id: RequestId,
    pub component_id: ComponentId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub changes_applied: usize,
    pub changes_failed: usize,
    /// True only when rollback steps were actually run
    pub rollback_performed: bool,
    pub error: Option<String>,
    pub rollback_error: Option<String>,
}

impl ModificationExecution {
    pub(crate) fn start(request: &ModificationRequest) -> Self {
        Self {
            request_id: request.id,
            component_id: request.component_id.clone(),
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::InProgress,
            changes_applied: 0,
            changes_failed: 0,
            rollback_performed: false,
            error: None,
            rollback_error: None,
        }
    }

    pub(crate) fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration once finished
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Result of submitting a request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Waiting for approval
    Queued(RequestId),
    /// Executed immediately (no approval required)
    Executed(ModificationExecution),
}

impl RequestOutcome {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Queued(id) => *id,
            Self::Executed(execution) => execution.request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_levels_follow_type() {
        assert_eq!(
            ModificationType::MappingUpdate.required_level(),
            CapabilityLevel::Configuration
        );
        assert_eq!(
            ModificationType::SecurityPatch.required_level(),
            CapabilityLevel::Behavior
        );
        assert_eq!(
            ModificationType::BreakingChangeMigration.required_level(),
            CapabilityLevel::Structural
        );
        assert_eq!(
            ModificationType::from("rename-field").required_level(),
            CapabilityLevel::Configuration
        );
    }

    #[test]
    fn modification_type_round_trips_through_strings() {
        let json = serde_json::to_string(&ModificationType::DeprecationWrapper).unwrap();
        assert_eq!(json, "\"deprecation-wrapper\"");
        let other: ModificationType = serde_json::from_str("\"custom\"").unwrap();
        assert_eq!(other, ModificationType::Other("custom".into()));
    }

    #[test]
    fn pattern_mapping() {
        assert_eq!(
            ModificationType::for_pattern(PatternType::Deprecation),
            ModificationType::DeprecationWrapper
        );
        assert_eq!(
            ModificationType::for_pattern(PatternType::Optimization),
            ModificationType::MappingUpdate
        );
    }

    #[test]
    fn rollback_steps_sort_by_order() {
        let plan = RollbackPlan::automated(vec![
            RollbackStep::new(2, "restore", "second"),
            RollbackStep::new(1, "restore", "first"),
        ]);
        let descriptions: Vec<_> = plan.ordered_steps().iter().map(|s| s.description.as_str()).collect();
        assert_eq!(descriptions, vec!["first", "second"]);
    }
}
