//! Extension points for real side effects
//!
//! The workflow only does bookkeeping. Applying a change and undoing it are
//! delegated to a [`ChangeApplier`] and a [`RollbackExecutor`], dispatched by
//! the `kind` carried on each validation rule and rollback step.

use crate::types::{ModificationChange, ModificationRequest, RollbackStep, ValidationRule};
use async_trait::async_trait;
use serde_json::Value;

/// Failure reported by an extension
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ExtensionError(pub String);

impl ExtensionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Validates and applies changes
#[async_trait]
pub trait ChangeApplier: Send + Sync {
    /// Check a change against its validation rule before anything is applied
    async fn validate(
        &self,
        request: &ModificationRequest,
        change: &ModificationChange,
        rule: &ValidationRule,
    ) -> Result<(), ExtensionError>;

    /// Apply one change
    async fn apply(
        &self,
        request: &ModificationRequest,
        change: &ModificationChange,
    ) -> Result<(), ExtensionError>;
}

/// Runs rollback steps
#[async_trait]
pub trait RollbackExecutor: Send + Sync {
    /// Undo action for one step
    async fn action(
        &self,
        request: &ModificationRequest,
        step: &RollbackStep,
    ) -> Result<(), ExtensionError>;

    /// Confirm the step took effect
    async fn verify(
        &self,
        request: &ModificationRequest,
        step: &RollbackStep,
    ) -> Result<bool, ExtensionError>;
}

/// Applier that records nothing and understands the built-in rule kinds
///
/// | rule | passes when |
/// |---|---|
/// | `required-after` | the change carries a non-null `after` payload |
/// | `matches-before` | `before` equals `params.expected` |
/// | `target-prefix` | `target` starts with `params.prefix` |
#[derive(Debug, Clone, Copy, Default)]
pub struct BookkeepingApplier;

#[async_trait]
impl ChangeApplier for BookkeepingApplier {
    async fn validate(
        &self,
        _request: &ModificationRequest,
        change: &ModificationChange,
        rule: &ValidationRule,
    ) -> Result<(), ExtensionError> {
        check_builtin_rule(change, rule)
    }

    async fn apply(
        &self,
        request: &ModificationRequest,
        change: &ModificationChange,
    ) -> Result<(), ExtensionError> {
        tracing::debug!(
            request = %request.id,
            target = %change.target,
            operation = ?change.operation,
            "change recorded"
        );
        Ok(())
    }
}

/// Evaluate one of the built-in validation rules
///
/// # Errors
/// The rule failed, or its kind is unknown.
pub fn check_builtin_rule(
    change: &ModificationChange,
    rule: &ValidationRule,
) -> Result<(), ExtensionError> {
    match rule.kind.as_str() {
        "required-after" => match &change.after {
            Some(value) if !value.is_null() => Ok(()),
            _ => Err(ExtensionError::new("change has no after payload")),
        },
        "matches-before" => {
            let expected = rule.params.get("expected").unwrap_or(&Value::Null);
            if change.before.as_ref().unwrap_or(&Value::Null) == expected {
                Ok(())
            } else {
                Err(ExtensionError::new("before payload does not match"))
            }
        }
        "target-prefix" => {
            let prefix = rule.params.get("prefix").and_then(Value::as_str).unwrap_or("");
            if change.target.starts_with(prefix) {
                Ok(())
            } else {
                Err(ExtensionError::new(format!(
                    "target {} outside {prefix}",
                    change.target
                )))
            }
        }
        other => Err(ExtensionError::new(format!("unknown validation rule {other}"))),
    }
}

/// Rollback executor whose steps always succeed and verify
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRollbackExecutor;

#[async_trait]
impl RollbackExecutor for NoopRollbackExecutor {
    async fn action(
        &self,
        request: &ModificationRequest,
        step: &RollbackStep,
    ) -> Result<(), ExtensionError> {
        tracing::debug!(request = %request.id, step = step.order, kind = %step.kind, "rollback step");
        Ok(())
    }

    async fn verify(
        &self,
        _request: &ModificationRequest,
        _step: &RollbackStep,
    ) -> Result<bool, ExtensionError> {
        Ok(true)
    }
}
