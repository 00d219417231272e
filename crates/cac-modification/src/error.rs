//! Error types for the modification workflow
//!
//! Only capability gating and unknown requests reject a call outright.
//! Everything else happens during execution and is also recorded on the
//! execution and reported through workflow events.

use crate::types::RequestStatus;
use cac_core::{CapabilityLevel, ComponentId, RequestId};

/// Workflow error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// Registered capability is below what the modification type needs
    #[error("component {component} holds {registered} capability, {required} required")]
    InsufficientCapability {
        component: ComponentId,
        registered: CapabilityLevel,
        required: CapabilityLevel,
    },

    /// No such request
    #[error("modification request {0} not found")]
    RequestNotFound(RequestId),

    /// A change failed validation; nothing was applied
    #[error("validation failed for {target} in request {request}: {reason}")]
    ValidationFailed {
        request: RequestId,
        target: String,
        reason: String,
    },

    /// A change could not be applied
    #[error("change to {target} in request {request} failed: {reason}")]
    ChangeFailed {
        request: RequestId,
        target: String,
        reason: String,
    },

    /// Operation not permitted from the request's current status
    #[error("request {request} cannot move from {from} to {to}")]
    InvalidTransition {
        request: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Rollback steps did not finish within the plan timeout
    #[error("rollback of request {request} timed out after {timeout_ms}ms")]
    RollbackTimeout { request: RequestId, timeout_ms: u64 },

    /// A rollback step action failed
    #[error("rollback step {step} of request {request} failed: {reason}")]
    RollbackStepFailed {
        request: RequestId,
        step: u32,
        reason: String,
    },

    /// A rollback step did not verify
    #[error("rollback step {step} of request {request} did not verify: {reason}")]
    RollbackVerificationFailed {
        request: RequestId,
        step: u32,
        reason: String,
    },

    /// The workflow no longer accepts executions
    #[error("modification workflow is closed")]
    Closed,
}

impl WorkflowError {
    /// Rejections raised before any request state changes
    #[inline]
    #[must_use]
    pub fn is_synchronous_rejection(&self) -> bool {
        matches!(
            self,
            Self::InsufficientCapability { .. } | Self::RequestNotFound(_)
        )
    }

    /// Failures raised while undoing a request
    #[inline]
    #[must_use]
    pub fn is_rollback_failure(&self) -> bool {
        matches!(
            self,
            Self::RollbackTimeout { .. }
                | Self::RollbackStepFailed { .. }
                | Self::RollbackVerificationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let err = WorkflowError::InsufficientCapability {
            component: "mcp".into(),
            registered: CapabilityLevel::Configuration,
            required: CapabilityLevel::Structural,
        };
        assert!(err.is_synchronous_rejection());
        assert_eq!(
            err.to_string(),
            "component mcp holds configuration capability, structural required"
        );

        let timeout = WorkflowError::RollbackTimeout {
            request: RequestId::new(),
            timeout_ms: 10,
        };
        assert!(timeout.is_rollback_failure());
        assert!(!timeout.is_synchronous_rejection());
    }
}
