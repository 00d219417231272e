//! Workflow events

use crate::types::{ModificationExecution, ModificationRequest, ModificationType};
use cac_core::{ComponentId, NamedEvent, RequestId};

/// Events emitted across the request lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    ModificationRequested {
        request: ModificationRequest,
    },
    ModificationApproved {
        request_id: RequestId,
        component_id: ComponentId,
    },
    ModificationRejected {
        request_id: RequestId,
        component_id: ComponentId,
        reason: Option<String>,
    },
    ModificationStarted {
        request_id: RequestId,
        component_id: ComponentId,
    },
    ModificationCompleted {
        modification_type: ModificationType,
        execution: ModificationExecution,
    },
    ModificationFailed {
        modification_type: ModificationType,
        execution: ModificationExecution,
    },
    RollbackStarted {
        request_id: RequestId,
        component_id: ComponentId,
    },
    RollbackCompleted {
        request_id: RequestId,
        component_id: ComponentId,
    },
    RollbackFailed {
        request_id: RequestId,
        component_id: ComponentId,
        error: String,
    },
}

impl NamedEvent for WorkflowEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::ModificationRequested { .. } => "modification-requested",
            Self::ModificationApproved { .. } => "modification-approved",
            Self::ModificationRejected { .. } => "modification-rejected",
            Self::ModificationStarted { .. } => "modification-started",
            Self::ModificationCompleted { .. } => "modification-completed",
            Self::ModificationFailed { .. } => "modification-failed",
            Self::RollbackStarted { .. } => "rollback-started",
            Self::RollbackCompleted { .. } => "rollback-completed",
            Self::RollbackFailed { .. } => "rollback-failed",
        }
    }
}
