use crate::error::WorkflowError;
use crate::types::RequestStatus;
use cac_core::RequestId;

/// Validates a request status transition.
pub fn validate_transition(
    request: RequestId,
    from: RequestStatus,
    to: RequestStatus,
) -> Result<(), WorkflowError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition { request, from, to })
    }
}

pub fn allowed_transitions(from: RequestStatus) -> Vec<RequestStatus> {
    use RequestStatus::*;
    match from {
        Queued => vec![Approved, Executing, Rejected],
        Approved => vec![Executing],
        Executing => vec![Completed, Failed],
        Completed => vec![RolledBack],
        Failed => vec![],
        RolledBack => vec![],
        Rejected => vec![],
    }
}

fn allowed(from: RequestStatus, to: RequestStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_is_terminal() {
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(!RequestStatus::Completed.is_terminal());
    }

    #[test]
    fn cannot_approve_an_executing_request() {
        let id = RequestId::new();
        let err = validate_transition(id, RequestStatus::Executing, RequestStatus::Approved)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert!(validate_transition(id, RequestStatus::Queued, RequestStatus::Approved).is_ok());
    }
}
