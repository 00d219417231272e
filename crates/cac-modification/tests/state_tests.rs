use cac_core::RequestId;
use cac_modification::{allowed_transitions, validate_transition, RequestStatus, WorkflowError};
use proptest::prelude::*;

#[test]
fn test_queued_transitions() {
    let id = RequestId::new();
    assert!(validate_transition(id, RequestStatus::Queued, RequestStatus::Approved).is_ok());
    assert!(validate_transition(id, RequestStatus::Queued, RequestStatus::Executing).is_ok());
    assert!(validate_transition(id, RequestStatus::Queued, RequestStatus::Rejected).is_ok());

    // Invalid
    assert!(validate_transition(id, RequestStatus::Queued, RequestStatus::Completed).is_err());
    assert!(validate_transition(id, RequestStatus::Queued, RequestStatus::RolledBack).is_err());
}

#[test]
fn test_only_completed_can_roll_back() {
    let id = RequestId::new();
    assert!(validate_transition(id, RequestStatus::Completed, RequestStatus::RolledBack).is_ok());
    assert!(validate_transition(id, RequestStatus::Failed, RequestStatus::RolledBack).is_err());
    assert!(validate_transition(id, RequestStatus::Executing, RequestStatus::RolledBack).is_err());
}

#[test]
fn test_invalid_transition_carries_states() {
    let id = RequestId::new();
    let err = validate_transition(id, RequestStatus::Rejected, RequestStatus::Approved).unwrap_err();
    assert_eq!(
        err,
        WorkflowError::InvalidTransition {
            request: id,
            from: RequestStatus::Rejected,
            to: RequestStatus::Approved,
        }
    );
}

fn any_status() -> impl Strategy<Value = RequestStatus> {
    prop_oneof![
        Just(RequestStatus::Queued),
        Just(RequestStatus::Approved),
        Just(RequestStatus::Executing),
        Just(RequestStatus::Completed),
        Just(RequestStatus::Failed),
        Just(RequestStatus::RolledBack),
        Just(RequestStatus::Rejected),
    ]
}

proptest! {
    #[test]
    fn prop_validate_matches_allowed(from in any_status(), to in any_status()) {
        let res = validate_transition(RequestId::new(), from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            prop_assert!(allowed.contains(&to));
        } else {
            prop_assert!(!allowed.contains(&to));
        }
    }

    #[test]
    fn prop_terminal_states_have_no_exit(from in any_status(), to in any_status()) {
        if from.is_terminal() {
            prop_assert!(validate_transition(RequestId::new(), from, to).is_err());
        }
    }
}
