//! Modification requests generated from auto-reactions

use cac_core::PatternDetection;
use cac_modification::{
    ChangeOperation, ModificationChange, ModificationRequest, ModificationType, RollbackPlan,
    RollbackStep,
};
use serde_json::json;

/// Rollback step kind used by generated requests
pub const RESTORE_SNAPSHOT: &str = "restore-snapshot";

/// Build the request proposed for a detection
///
/// One `modify` change against the component carrying the suggested action,
/// undone by a single automated snapshot restore.
#[must_use]
pub fn request_for(detection: &PatternDetection, approval_required: bool) -> ModificationRequest {
    let modification_type = ModificationType::for_pattern(detection.pattern_type);
    let change = ModificationChange::new(detection.component_id.as_str(), ChangeOperation::Modify)
        .with_after(json!({
            "suggested_action": detection.suggested_action,
            "detection_id": detection.id.to_string(),
            "pattern_type": detection.pattern_type,
        }));

    ModificationRequest::new(
        detection.component_id.clone(),
        modification_type,
        detection.description.clone(),
    )
    .with_change(change)
    .with_rollback_plan(RollbackPlan::automated(vec![RollbackStep::new(
        1,
        RESTORE_SNAPSHOT,
        format!("restore {} to its pre-modification snapshot", detection.component_id),
    )]))
    .with_confidence(detection.confidence)
    .with_approval_required(approval_required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cac_core::{CapabilityLevel, PatternType};

    #[test]
    fn deprecation_becomes_wrapper_request() {
        let detection =
            PatternDetection::new("mcp".into(), PatternType::Deprecation, "deprecated", 0.85)
                .with_suggested_action("wrap deprecated surface");
        let request = request_for(&detection, true);

        assert_eq!(request.modification_type, ModificationType::DeprecationWrapper);
        assert_eq!(request.modification_type.required_level(), CapabilityLevel::Behavior);
        assert_eq!(request.changes.len(), 1);
        assert_eq!(request.changes[0].target, "mcp");
        assert_eq!(
            request.changes[0].after.as_ref().map(|v| v["suggested_action"].clone()),
            Some(json!("wrap deprecated surface"))
        );
        assert!(request.rollback_plan.automated);
        assert_eq!(request.rollback_plan.steps[0].kind, RESTORE_SNAPSHOT);
        assert!((request.confidence - 0.85).abs() < 1e-9);
        assert!(request.approval_required);
    }
}
