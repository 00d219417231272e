//! Controller events and the unified adaptation event surface

use cac_core::{CapabilityLevel, ComponentId, MessageId, NamedEvent, PatternDetection};
use cac_detection::DetectionEvent;
use cac_modification::WorkflowEvent;
use cac_propagation::{BusEvent, PropagationMessage};

/// Events raised by the controller itself
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Sensors installed, bus subscription and capability granted
    AdapterInstrumented {
        component_id: ComponentId,
        sensors: usize,
        capability: CapabilityLevel,
    },
    /// The controller put a message on the bus
    AdaptationPropagated {
        message_id: MessageId,
        component_id: ComponentId,
        change_type: String,
    },
    /// Another component reported a pattern this component may share
    RelatedPattern {
        component_id: ComponentId,
        detection: Box<PatternDetection>,
    },
    /// Another component announced a finished adaptation
    AdaptationObserved {
        component_id: ComponentId,
        message: PropagationMessage,
    },
}

impl NamedEvent for ControllerEvent {
    fn name(&self) -> &'static str {
        match self {
            ControllerEvent::AdapterInstrumented { .. } => "adapter-instrumented",
            ControllerEvent::AdaptationPropagated { .. } => "adaptation-propagated",
            ControllerEvent::RelatedPattern { .. } => "related-pattern",
            ControllerEvent::AdaptationObserved { .. } => "adaptation-observed",
        }
    }
}

/// Every event of every layer, as seen by controller observers
#[derive(Debug, Clone, PartialEq)]
pub enum AdaptationEvent {
    Detection(DetectionEvent),
    Bus(BusEvent),
    Workflow(WorkflowEvent),
    Controller(ControllerEvent),
}

impl NamedEvent for AdaptationEvent {
    fn name(&self) -> &'static str {
        match self {
            AdaptationEvent::Detection(e) => e.name(),
            AdaptationEvent::Bus(e) => e.name(),
            AdaptationEvent::Workflow(e) => e.name(),
            AdaptationEvent::Controller(e) => e.name(),
        }
    }
}

impl From<DetectionEvent> for AdaptationEvent {
    fn from(event: DetectionEvent) -> Self {
        AdaptationEvent::Detection(event)
    }
}

impl From<BusEvent> for AdaptationEvent {
    fn from(event: BusEvent) -> Self {
        AdaptationEvent::Bus(event)
    }
}

impl From<WorkflowEvent> for AdaptationEvent {
    fn from(event: WorkflowEvent) -> Self {
        AdaptationEvent::Workflow(event)
    }
}

impl From<ControllerEvent> for AdaptationEvent {
    fn from(event: ControllerEvent) -> Self {
        AdaptationEvent::Controller(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cac_core::PatternType;

    #[test]
    fn unified_names_delegate_to_layer() {
        let detection = PatternDetection::new("mcp".into(), PatternType::Deprecation, "old", 0.85);
        let event: AdaptationEvent = DetectionEvent::AutoReaction {
            detection: detection.clone(),
        }
        .into();
        assert_eq!(event.name(), "auto-reaction");

        let related: AdaptationEvent = ControllerEvent::RelatedPattern {
            component_id: "a2a".into(),
            detection: Box::new(detection),
        }
        .into();
        assert_eq!(related.name(), "related-pattern");
    }
}
