//! Detection events

use crate::sensors::SensorKind;
use cac_core::{ComponentId, InstrumentationPoint, NamedEvent, PatternDetection};

/// Events emitted by the detection instrumentor
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
    /// A detection cleared the threshold and was recorded
    PatternDetected {
        detection: PatternDetection,
        point: InstrumentationPoint,
    },
    /// Debounced reaction to an error-recovery detection
    AutoReaction { detection: PatternDetection },
    /// A sensor failed or panicked; the check continued without it
    SensorFailed {
        component_id: ComponentId,
        sensor: SensorKind,
        error: String,
    },
}

impl NamedEvent for DetectionEvent {
    fn name(&self) -> &'static str {
        match self {
            DetectionEvent::PatternDetected { .. } => "pattern-detected",
            DetectionEvent::AutoReaction { .. } => "auto-reaction",
            DetectionEvent::SensorFailed { .. } => "sensor-failed",
        }
    }
}
