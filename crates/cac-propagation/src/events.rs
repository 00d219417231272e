//! Bus events

use crate::message::PropagationMessage;
use cac_core::{ComponentId, MessageId, NamedEvent};

/// Events emitted by the propagation bus
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Accepted into the queue
    MessageQueued { message: PropagationMessage },
    /// Dispatched with every delivery succeeding
    MessageSent {
        message: PropagationMessage,
        delivered: usize,
    },
    /// A delivery failed after its retries
    MessageFailed {
        message: PropagationMessage,
        component_id: ComponentId,
        error: String,
    },
    /// TTL elapsed before dispatch
    MessageExpired {
        message: PropagationMessage,
        age_ms: u64,
    },
    /// Trimmed from the queue tail on overflow
    MessageDropped { message: PropagationMessage },
    /// Peer-to-peer delivery acknowledged
    MessageAcknowledged {
        message_id: MessageId,
        component_id: ComponentId,
    },
    /// Event-driven re-emission; `name` is the change type
    ChannelEvent {
        name: String,
        message: PropagationMessage,
    },
}

impl NamedEvent for BusEvent {
    fn name(&self) -> &'static str {
        match self {
            BusEvent::MessageQueued { .. } => "message-queued",
            BusEvent::MessageSent { .. } => "message-sent",
            BusEvent::MessageFailed { .. } => "message-failed",
            BusEvent::MessageExpired { .. } => "message-expired",
            BusEvent::MessageDropped { .. } => "message-dropped",
            BusEvent::MessageAcknowledged { .. } => "message-acknowledged",
            BusEvent::ChannelEvent { .. } => "channel-event",
        }
    }
}
