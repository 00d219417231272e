//! Error types for the propagation bus

use crate::message::Channel;
use cac_core::ComponentId;

/// Synchronous rejection from `propagate`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Targeted delivery with an empty target set
    #[error("{channel} message has no targets")]
    EmptyTargets {
        /// Channel requested
        channel: Channel,
    },
}

/// Failure of a single delivery to a subscription
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Handler returned an error
    #[error("handler for {component} failed: {reason}")]
    Handler {
        component: ComponentId,
        reason: String,
    },

    /// Handler did not finish within the acknowledgment timeout
    #[error("handler for {component} was not acknowledged within {timeout_ms}ms")]
    AckTimeout {
        component: ComponentId,
        timeout_ms: u64,
    },

    /// Handler panicked
    #[error("handler for {component} panicked")]
    Panicked { component: ComponentId },
}

impl DispatchError {
    /// Create a handler failure
    #[inline]
    pub fn handler(component: impl Into<ComponentId>, reason: impl Into<String>) -> Self {
        Self::Handler {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Whether another delivery attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Handler { .. } | Self::AckTimeout { .. })
    }

    /// Component the delivery was addressed to
    #[must_use]
    pub fn component(&self) -> &ComponentId {
        match self {
            Self::Handler { component, .. }
            | Self::AckTimeout { component, .. }
            | Self::Panicked { component } => component,
        }
    }
}
