//! Controller errors

use cac_core::{ComponentId, ConfigError};
use cac_modification::WorkflowError;
use cac_propagation::BusError;

/// Errors surfaced by the adaptation controller
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Propagation bus rejected a message
    #[error("propagation error: {0}")]
    Bus(#[from] BusError),

    /// Modification workflow error
    #[error("modification error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Operation on a component that was never instrumented
    #[error("component {0} is not instrumented")]
    NotInstrumented(ComponentId),
}

impl ControllerError {
    /// Whether the error came from the caller rather than a collaborator
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        match self {
            ControllerError::NotInstrumented(_)
            | ControllerError::Config(_)
            | ControllerError::Bus(BusError::EmptyTargets { .. }) => true,
            ControllerError::Workflow(e) => e.is_synchronous_rejection(),
        }
    }
}
