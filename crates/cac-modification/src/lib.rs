//! CAC Modification - capability-gated self-modification workflow
//!
//! Tracks modification requests from submission to completion:
//! - Capability gating by modification type
//! - Approval and rejection of queued requests
//! - Validated, ordered change application through a [`ChangeApplier`]
//! - Rollback plans run through a [`RollbackExecutor`] under a timeout
//! - Bounded execution history and serializable snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use cac_modification::{ModificationRequest, ModificationType, ModificationWorkflow};
//!
//! let workflow = ModificationWorkflow::new(ModificationConfig::default());
//! workflow.register_capability("mcp", CapabilityLevel::Behavior);
//! let outcome = workflow
//!     .request_modification(ModificationRequest::new("mcp", ModificationType::NewHandler, "add sampling"))
//!     .await?;
//! workflow.approve(outcome.request_id()).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod capability;
pub mod error;
pub mod events;
pub mod extension;
pub mod state;
pub mod types;
pub mod workflow;

pub use capability::CapabilityRegistry;
pub use error::WorkflowError;
pub use events::WorkflowEvent;
pub use extension::{
    check_builtin_rule, BookkeepingApplier, ChangeApplier, ExtensionError, NoopRollbackExecutor,
    RollbackExecutor,
};
pub use state::{allowed_transitions, validate_transition};
pub use types::{
    ChangeOperation, ExecutionStatus, ModificationChange, ModificationExecution,
    ModificationRequest, ModificationType, RequestOutcome, RequestStatus, RollbackPlan,
    RollbackStep, ValidationRule,
};
pub use workflow::{ModificationWorkflow, WorkflowSnapshot};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
