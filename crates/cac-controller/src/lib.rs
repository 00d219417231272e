//! CAC Controller - the adaptation controller
//!
//! Composes the detection instrumentor, the propagation bus and the
//! modification workflow behind one owned context:
//! 1. **Instrument**: sensors, bus subscription and a default capability per component
//! 2. **React**: detections are broadcast, auto-reactions become modification requests
//! 3. **Observe**: one unified event stream and adaptive health per component
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cac_controller::prelude::*;
//!
//! let controller = AdaptationController::new(AdaptationConfig::default())?;
//! controller.start();
//! controller.instrument(Arc::new(my_adapter));
//!
//! let outcome = controller
//!     .pre_conversion(&"mcp".into(), HookContext::with_data(payload))
//!     .await;
//! let health = controller.adaptive_health(&"mcp".into()).await?;
//!
//! controller.shutdown().await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod controller;
pub mod error;
pub mod events;
pub mod health;
pub mod reaction;
pub mod simulation;

pub use controller::{AdaptationController, ADAPTATION, HEALTH_CHANGE, PATTERN_DETECTED};
pub use error::ControllerError;
pub use events::{AdaptationEvent, ControllerEvent};
pub use health::{AdaptationStatus, AdaptiveHealth};
pub use reaction::request_for;
pub use simulation::{fast_config, run_simulation, SimulationConfig, SimulationReport};

/// Common imports for hosting a controller
pub mod prelude {
    pub use crate::{AdaptationController, AdaptationEvent, AdaptiveHealth, ControllerError};
    pub use cac_core::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
