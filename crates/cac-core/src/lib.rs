//! CAC Core - shared vocabulary of the adaptation coordinator
//!
//! Everything the detection, propagation and modification layers agree on:
//! - Identifiers for components, detections, messages and requests
//! - Pattern detections and capability levels
//! - The introspectable [`Component`] interface and instrumentation hooks
//! - Typed, ordered event streams
//! - Layered configuration loaded from TOML
//!
//! # Example
//!
//! ```rust,ignore
//! use cac_core::{AdaptationConfig, CapabilityLevel};
//!
//! let config = AdaptationConfig::from_toml_str(r#"
//!     [detection]
//!     confidence_threshold = 0.8
//! "#)?;
//! assert!(CapabilityLevel::Structural > CapabilityLevel::Behavior);
//! ```

#![warn(unreachable_pub)]

pub mod component;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use component::{
    CapabilitySummary, Component, FeatureSupport, HealthRecommendation, HealthSnapshot,
    HealthStatus, HookContext, HookOutcome, InstrumentationPoint, ObservedError, VersionInfo,
};
pub use config::{
    AdaptationConfig, ControllerConfig, DetectionConfig, ModificationConfig, PropagationConfig,
};
pub use error::ConfigError;
pub use events::{EventStream, NamedEvent};
pub use types::{
    CapabilityLevel, ComponentId, DetectionId, Evidence, MessageId, PatternDetection,
    PatternType, RequestId,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the adaptation coordinator
    pub use crate::{
        AdaptationConfig, CapabilityLevel, Component, ComponentId, EventStream, HealthSnapshot,
        HookContext, InstrumentationPoint, NamedEvent, PatternDetection, PatternType,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
