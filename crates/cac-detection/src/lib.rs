//! CAC Detection - the detection instrumentor
//!
//! Installs typed sensors per component and runs them whenever the host
//! pipeline reaches an instrumentation point:
//! - Each sensor is isolated; an error or panic in one never blocks the others
//! - Detections under the confidence threshold are discarded outright
//! - Qualifying detections land in a bounded history and are emitted as events
//! - Error-recovery detections schedule a debounced auto-reaction
//!
//! # Example
//!
//! ```rust,ignore
//! use cac_detection::DetectionInstrumentor;
//! use cac_core::{DetectionConfig, HookContext, InstrumentationPoint};
//!
//! let instrumentor = DetectionInstrumentor::new(DetectionConfig::default());
//! instrumentor.install_sensors(&component);
//! let detections = instrumentor
//!     .run_sensor_check(&component, InstrumentationPoint::PreConversion, &HookContext::default())
//!     .await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod events;
pub mod history;
pub mod instrumentor;
pub mod sensors;

pub use error::SensorError;
pub use events::DetectionEvent;
pub use history::{DetectionHistory, ErrorLog, ErrorObservation};
pub use instrumentor::DetectionInstrumentor;
pub use sensors::{
    builtin_sensors, ApiSurfaceSensor, BehaviorSensor, ErrorPatternSensor, Sensor,
    SensorContext, SensorKind, VersionSensor,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
