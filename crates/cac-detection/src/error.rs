//! Error types for the detection layer
//!
//! Sensor failures are always local: the instrumentor logs them, emits
//! `sensor-failed` and moves on to the next sensor.

/// Sensor failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    /// The probe returned an error
    #[error("sensor {sensor} failed: {reason}")]
    ProbeFailed {
        /// Sensor name
        sensor: String,
        /// Failure description
        reason: String,
    },

    /// The probe panicked
    #[error("sensor {sensor} panicked")]
    Panicked {
        /// Sensor name
        sensor: String,
    },
}

impl SensorError {
    /// Create a probe failure
    #[inline]
    pub fn failed(sensor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            sensor: sensor.into(),
            reason: reason.into(),
        }
    }
}
