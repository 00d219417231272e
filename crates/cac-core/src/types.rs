//! Core types for the adaptation coordinator
//!
//! Defines the identifiers and records shared by every layer:
//! - Sortable ULID identifiers for detections, messages and requests
//! - Component identifiers
//! - Pattern detections produced by sensors
//! - The ordered capability ladder gating self-modification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(
    /// Unique detection identifier
    DetectionId
);
ulid_id!(
    /// Unique propagation message identifier
    MessageId
);
ulid_id!(
    /// Unique modification request identifier
    RequestId
);

/// Identifier of an instrumented component (an adapter such as `mcp` or `a2a`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    /// Create a component id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind of change pattern a sensor can detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    /// Incompatible upstream change
    BreakingChange,
    /// Feature scheduled for removal
    Deprecation,
    /// New capability worth adopting
    Enhancement,
    /// Security advisory
    Security,
    /// Performance opportunity
    Optimization,
}

impl PatternType {
    /// All pattern types
    pub const ALL: [PatternType; 5] = [
        PatternType::BreakingChange,
        PatternType::Deprecation,
        PatternType::Enhancement,
        PatternType::Security,
        PatternType::Optimization,
    ];

    /// Wire name of the pattern type
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::BreakingChange => "breaking-change",
            PatternType::Deprecation => "deprecation",
            PatternType::Enhancement => "enhancement",
            PatternType::Security => "security",
            PatternType::Optimization => "optimization",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form evidence attached to a detection
pub type Evidence = BTreeMap<String, serde_json::Value>;

/// A qualifying observation produced by a sensor
///
/// Read-only once created; retained in a bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDetection {
    /// Detection identifier
    pub id: DetectionId,
    /// When the sensor produced it
    pub timestamp: DateTime<Utc>,
    /// Component the detection is about
    pub component_id: ComponentId,
    /// Pattern classification
    pub pattern_type: PatternType,
    /// Human-readable description
    pub description: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Supporting evidence
    pub evidence: Evidence,
    /// Suggested reaction
    pub suggested_action: String,
}

impl PatternDetection {
    /// Create a detection stamped with the current time
    ///
    /// Confidence is clamped into `[0, 1]`.
    #[must_use]
    pub fn new(
        component_id: ComponentId,
        pattern_type: PatternType,
        description: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: DetectionId::new(),
            timestamp: Utc::now(),
            component_id,
            pattern_type,
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
            evidence: Evidence::new(),
            suggested_action: String::new(),
        }
    }

    /// Add one evidence entry
    #[inline]
    #[must_use]
    pub fn with_evidence(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }

    /// Set the suggested action
    #[inline]
    #[must_use]
    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = action.into();
        self
    }

    /// Override the timestamp
    #[inline]
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether this detection clears a confidence threshold
    #[inline]
    #[must_use]
    pub fn meets(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// Ordered permission tier gating which modifications a component may authorize
///
/// `None < Configuration < Behavior < Structural < Full`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityLevel {
    /// No self-modification
    #[default]
    None,
    /// Configuration and mapping tweaks
    Configuration,
    /// New handlers, wrappers and patches
    Behavior,
    /// Structural migrations
    Structural,
    /// Anything
    Full,
}

impl CapabilityLevel {
    /// All levels in ascending order
    pub const ALL: [CapabilityLevel; 5] = [
        CapabilityLevel::None,
        CapabilityLevel::Configuration,
        CapabilityLevel::Behavior,
        CapabilityLevel::Structural,
        CapabilityLevel::Full,
    ];

    /// Numeric rank
    #[inline]
    #[must_use]
    pub fn value(&self) -> u8 {
        match self {
            CapabilityLevel::None => 0,
            CapabilityLevel::Configuration => 1,
            CapabilityLevel::Behavior => 2,
            CapabilityLevel::Structural => 3,
            CapabilityLevel::Full => 4,
        }
    }

    /// Whether a component registered at this level may authorize `required`
    #[inline]
    #[must_use]
    pub fn permits(&self, required: CapabilityLevel) -> bool {
        *self >= required
    }

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityLevel::None => "none",
            CapabilityLevel::Configuration => "configuration",
            CapabilityLevel::Behavior => "behavior",
            CapabilityLevel::Structural => "structural",
            CapabilityLevel::Full => "full",
        }
    }
}

impl fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CapabilityLevel::None),
            "configuration" => Ok(CapabilityLevel::Configuration),
            "behavior" => Ok(CapabilityLevel::Behavior),
            "structural" => Ok(CapabilityLevel::Structural),
            "full" => Ok(CapabilityLevel::Full),
            other => Err(format!("unknown capability level: {other}")),
        }
    }
}
