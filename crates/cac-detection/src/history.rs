//! Bounded detection history and per-component error observations
//!
//! Both structures are FIFO ring buffers: once full, the oldest entry is
//! evicted to make room. The error log also drops observations that fell out
//! of its rolling window.

use cac_core::{ComponentId, PatternDetection, PatternType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Size-capped detection history, oldest first
#[derive(Debug, Clone)]
pub struct DetectionHistory {
    entries: VecDeque<PatternDetection>,
    capacity: usize,
}

impl DetectionHistory {
    /// Create a history holding at most `capacity` detections
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Record a detection, evicting the oldest when full
    pub fn push(&mut self, detection: PatternDetection) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(detection);
    }

    /// Number of retained detections
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate oldest → newest
    pub fn iter(&self) -> impl Iterator<Item = &PatternDetection> {
        self.entries.iter()
    }

    /// Owned copy of the history
    #[must_use]
    pub fn snapshot(&self) -> Vec<PatternDetection> {
        self.entries.iter().cloned().collect()
    }

    /// Detections for one component
    #[must_use]
    pub fn for_component(&self, component_id: &ComponentId) -> Vec<PatternDetection> {
        self.entries
            .iter()
            .filter(|d| &d.component_id == component_id)
            .cloned()
            .collect()
    }

    /// Detections of one pattern type
    #[must_use]
    pub fn of_type(&self, pattern_type: PatternType) -> Vec<PatternDetection> {
        self.entries
            .iter()
            .filter(|d| d.pattern_type == pattern_type)
            .cloned()
            .collect()
    }

    /// Count detections at or after `since`, optionally for one component
    #[must_use]
    pub fn count_since(&self, component_id: Option<&ComponentId>, since: DateTime<Utc>) -> usize {
        self.entries
            .iter()
            .filter(|d| d.timestamp >= since)
            .filter(|d| component_id.map_or(true, |id| &d.component_id == id))
            .count()
    }
}

/// One error seen at the error-recovery point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObservation {
    /// Error kind used for grouping
    pub kind: String,
    /// Error message
    pub message: String,
    /// When it was observed
    pub at: DateTime<Utc>,
}

/// Per-component bounded log of observed errors
#[derive(Debug, Clone)]
pub struct ErrorLog {
    per_component: HashMap<ComponentId, VecDeque<ErrorObservation>>,
    capacity: usize,
    window: Duration,
}

impl ErrorLog {
    /// Create a log keeping at most `capacity` observations per component,
    /// none older than `window` relative to the newest one
    #[must_use]
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            per_component: HashMap::new(),
            capacity: capacity.max(1),
            window,
        }
    }

    /// Record an observation
    pub fn record(&mut self, component_id: &ComponentId, observation: ErrorObservation) {
        let entries = self.per_component.entry(component_id.clone()).or_default();
        let cutoff = chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| observation.at.checked_sub_signed(window));
        if let Some(cutoff) = cutoff {
            while entries.front().is_some_and(|oldest| oldest.at < cutoff) {
                entries.pop_front();
            }
        }
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(observation);
    }

    /// Observations for a component, oldest first
    #[must_use]
    pub fn for_component(&self, component_id: &ComponentId) -> Vec<ErrorObservation> {
        self.per_component
            .get(component_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget a component
    pub fn remove(&mut self, component_id: &ComponentId) {
        self.per_component.remove(component_id);
    }
}
