//! Per-component capability ceilings

use crate::error::WorkflowError;
use cac_core::{CapabilityLevel, ComponentId};
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Registered capability level per component; unregistered means `None`
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    levels: DashMap<ComponentId, CapabilityLevel>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ceiling; returns the previous level
    pub fn register(&self, component_id: ComponentId, level: CapabilityLevel) -> Option<CapabilityLevel> {
        self.levels.insert(component_id, level)
    }

    #[must_use]
    pub fn level_of(&self, component_id: &ComponentId) -> CapabilityLevel {
        self.levels
            .get(component_id)
            .map(|l| *l)
            .unwrap_or_default()
    }

    /// Ensure `component_id` may authorize a modification needing `required`
    ///
    /// # Errors
    /// `InsufficientCapability` when the registered level is lower.
    pub fn check(
        &self,
        component_id: &ComponentId,
        required: CapabilityLevel,
    ) -> Result<CapabilityLevel, WorkflowError> {
        let registered = self.level_of(component_id);
        if registered.permits(required) {
            Ok(registered)
        } else {
            Err(WorkflowError::InsufficientCapability {
                component: component_id.clone(),
                registered,
                required,
            })
        }
    }

    pub fn remove(&self, component_id: &ComponentId) -> Option<CapabilityLevel> {
        self.levels.remove(component_id).map(|(_, level)| level)
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<ComponentId, CapabilityLevel> {
        self.levels
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_components_hold_nothing() {
        let registry = CapabilityRegistry::new();
        assert_eq!(registry.level_of(&"ghost".into()), CapabilityLevel::None);
        assert!(registry
            .check(&"ghost".into(), CapabilityLevel::Configuration)
            .is_err());
        assert!(registry.check(&"ghost".into(), CapabilityLevel::None).is_ok());
    }

    #[test]
    fn register_replaces_level() {
        let registry = CapabilityRegistry::new();
        registry.register("mcp".into(), CapabilityLevel::Behavior);
        let previous = registry.register("mcp".into(), CapabilityLevel::Full);
        assert_eq!(previous, Some(CapabilityLevel::Behavior));
        assert_eq!(registry.snapshot().len(), 1);
    }
}
