//! Hierarchical delivery topology: source component -> adjacent components

use cac_core::ComponentId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology {
    edges: BTreeMap<ComponentId, BTreeSet<ComponentId>>,
}

impl Topology {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[propagation.topology]` config table
    #[must_use]
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Self {
        let edges = table
            .iter()
            .map(|(source, targets)| {
                (
                    ComponentId::new(source.as_str()),
                    targets.iter().map(|t| ComponentId::new(t.as_str())).collect(),
                )
            })
            .collect();
        Self { edges }
    }

    #[must_use]
    pub fn with_edge<I, C>(mut self, source: impl Into<ComponentId>, targets: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ComponentId>,
    {
        self.add_edges(source, targets);
        self
    }

    pub fn add_edges<I, C>(&mut self, source: impl Into<ComponentId>, targets: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<ComponentId>,
    {
        self.edges
            .entry(source.into())
            .or_default()
            .extend(targets.into_iter().map(Into::into));
    }

    /// Components adjacent to `source`; empty when unknown
    #[must_use]
    pub fn adjacent(&self, source: &ComponentId) -> Vec<ComponentId> {
        self.edges
            .get(source)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &ComponentId> {
        self.edges.keys()
    }
}
