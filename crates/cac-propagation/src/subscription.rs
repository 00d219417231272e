//! Subscriptions and delivery handlers

use crate::error::DispatchError;
use crate::message::PropagationMessage;
use async_trait::async_trait;
use cac_core::ComponentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Receives messages delivered to a subscription
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, message: &PropagationMessage) -> Result<(), DispatchError>;
}

/// Subscription identifier, unique per bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Declarative delivery filter
///
/// An empty set means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageFilter {
    pub change_types: BTreeSet<String>,
    pub min_priority: Option<i32>,
    pub sources: BTreeSet<ComponentId>,
}

impl MessageFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn change_type(mut self, change_type: impl Into<String>) -> Self {
        self.change_types.insert(change_type.into());
        self
    }

    #[must_use]
    pub fn min_priority(mut self, priority: i32) -> Self {
        self.min_priority = Some(priority);
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<ComponentId>) -> Self {
        self.sources.insert(source.into());
        self
    }

    /// Whether a message passes the filter
    #[must_use]
    pub fn matches(&self, message: &PropagationMessage) -> bool {
        (self.change_types.is_empty() || self.change_types.contains(&message.change_type))
            && self.min_priority.map_or(true, |min| message.priority >= min)
            && (self.sources.is_empty() || self.sources.contains(&message.source))
    }
}

/// A component's interest in propagated changes
#[derive(Clone)]
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub component_id: ComponentId,
    pub handler: Arc<dyn ChangeHandler>,
    pub filter: Option<MessageFilter>,
    /// Higher priorities are delivered first within a component
    pub priority: i32,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("component_id", &self.component_id)
            .field("filter", &self.filter)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Subscription with no filter at priority 0
    pub fn new(component_id: impl Into<ComponentId>, handler: Arc<dyn ChangeHandler>) -> Self {
        Self {
            id: SubscriptionId(0),
            component_id: component_id.into(),
            handler,
            filter: None,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: MessageFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Identifier assigned by the bus
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether this subscription wants the message
    #[must_use]
    pub fn accepts(&self, message: &PropagationMessage) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(message))
    }
}
