//! Propagation messages and channels

use cac_core::{ComponentId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Delivery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Broadcast,
    Targeted,
    Hierarchical,
    PeerToPeer,
    EventDriven,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Broadcast,
        Channel::Targeted,
        Channel::Hierarchical,
        Channel::PeerToPeer,
        Channel::EventDriven,
    ];

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Broadcast => "broadcast",
            Channel::Targeted => "targeted",
            Channel::Hierarchical => "hierarchical",
            Channel::PeerToPeer => "peer-to-peer",
            Channel::EventDriven => "event-driven",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message recipients
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Targets {
    /// Every component
    #[default]
    All,
    /// Named components
    Components(BTreeSet<ComponentId>),
}

impl Targets {
    /// Target set from component ids
    pub fn of<I, C>(ids: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ComponentId>,
    {
        Self::Components(ids.into_iter().map(Into::into).collect())
    }

    #[inline]
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Targets::All)
    }

    /// Whether `id` is addressed
    #[must_use]
    pub fn contains(&self, id: &ComponentId) -> bool {
        match self {
            Targets::All => true,
            Targets::Components(ids) => ids.contains(id),
        }
    }
}

/// A queued change notification
///
/// Consumed exactly once by the drain loop: delivered or expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    pub source: ComponentId,
    pub targets: Targets,
    /// Kind of change (`pattern-detected`, `adaptation`, `health-change`, ...)
    pub change_type: String,
    pub payload: Value,
    /// Higher is more urgent
    pub priority: i32,
    pub ttl_ms: u64,
    pub requires_ack: bool,
}

impl PropagationMessage {
    /// Time to live
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Per-message options for `propagate`
///
/// Unset fields fall back to the bus configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropagateOptions {
    pub channel: Option<Channel>,
    pub source: Option<ComponentId>,
    pub targets: Targets,
    pub priority: Option<i32>,
    pub ttl: Option<Duration>,
    pub requires_ack: bool,
}

impl PropagateOptions {
    /// Broadcast to every subscriber
    #[must_use]
    pub fn broadcast() -> Self {
        Self {
            channel: Some(Channel::Broadcast),
            ..Self::default()
        }
    }

    /// Deliver to the given components only
    #[must_use]
    pub fn targeted<I, C>(ids: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ComponentId>,
    {
        Self {
            channel: Some(Channel::Targeted),
            targets: Targets::of(ids),
            ..Self::default()
        }
    }

    /// Deliver to the source's topology neighbours
    #[must_use]
    pub fn hierarchical(source: impl Into<ComponentId>) -> Self {
        Self {
            channel: Some(Channel::Hierarchical),
            source: Some(source.into()),
            ..Self::default()
        }
    }

    /// Deliver to the given peers with per-delivery acknowledgment
    #[must_use]
    pub fn peer_to_peer<I, C>(ids: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ComponentId>,
    {
        Self {
            channel: Some(Channel::PeerToPeer),
            targets: Targets::of(ids),
            requires_ack: true,
            ..Self::default()
        }
    }

    /// Re-emit as a named bus event
    #[must_use]
    pub fn event_driven() -> Self {
        Self {
            channel: Some(Channel::EventDriven),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_source(mut self, source: impl Into<ComponentId>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_ack(mut self, requires_ack: bool) -> Self {
        self.requires_ack = requires_ack;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_all_contains_everyone() {
        assert!(Targets::All.contains(&"anything".into()));
        let named = Targets::of(["mcp", "a2a"]);
        assert!(named.contains(&"a2a".into()));
        assert!(!named.contains(&"acp".into()));
    }

    #[test]
    fn channel_wire_names() {
        let json = serde_json::to_string(&Channel::PeerToPeer).unwrap();
        assert_eq!(json, "\"peer-to-peer\"");
        assert_eq!(Channel::EventDriven.to_string(), "event-driven");
    }

    #[test]
    fn peer_to_peer_requires_ack_by_default() {
        let options = PropagateOptions::peer_to_peer(["a2a"]);
        assert!(options.requires_ack);
        assert_eq!(options.channel, Some(Channel::PeerToPeer));
    }
}
