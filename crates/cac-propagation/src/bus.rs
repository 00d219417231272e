//! The propagation bus

use crate::error::{BusError, DispatchError};
use crate::events::BusEvent;
use crate::message::{Channel, PropagateOptions, PropagationMessage, Targets};
use crate::queue::MessageQueue;
use crate::subscription::{Subscription, SubscriptionId};
use crate::topology::Topology;
use cac_core::{ComponentId, EventStream, MessageId, PropagationConfig};
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Source used when `propagate` is called without one
pub const SYSTEM_SOURCE: &str = "system";

/// Outcome of one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Messages whose every delivery succeeded
    pub delivered: usize,
    /// Messages dropped because their TTL elapsed
    pub expired: usize,
    /// Messages with at least one failed delivery
    pub failed: usize,
}

impl DrainReport {
    /// Messages dequeued in this cycle
    #[must_use]
    pub fn total(&self) -> usize {
        self.delivered + self.expired + self.failed
    }
}

/// Priority/TTL message bus with five delivery channels
pub struct PropagationBus {
    config: PropagationConfig,
    queue: Mutex<MessageQueue>,
    subscriptions: DashMap<ComponentId, Vec<Subscription>>,
    topology: RwLock<Topology>,
    events: EventStream<BusEvent>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for PropagationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationBus")
            .field("queued", &self.queue_len())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl PropagationBus {
    /// Create a bus using the topology from the configuration
    #[must_use]
    pub fn new(config: PropagationConfig) -> Self {
        let topology = Topology::from_table(&config.topology);
        Self::with_topology(config, topology)
    }

    /// Create a bus with an explicit topology
    #[must_use]
    pub fn with_topology(config: PropagationConfig, topology: Topology) -> Self {
        Self {
            queue: Mutex::new(MessageQueue::new(config.max_queue_size)),
            subscriptions: DashMap::new(),
            topology: RwLock::new(topology),
            events: EventStream::new("propagation"),
            next_subscription: AtomicU64::new(1),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &EventStream<BusEvent> {
        &self.events
    }

    #[must_use]
    pub fn topology(&self) -> Topology {
        self.topology.read().clone()
    }

    pub fn set_topology(&self, topology: Topology) {
        *self.topology.write() = topology;
    }

    /// Queue a change message
    ///
    /// # Errors
    /// `EmptyTargets` when a targeted or peer-to-peer message names no component.
    pub fn propagate(
        &self,
        change_type: impl Into<String>,
        payload: Value,
        options: PropagateOptions,
    ) -> Result<MessageId, BusError> {
        let channel = options.channel.unwrap_or(Channel::Broadcast);
        if matches!(channel, Channel::Targeted | Channel::PeerToPeer) {
            if let Targets::Components(ids) = &options.targets {
                if ids.is_empty() {
                    return Err(BusError::EmptyTargets { channel });
                }
            }
        }

        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
        let message = PropagationMessage {
            id: MessageId::new(),
            timestamp: Utc::now(),
            channel,
            source: options
                .source
                .unwrap_or_else(|| ComponentId::new(SYSTEM_SOURCE)),
            targets: options.targets,
            change_type: change_type.into(),
            payload,
            priority: options.priority.unwrap_or(self.config.default_priority),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            requires_ack: options.requires_ack,
        };
        let id = message.id;

        tracing::debug!(
            message = %id,
            channel = %channel,
            change_type = %message.change_type,
            priority = message.priority,
            "message queued"
        );
        let dropped = self.queue.lock().push(message.clone());
        self.events.emit(BusEvent::MessageQueued { message });
        for message in dropped {
            tracing::warn!(message = %message.id, priority = message.priority, "queue full, message dropped");
            self.events.emit(BusEvent::MessageDropped { message });
        }
        Ok(id)
    }

    /// Register a subscription; returns its identifier
    pub fn subscribe(&self, mut subscription: Subscription) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        subscription.id = id;
        tracing::debug!(component = %subscription.component_id, subscription = %id, "subscribed");
        self.subscriptions
            .entry(subscription.component_id.clone())
            .or_default()
            .push(subscription);
        id
    }

    /// Remove one subscription
    pub fn unsubscribe(&self, component_id: &ComponentId, subscription: SubscriptionId) -> bool {
        let removed = self
            .subscriptions
            .get_mut(component_id)
            .map(|mut subs| {
                let before = subs.len();
                subs.retain(|s| s.id != subscription);
                subs.len() != before
            })
            .unwrap_or(false);
        self.subscriptions
            .remove_if(component_id, |_, subs| subs.is_empty());
        removed
    }

    /// Remove every subscription of a component; returns how many were removed
    pub fn unsubscribe_all(&self, component_id: &ComponentId) -> usize {
        self.subscriptions
            .remove(component_id)
            .map_or(0, |(_, subs)| subs.len())
    }

    /// Total number of subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.iter().map(|e| e.value().len()).sum()
    }

    /// Subscriptions held by one component
    #[must_use]
    pub fn subscriptions_of(&self, component_id: &ComponentId) -> usize {
        self.subscriptions.get(component_id).map_or(0, |s| s.len())
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queued messages in dispatch order
    #[must_use]
    pub fn queued(&self) -> Vec<PropagationMessage> {
        self.queue.lock().snapshot()
    }

    /// Dequeue and dispatch up to as many messages as were queued when the
    /// cycle started, highest priority first
    pub async fn drain_once(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let budget = self.queue_len();

        for _ in 0..budget {
            let Some(queued) = self.queue.lock().pop() else {
                break;
            };
            let now = Instant::now();
            if queued.is_expired(now) {
                let age_ms = u64::try_from(queued.age(now).as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(message = %queued.message.id, age_ms, "message expired");
                self.events.emit(BusEvent::MessageExpired {
                    message: queued.message,
                    age_ms,
                });
                report.expired += 1;
                continue;
            }

            let message = queued.message;
            let (delivered, failures) = self.dispatch(&message).await;
            if failures.is_empty() {
                tracing::debug!(message = %message.id, delivered, "message sent");
                self.events
                    .emit(BusEvent::MessageSent { message, delivered });
                report.delivered += 1;
            } else {
                for (component_id, failure) in failures {
                    tracing::warn!(
                        message = %message.id,
                        component = %component_id,
                        error = %failure,
                        "delivery failed"
                    );
                    self.events.emit(BusEvent::MessageFailed {
                        message: message.clone(),
                        component_id,
                        error: failure.to_string(),
                    });
                }
                report.failed += 1;
            }
        }
        report
    }

    /// Run `drain_once` on the configured interval until `shutdown` flips to true
    pub fn spawn_drain_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bus.config.drain_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = bus.drain_once().await;
                        if report.total() > 0 {
                            tracing::debug!(?report, "drain cycle");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("drain loop stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Deliver a message over its channel; returns (deliveries, failures)
    async fn dispatch(
        &self,
        message: &PropagationMessage,
    ) -> (usize, Vec<(ComponentId, DispatchError)>) {
        if message.channel == Channel::EventDriven {
            self.events.emit(BusEvent::ChannelEvent {
                name: message.change_type.clone(),
                message: message.clone(),
            });
            return (0, Vec::new());
        }

        let recipients = self.recipients(message);
        let mut delivered = 0;
        let mut failures = Vec::new();
        for subscription in recipients {
            match self.deliver(&subscription, message).await {
                Ok(()) => {
                    delivered += 1;
                    if message.channel == Channel::PeerToPeer && message.requires_ack {
                        self.events.emit(BusEvent::MessageAcknowledged {
                            message_id: message.id,
                            component_id: subscription.component_id.clone(),
                        });
                    }
                }
                Err(error) => failures.push((subscription.component_id.clone(), error)),
            }
        }
        (delivered, failures)
    }

    /// Subscriptions addressed by a message, ordered by component then
    /// descending subscription priority, filters applied
    fn recipients(&self, message: &PropagationMessage) -> Vec<Subscription> {
        let components: Vec<ComponentId> = match message.channel {
            Channel::Broadcast => self.all_components(),
            Channel::Targeted | Channel::PeerToPeer => match &message.targets {
                Targets::All => self.all_components(),
                Targets::Components(ids) => ids.iter().cloned().collect(),
            },
            Channel::Hierarchical => self.topology.read().adjacent(&message.source),
            Channel::EventDriven => Vec::new(),
        };

        let mut recipients = Vec::new();
        for component in components {
            let Some(subs) = self.subscriptions.get(&component) else {
                continue;
            };
            let mut accepted: Vec<Subscription> =
                subs.iter().filter(|s| s.accepts(message)).cloned().collect();
            drop(subs);
            accepted.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
            recipients.extend(accepted);
        }
        recipients
    }

    fn all_components(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        message: &PropagationMessage,
    ) -> Result<(), DispatchError> {
        let attempts = self.config.retry_attempts.saturating_add(1);
        let mut backoff = self.config.retry_backoff();
        let mut attempt = 1;
        loop {
            match self.deliver_once(subscription, message).await {
                Ok(()) => return Ok(()),
                Err(error) if attempt < attempts && error.is_retryable() => {
                    tracing::debug!(
                        message = %message.id,
                        component = %subscription.component_id,
                        attempt,
                        %error,
                        "delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn deliver_once(
        &self,
        subscription: &Subscription,
        message: &PropagationMessage,
    ) -> Result<(), DispatchError> {
        let component = &subscription.component_id;
        let handled = AssertUnwindSafe(subscription.handler.handle(message)).catch_unwind();

        let outcome = if message.requires_ack {
            let timeout = self.config.ack_timeout();
            match tokio::time::timeout(timeout, handled).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(DispatchError::AckTimeout {
                        component: component.clone(),
                        timeout_ms: self.config.ack_timeout_ms,
                    })
                }
            }
        } else {
            handled.await
        };

        outcome.unwrap_or_else(|_| {
            Err(DispatchError::Panicked {
                component: component.clone(),
            })
        })
    }
}
