//! CAC Propagation - the change propagation bus
//!
//! Change messages are queued by priority (ties in insertion order) and
//! dispatched by a fixed-interval drain loop over one of five channels:
//!
//! | channel | recipients |
//! |---|---|
//! | broadcast | every subscription |
//! | targeted | subscriptions of the target components |
//! | hierarchical | subscriptions of the source's topology neighbours |
//! | peer-to-peer | as targeted, plus an acknowledgment event per delivery |
//! | event-driven | none; the message is re-emitted as a channel event |
//!
//! TTL is evaluated when a message is dequeued. Failed deliveries are
//! retried with doubling backoff and never stop the loop.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod bus;
pub mod error;
pub mod events;
pub mod message;
pub mod queue;
pub mod subscription;
pub mod topology;

pub use bus::{DrainReport, PropagationBus};
pub use error::{BusError, DispatchError};
pub use events::BusEvent;
pub use message::{Channel, PropagateOptions, PropagationMessage, Targets};
pub use queue::{MessageQueue, QueuedMessage};
pub use subscription::{ChangeHandler, MessageFilter, Subscription, SubscriptionId};
pub use topology::Topology;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
