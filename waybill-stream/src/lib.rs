//! Event-stream client for server-pushed invalidation.
//!
//! Holds exactly one physical connection to the server's event feed per
//! client instance and fans incoming events out to filtered subscriptions.
//! Callers are expected to share a client rather than open a connection
//! per subscriber.
//!
//! The connection is re-established with jittered exponential backoff
//! after transport failures. A reconnect is a fresh subscription window:
//! there are no resume offsets and missed events are never replayed.
//! Consumers reconcile through their own staleness-driven refetch.

mod client;
mod error;
mod subscription;

pub use client::{ConnectionState, EventStreamClient, StreamConfig};
pub use error::{StreamError, StreamResult};
pub use subscription::{EventCallback, Subscription, SubscriptionId};
