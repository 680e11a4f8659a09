//! Broker abstractions and the in-memory partitioned broker.
//!
//! The messaging core only assumes a broker with partitioned topics,
//! consumer-group cursors, and at-least-once delivery; everything it needs
//! is behind two traits so a production transport can be substituted:
//!
//! ```text
//! ┌──────────────┐ publish(topic, key, envelope) ┌──────────────────────┐
//! │ OutboxRelay  │ ─────────────────────────────▶│      Broker          │
//! └──────────────┘                               │  topic ⇒ partitions  │
//! ┌──────────────┐ poll / ack / nack             │  group ⇒ cursor      │
//! │  Consumer    │ ◀─────────────────────────────│  (at-least-once)     │
//! └──────────────┘                               └──────────────────────┘
//! ```

mod envelope;
#[cfg(feature = "emitter")]
mod emitter;
mod in_memory;

pub use envelope::Envelope;
#[cfg(feature = "emitter")]
pub use emitter::EmitterPublisher;
pub use in_memory::InMemoryBroker;

use std::error::Error;
use std::fmt;

/// Error type for publish and subscribe operations.
#[derive(Debug)]
pub enum PublishError {
    /// Connection to the broker failed.
    ConnectionFailed(String),
    /// The broker rejected the envelope.
    Rejected(String),
    /// Timeout waiting for acknowledgment.
    Timeout,
    /// Other error.
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            PublishError::Rejected(msg) => write!(f, "envelope rejected: {}", msg),
            PublishError::Timeout => write!(f, "publish timeout"),
            PublishError::Other(e) => write!(f, "publish error: {}", e),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PublishError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Publishes envelopes to a partitioned topic.
///
/// `key` selects the partition: envelopes sharing a key stay ordered
/// relative to each other.
pub trait BrokerPublisher: Send + Sync {
    fn publish(&self, topic: &str, key: &str, envelope: Envelope) -> Result<(), PublishError>;
}

/// Pull-based consumption from one partition of a topic on behalf of a
/// consumer group.
///
/// Delivery is at-least-once: an envelope polled but not acked is delivered
/// again on the next poll. `ack` advances the group cursor; `nack` records
/// the reason and leaves the envelope in place for redelivery.
pub trait PartitionedSubscriber: Send + Sync {
    /// Number of partitions per topic.
    fn partition_count(&self, topic: &str) -> usize;

    /// Next envelope for the group on this partition, blocking up to
    /// `timeout_ms`.
    fn poll(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
        timeout_ms: u64,
    ) -> Result<Option<Envelope>, PublishError>;

    /// Acknowledge the in-flight envelope on this partition.
    fn ack(&self, topic: &str, partition: usize, group: &str) -> Result<(), PublishError>;

    /// Reject the in-flight envelope; it will be redelivered.
    fn nack(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
        reason: &str,
    ) -> Result<(), PublishError>;
}
