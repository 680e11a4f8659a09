pub mod broker;
pub mod consumer;
mod context;
pub mod inbox;
pub mod outbox;
mod retry;
pub mod store;

pub use broker::{BrokerPublisher, Envelope, InMemoryBroker, PartitionedSubscriber, PublishError};
#[cfg(feature = "emitter")]
pub use broker::EmitterPublisher;
pub use consumer::{
    ConsumeError, Consumer, ConsumerHandle, ConsumerStats, HandlerError, HandlerFn, HeaderError,
    MessageHeaders, ProcessOutcome, WorkerStats,
};
pub use context::MessageContext;
pub use inbox::{DeliveryKey, InboxRecord, InboxState, InboxStatus, InboxStore, NewInboxRecord};
pub use outbox::{
    EventType, MessageSchema, OutboxError, OutboxMessage, OutboxRecord, OutboxRelay, OutboxStore,
    OutboxWriter, RelayHandle, RelayStats,
};
pub use retry::{CancelToken, RetryPolicy};
pub use store::{Store, StoreError, TxScope};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
