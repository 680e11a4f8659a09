mod error;
mod message;
mod record;
mod relay;
mod store;
mod writer;

// Records and the producer-facing message shape
pub use message::{MessageSchema, OutboxMessage};
pub use record::{EventType, OutboxRecord};

// Writer and store
pub use error::OutboxError;
pub use store::{NewOutboxRecord, OutboxStore};
pub use writer::OutboxWriter;

// Relay worker
pub use relay::{OutboxRelay, RelayHandle, RelayStats};
