mod consumer;
mod error;
mod headers;
mod machine;

// Header contract
pub use headers::{HeaderError, MessageHeaders};

// Handler surface and error taxonomy
pub use error::{ConsumeError, HandlerError};
pub use machine::{HandlerFn, ProcessOutcome};

// Worker glue
pub use consumer::{Consumer, ConsumerHandle, ConsumerStats, WorkerStats};
