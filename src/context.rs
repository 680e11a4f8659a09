//! Explicit per-unit-of-work metadata.
//!
//! A `MessageContext` is built once per unit of work (by a producer before
//! it writes through the outbox, or by the consumer from the parsed envelope
//! headers) and passed down the call chain as a plain parameter.

use uuid::Uuid;

use crate::consumer::MessageHeaders;

/// Trace and correlation identifiers for one unit of work.
///
/// The outbox writer requires a trace id and fails with `MissingContext`
/// without one; handlers receive a context carrying the full parsed headers.
#[derive(Clone, Debug, Default)]
pub struct MessageContext {
    trace_id: Option<Uuid>,
    correlation_id: Option<Uuid>,
    headers: Option<MessageHeaders>,
}

impl MessageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a consumed message, carrying the parsed headers.
    pub fn from_headers(headers: &MessageHeaders) -> Self {
        MessageContext {
            trace_id: Some(headers.trace_id),
            correlation_id: Some(headers.correlation_id),
            headers: Some(headers.clone()),
        }
    }

    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn trace_id(&self) -> Option<Uuid> {
        self.trace_id
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Parsed envelope headers, present when the context was built by the
    /// consumer.
    pub fn headers(&self) -> Option<&MessageHeaders> {
        self.headers.as_ref()
    }
}
