//! Error taxonomy for the consumer side.
//!
//! Three classes matter to the worker loop: header errors are unprocessable
//! (ack and drop), store errors are infrastructure failures (no ack, rely on
//! broker redelivery), and everything a handler returns is translated into
//! terminal inbox state rather than escaping to the broker.

use std::error::Error;
use std::fmt;

use crate::store::StoreError;

use super::headers::HeaderError;

/// Error returned by business handlers.
///
/// `Timeout` is the transient sentinel: it asks the consumer for an internal
/// retry with backoff. Every other variant is permanent: the delivery is
/// recorded as failed and never retried.
#[derive(Debug)]
pub enum HandlerError {
    /// Transient condition; retry with backoff.
    Timeout,
    /// Payload decode failed.
    DecodeFailed(String),
    /// Business logic rejected the message.
    Rejected(String),
    /// Other permanent error.
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HandlerError::Timeout)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Timeout => write!(f, "timeout error"),
            HandlerError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
            HandlerError::Rejected(msg) => write!(f, "rejected: {}", msg),
            HandlerError::Other(e) => write!(f, "handler error: {}", e),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HandlerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl From<bitcode::Error> for HandlerError {
    fn from(err: bitcode::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

/// Why processing one delivery did not reach a terminal inbox row.
#[derive(Debug)]
pub enum ConsumeError {
    /// The envelope violates the header contract; unprocessable.
    Header(HeaderError),
    /// A bookkeeping write failed; the delivery must not be acked.
    Store(StoreError),
    /// The consumer was stopped mid-delivery (e.g. during a backoff wait).
    Cancelled,
}

impl fmt::Display for ConsumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumeError::Header(e) => write!(f, "header validation failed: {}", e),
            ConsumeError::Store(e) => write!(f, "inbox bookkeeping failed: {}", e),
            ConsumeError::Cancelled => write!(f, "delivery cancelled"),
        }
    }
}

impl Error for ConsumeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConsumeError::Header(e) => Some(e),
            ConsumeError::Store(e) => Some(e),
            ConsumeError::Cancelled => None,
        }
    }
}

impl From<HeaderError> for ConsumeError {
    fn from(err: HeaderError) -> Self {
        ConsumeError::Header(err)
    }
}

impl From<StoreError> for ConsumeError {
    fn from(err: StoreError) -> Self {
        ConsumeError::Store(err)
    }
}
