//! Envelope header contract.

use std::error::Error;
use std::fmt;

use uuid::Uuid;

use crate::broker::Envelope;

/// The five mandatory envelope headers, parsed and validated.
///
/// `id` is the producer message id and the idempotency key. A missing or
/// malformed header is a hard parse failure, not a retryable condition.
#[derive(Clone, Debug)]
pub struct MessageHeaders {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub correlation_id: Uuid,
    pub event_type: String,
    pub name: String,
    pub timestamp: i64,
}

impl MessageHeaders {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, HeaderError> {
        Ok(MessageHeaders {
            id: parse_uuid(envelope, "id")?,
            trace_id: parse_uuid(envelope, "tid")?,
            correlation_id: parse_uuid(envelope, "cid")?,
            event_type: required(envelope, "type")?.to_string(),
            name: required(envelope, "name")?.to_string(),
            timestamp: required(envelope, "ts")?.parse().map_err(
                |e: std::num::ParseIntError| HeaderError::Malformed {
                    field: "ts",
                    reason: e.to_string(),
                },
            )?,
        })
    }
}

fn required<'a>(envelope: &'a Envelope, field: &'static str) -> Result<&'a str, HeaderError> {
    match envelope.header(field) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(HeaderError::Missing(field)),
    }
}

fn parse_uuid(envelope: &Envelope, field: &'static str) -> Result<Uuid, HeaderError> {
    required(envelope, field)?
        .parse()
        .map_err(|e: uuid::Error| HeaderError::Malformed {
            field,
            reason: e.to_string(),
        })
}

/// Error type for envelope header validation.
#[derive(Debug)]
pub enum HeaderError {
    Missing(&'static str),
    Malformed { field: &'static str, reason: String },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::Missing(field) => write!(f, "header `{}` is missing or empty", field),
            HeaderError::Malformed { field, reason } => {
                write!(f, "header `{}` is malformed: {}", field, reason)
            }
        }
    }
}

impl Error for HeaderError {}
