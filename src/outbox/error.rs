use std::error::Error;
use std::fmt;

use crate::store::StoreError;

/// Error type for outbox writes.
#[derive(Debug)]
pub enum OutboxError {
    /// The caller's context carries no trace id.
    MissingContext,
    /// A required message field is empty.
    Invalid(&'static str),
    /// The insert failed; the caller's transaction rollback handles
    /// atomicity.
    Store(StoreError),
}

impl fmt::Display for OutboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxError::MissingContext => write!(f, "trace id is not set in context"),
            OutboxError::Invalid(field) => write!(f, "outbox message field `{}` is empty", field),
            OutboxError::Store(e) => write!(f, "outbox store error: {}", e),
        }
    }
}

impl Error for OutboxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OutboxError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for OutboxError {
    fn from(err: StoreError) -> Self {
        OutboxError::Store(err)
    }
}
