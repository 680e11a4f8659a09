use std::error::Error;
use std::fmt;

/// Error type for record store operations.
#[derive(Debug)]
pub enum StoreError {
    /// The underlying SQLite call failed.
    Sql(rusqlite::Error),
    /// The transaction scope outlived its deadline and was interrupted.
    TimedOut,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sql(e) => write!(f, "store error: {}", e),
            StoreError::TimedOut => write!(f, "transaction scope timed out"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Sql(e) => Some(e),
            StoreError::TimedOut => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            // The watchdog interrupts statements that outlive the scope
            // deadline; surface that as a timeout rather than a raw SQL error.
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                StoreError::TimedOut
            }
            other => StoreError::Sql(other),
        }
    }
}
