//! Relational record store shared by the outbox writer, the inbox
//! bookkeeping, and the relay.
//!
//! All access runs through [`Store::with_scope`]: begin a transaction, hand
//! the open [`TxScope`] to a closure, commit on `Ok`, roll back on `Err` or
//! panic. A watchdog thread interrupts the connection when a scope outlives
//! the configured transaction timeout, so a hung statement cannot hold a
//! transaction open indefinitely.

mod error;
mod scope;

pub use error::StoreError;
pub use scope::TxScope;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use scope::Watchdog;

const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(30);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the relational store. Clones share one connection, so the
/// outbox write genuinely joins the caller's domain transaction.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    tx_timeout: Duration,
}

impl Store {
    /// Open (or create) a store backed by a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory store.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
            tx_timeout: DEFAULT_TX_TIMEOUT,
        })
    }

    /// Set the deadline after which an open scope is interrupted.
    pub fn with_tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = timeout;
        self
    }

    /// Run `f` inside a transaction scope.
    ///
    /// The scope commits when `f` returns `Ok` and rolls back when it
    /// returns `Err`. If `f` panics, the transaction is dropped mid-unwind
    /// without committing, which also rolls it back.
    ///
    /// ## Example
    ///
    /// ```ignore
    /// store.with_scope(|scope| {
    ///     scope
    ///         .execute("INSERT INTO polls (id) VALUES (?1)", [&poll_id])
    ///         .map_err(StoreError::from)?;
    ///     writer.put(scope, &ctx, &poll_id, message)?;
    ///     Ok::<_, OutboxError>(())
    /// })?;
    /// ```
    pub fn with_scope<T, E>(&self, f: impl FnOnce(&TxScope<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        // A dropped transaction leaves the connection consistent, so a
        // poisoned mutex (a panic inside an earlier scope) is recoverable.
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let _watchdog = Watchdog::arm(conn.get_interrupt_handle(), self.tx_timeout);
        let tx = conn.transaction().map_err(StoreError::from).map_err(E::from)?;
        let scope = TxScope::new(tx);
        let value = f(&scope)?;
        scope.commit().map_err(E::from)?;
        Ok(value)
    }
}

pub(crate) fn unix_millis(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

pub(crate) fn from_unix_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Add any of `columns` missing from `table`. Each entry is
/// `(name, declaration)`; existing columns are left untouched.
pub(crate) fn ensure_columns(
    conn: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    for (name, declaration) in columns {
        if !existing.iter().any(|column| column == name) {
            conn.execute_batch(&format!(
                "ALTER TABLE {table} ADD COLUMN {name} {declaration}"
            ))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_table() -> Store {
        let store = Store::in_memory().unwrap();
        store
            .with_scope(|scope| {
                scope
                    .execute_batch("CREATE TABLE items (id TEXT NOT NULL)")
                    .map_err(StoreError::from)
            })
            .unwrap();
        store
    }

    fn count(store: &Store) -> i64 {
        store
            .with_scope(|scope| {
                scope
                    .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap()
    }

    #[test]
    fn scope_commits_on_ok() {
        let store = store_with_table();

        store
            .with_scope(|scope| {
                scope
                    .execute("INSERT INTO items (id) VALUES ('a')", [])
                    .map_err(StoreError::from)
            })
            .unwrap();

        assert_eq!(count(&store), 1);
    }

    #[test]
    fn scope_rolls_back_on_err() {
        let store = store_with_table();

        let result: Result<(), StoreError> = store.with_scope(|scope| {
            scope.execute("INSERT INTO items (id) VALUES ('a')", [])?;
            Err(StoreError::TimedOut)
        });

        assert!(result.is_err());
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn scope_rolls_back_on_panic() {
        let store = store_with_table();

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), StoreError> = store.with_scope(|scope| {
                scope.execute("INSERT INTO items (id) VALUES ('a')", [])?;
                panic!("handler blew up");
            });
        }));

        assert!(panicked.is_err());
        // The store stays usable and the insert is gone.
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn watchdog_interrupts_overlong_scope() {
        let store = store_with_table().with_tx_timeout(Duration::from_millis(50));

        let result: Result<i64, StoreError> = store.with_scope(|scope| {
            scope
                .query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 200000000)
                     SELECT COUNT(*) FROM c",
                    [],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
        });

        assert!(matches!(result, Err(StoreError::TimedOut)));
    }

    #[test]
    fn ensure_columns_is_additive_and_idempotent() {
        let store = store_with_table();

        store
            .with_scope(|scope| {
                ensure_columns(scope, "items", &[("note", "TEXT"), ("id", "TEXT")])?;
                ensure_columns(scope, "items", &[("note", "TEXT")])?;
                scope
                    .execute("INSERT INTO items (id, note) VALUES ('a', 'n')", [])
                    .map_err(StoreError::from)
            })
            .unwrap();

        assert_eq!(count(&store), 1);
    }
}
