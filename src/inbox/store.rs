//! Append-only bookkeeping store for delivered messages.

use std::time::SystemTime;

use rusqlite::{params, OptionalExtension, Row};

use crate::store::{
    ensure_columns, from_unix_millis, table_exists, unix_millis, Store, StoreError, TxScope,
};

use super::record::{InboxRecord, NewInboxRecord};

const BASE_DDL: &str = "
CREATE TABLE inbox_messages (
  id TEXT NOT NULL,
  aggregate_id TEXT NOT NULL,
  aggregate_type TEXT NOT NULL,
  payload BLOB,
  state TEXT NOT NULL DEFAULT 'none',
  status TEXT NOT NULL DEFAULT 'none',
  metadata TEXT,
  created_at INTEGER NOT NULL
);
CREATE INDEX idx_inbox_messages_id ON inbox_messages (id);
CREATE INDEX idx_inbox_messages_aggregate_type ON inbox_messages (aggregate_type);
";

// Columns added after the first deployed schema. Applied unconditionally so
// a store created by an older deployment keeps working without a
// destructive migration.
const ADDED_COLUMNS: &[(&str, &str)] = &[
    ("retry_count", "INTEGER NOT NULL DEFAULT 0"),
    ("version", "INTEGER NOT NULL DEFAULT 1"),
    ("wait_duration", "INTEGER"),
    ("correlation_id", "TEXT NOT NULL DEFAULT 'OLD_ROWS'"),
    ("trace_id", "TEXT NOT NULL DEFAULT 'OLD_ROWS'"),
];

const COLUMNS: &str = "id, aggregate_id, aggregate_type, correlation_id, trace_id, payload, \
                       state, status, retry_count, wait_duration, metadata, version, created_at";

/// Store for [`InboxRecord`] attempt rows.
///
/// Written exclusively by the consumer state machine; every write runs under
/// its own short-lived transaction, independent of whatever transaction a
/// business handler may have opened and rolled back.
#[derive(Clone)]
pub struct InboxStore {
    store: Store,
}

impl InboxStore {
    pub fn new(store: Store) -> Self {
        InboxStore { store }
    }

    /// Create the `inbox_messages` table if absent and add any columns
    /// introduced after the base schema. Idempotent; run at startup before
    /// the consumer is usable.
    pub fn checkup(&self) -> Result<(), StoreError> {
        self.store.with_scope(|scope| {
            if !table_exists(scope, "inbox_messages")? {
                scope.execute_batch(BASE_DDL)?;
            }
            ensure_columns(scope, "inbox_messages", ADDED_COLUMNS)
        })
    }

    /// Append one attempt row under its own transaction.
    pub fn create(&self, new: NewInboxRecord) -> Result<InboxRecord, StoreError> {
        self.store.with_scope(|scope| Self::insert(scope, new))
    }

    fn insert(scope: &TxScope<'_>, new: NewInboxRecord) -> Result<InboxRecord, StoreError> {
        // Truncated to the stored millisecond precision.
        let created_at = from_unix_millis(unix_millis(SystemTime::now()));
        scope.execute(
            &format!(
                "INSERT INTO inbox_messages ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                new.id,
                new.aggregate_id,
                new.aggregate_type,
                new.correlation_id,
                new.trace_id,
                new.payload,
                new.state,
                new.status,
                new.retry_count,
                new.wait_duration.map(|ms| ms as i64),
                new.metadata,
                new.version,
                unix_millis(created_at),
            ],
        )?;

        Ok(InboxRecord {
            id: new.id,
            aggregate_id: new.aggregate_id,
            aggregate_type: new.aggregate_type,
            correlation_id: new.correlation_id,
            trace_id: new.trace_id,
            payload: new.payload,
            state: new.state,
            status: new.status,
            retry_count: new.retry_count,
            wait_duration: new.wait_duration,
            metadata: new.metadata,
            version: new.version,
            created_at,
        })
    }

    /// Latest attempt row for `(id, aggregate_type)`, or `None` when the
    /// delivery has never been seen. Not-found is not an error.
    pub fn find_latest(
        &self,
        id: &str,
        aggregate_type: &str,
    ) -> Result<Option<InboxRecord>, StoreError> {
        self.store.with_scope(|scope| {
            scope
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM inbox_messages
                         WHERE id = ?1 AND aggregate_type = ?2
                         ORDER BY created_at DESC, rowid DESC LIMIT 1"
                    ),
                    params![id, aggregate_type],
                    record_from_row,
                )
                .optional()
                .map_err(StoreError::from)
        })
    }

    /// Full attempt history for `(id, aggregate_type)`, oldest first.
    pub fn history(
        &self,
        id: &str,
        aggregate_type: &str,
    ) -> Result<Vec<InboxRecord>, StoreError> {
        self.store.with_scope(|scope| {
            let mut stmt = scope.prepare(&format!(
                "SELECT {COLUMNS} FROM inbox_messages
                 WHERE id = ?1 AND aggregate_type = ?2
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map(params![id, aggregate_type], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<InboxRecord> {
    Ok(InboxRecord {
        id: row.get(0)?,
        aggregate_id: row.get(1)?,
        aggregate_type: row.get(2)?,
        correlation_id: row.get(3)?,
        trace_id: row.get(4)?,
        payload: row.get(5)?,
        state: row.get(6)?,
        status: row.get(7)?,
        retry_count: row.get(8)?,
        wait_duration: row.get::<_, Option<i64>>(9)?.map(|ms| ms as u64),
        metadata: row.get(10)?,
        version: row.get(11)?,
        created_at: from_unix_millis(row.get(12)?),
    })
}
