//! Durable storage for outbox records.

use std::time::SystemTime;

use rusqlite::{params, Row};
use uuid::Uuid;

use crate::store::{from_unix_millis, table_exists, unix_millis, Store, StoreError, TxScope};

use super::record::{EventType, OutboxRecord};

const BASE_DDL: &str = "
CREATE TABLE outbox_messages (
  id TEXT NOT NULL PRIMARY KEY,
  aggregate_id TEXT NOT NULL,
  aggregate_type TEXT NOT NULL,
  trace_id TEXT NOT NULL,
  type TEXT NOT NULL,
  name TEXT NOT NULL,
  payload TEXT NOT NULL,
  created_at INTEGER NOT NULL
);
CREATE INDEX idx_outbox_messages_created_at ON outbox_messages (created_at);
";

const COLUMNS: &str = "id, aggregate_id, aggregate_type, trace_id, type, name, payload, created_at";

/// Fields of a record about to be written. The id and creation time are
/// generated by the store.
#[derive(Clone, Debug)]
pub struct NewOutboxRecord {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub trace_id: String,
    pub event_type: EventType,
    pub name: String,
    pub payload: String,
}

/// Store for [`OutboxRecord`] rows.
#[derive(Clone)]
pub struct OutboxStore {
    store: Store,
}

impl OutboxStore {
    pub fn new(store: Store) -> Self {
        OutboxStore { store }
    }

    /// Create the `outbox_messages` table if absent. Idempotent; run at
    /// startup before the writer is usable.
    pub fn checkup(&self) -> Result<(), StoreError> {
        self.store.with_scope(|scope| {
            if !table_exists(scope, "outbox_messages")? {
                scope.execute_batch(BASE_DDL)?;
            }
            Ok(())
        })
    }

    /// Insert one record through the caller's open scope, so the write is
    /// atomic with whatever else that scope does.
    pub fn create(
        &self,
        scope: &TxScope<'_>,
        new: NewOutboxRecord,
    ) -> Result<OutboxRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        // Truncate to the stored millisecond precision so the returned
        // record equals what a later fetch reads back.
        let created_at = from_unix_millis(unix_millis(SystemTime::now()));
        scope.execute(
            &format!(
                "INSERT INTO outbox_messages ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                id,
                new.aggregate_id,
                new.aggregate_type,
                new.trace_id,
                new.event_type,
                new.name,
                new.payload,
                unix_millis(created_at),
            ],
        )?;

        Ok(OutboxRecord {
            id,
            aggregate_id: new.aggregate_id,
            aggregate_type: new.aggregate_type,
            trace_id: new.trace_id,
            event_type: new.event_type,
            name: new.name,
            payload: new.payload,
            created_at,
        })
    }

    /// Records inserted after the given rowid cursor, oldest first, paired
    /// with their rowid. Records are immutable, so a rowid cursor is a
    /// complete tailing position.
    pub fn fetch_after(
        &self,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<(i64, OutboxRecord)>, StoreError> {
        self.store.with_scope(|scope| {
            let mut stmt = scope.prepare(&format!(
                "SELECT rowid, {COLUMNS} FROM outbox_messages
                 WHERE rowid > ?1 ORDER BY rowid ASC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![cursor, limit as i64], |row| {
                    Ok((row.get::<_, i64>(0)?, record_from_row(row)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<OutboxRecord> {
    Ok(OutboxRecord {
        id: row.get(1)?,
        aggregate_id: row.get(2)?,
        aggregate_type: row.get(3)?,
        trace_id: row.get(4)?,
        event_type: row.get(5)?,
        name: row.get(6)?,
        payload: row.get(7)?,
        created_at: from_unix_millis(row.get(8)?),
    })
}
