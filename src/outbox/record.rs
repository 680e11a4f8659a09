use std::time::SystemTime;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Kind of message a record carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Command,
    Event,
    Document,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Command => "command",
            EventType::Event => "event",
            EventType::Document => "document",
        }
    }

    fn from_text(value: &str) -> Option<Self> {
        match value {
            "command" => Some(EventType::Command),
            "event" => Some(EventType::Event),
            "document" => Some(EventType::Document),
            _ => None,
        }
    }
}

impl FromSql for EventType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        EventType::from_text(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown event type `{text}`").into()))
    }
}

impl ToSql for EventType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Durable domain event awaiting asynchronous publication.
///
/// Written inside the same transaction as the domain mutation that produced
/// it, so the record exists exactly when that transaction committed. Created
/// once; never updated or deleted by this crate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Store-generated UUID; becomes the consumer-side idempotency key.
    pub id: String,
    pub aggregate_id: String,
    /// Logical topic the record publishes to.
    pub aggregate_type: String,
    pub trace_id: String,
    pub event_type: EventType,
    pub name: String,
    /// Serialized JSON body.
    pub payload: String,
    pub created_at: SystemTime,
}
