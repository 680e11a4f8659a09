use std::fmt;
use std::time::{Duration, SystemTime};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Coarse lifecycle of a delivery: untouched, being worked on, or done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxState {
    None,
    InProgress,
    Completed,
}

impl InboxState {
    pub fn as_str(self) -> &'static str {
        match self {
            InboxState::None => "none",
            InboxState::InProgress => "in_progress",
            InboxState::Completed => "completed",
        }
    }

    fn from_text(value: &str) -> Option<Self> {
        match value {
            "none" => Some(InboxState::None),
            "in_progress" => Some(InboxState::InProgress),
            "completed" => Some(InboxState::Completed),
            _ => None,
        }
    }
}

/// Fine-grained progress of a delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    None,
    Processing,
    Waiting,
    Retrying,
    Succeeded,
    Failed,
}

impl InboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InboxStatus::None => "none",
            InboxStatus::Processing => "processing",
            InboxStatus::Waiting => "waiting",
            InboxStatus::Retrying => "retrying",
            InboxStatus::Succeeded => "succeeded",
            InboxStatus::Failed => "failed",
        }
    }

    fn from_text(value: &str) -> Option<Self> {
        match value {
            "none" => Some(InboxStatus::None),
            "processing" => Some(InboxStatus::Processing),
            "waiting" => Some(InboxStatus::Waiting),
            "retrying" => Some(InboxStatus::Retrying),
            "succeeded" => Some(InboxStatus::Succeeded),
            "failed" => Some(InboxStatus::Failed),
            _ => None,
        }
    }
}

impl FromSql for InboxState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        InboxState::from_text(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown inbox state `{text}`").into()))
    }
}

impl ToSql for InboxState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for InboxStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        InboxStatus::from_text(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown inbox status `{text}`").into()))
    }
}

impl ToSql for InboxStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Identity and correlation metadata of one logical delivery.
///
/// `(id, aggregate_type)` is the idempotency key; the remaining fields ride
/// along so every attempt row carries the full trace context.
#[derive(Clone, Debug)]
pub struct DeliveryKey {
    pub id: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub correlation_id: String,
    pub trace_id: String,
}

/// One row of the append-only attempt log for a delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboxRecord {
    pub id: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub correlation_id: String,
    pub trace_id: String,
    /// Raw message body; populated only on the first in-progress snapshot.
    pub payload: Option<Vec<u8>>,
    pub state: InboxState,
    pub status: InboxStatus,
    pub retry_count: u32,
    /// Backoff applied before the next attempt, in milliseconds.
    pub wait_duration: Option<u64>,
    /// Last error context as JSON.
    pub metadata: Option<String>,
    pub version: u32,
    pub created_at: SystemTime,
}

/// Row to append. Built through the four constructors below, one per row
/// shape the consumer state machine writes.
#[derive(Clone, Debug)]
pub struct NewInboxRecord {
    pub id: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub correlation_id: String,
    pub trace_id: String,
    pub payload: Option<Vec<u8>>,
    pub state: InboxState,
    pub status: InboxStatus,
    pub retry_count: u32,
    pub wait_duration: Option<u64>,
    pub metadata: Option<String>,
    pub version: u32,
}

impl NewInboxRecord {
    fn base(key: &DeliveryKey, state: InboxState, status: InboxStatus, retry_count: u32) -> Self {
        NewInboxRecord {
            id: key.id.clone(),
            aggregate_id: key.aggregate_id.clone(),
            aggregate_type: key.aggregate_type.clone(),
            correlation_id: key.correlation_id.clone(),
            trace_id: key.trace_id.clone(),
            payload: None,
            state,
            status,
            retry_count,
            wait_duration: None,
            metadata: None,
            version: 1,
        }
    }

    /// First row for a freshly seen delivery, snapshotting the raw body.
    pub fn processing(key: &DeliveryKey, payload: Vec<u8>) -> Self {
        let mut record = Self::base(key, InboxState::InProgress, InboxStatus::Processing, 1);
        record.payload = Some(payload);
        record
    }

    /// Appended before each backoff wait.
    pub fn retrying(
        key: &DeliveryKey,
        retry_count: u32,
        error: impl fmt::Display,
        wait: Duration,
    ) -> Self {
        let mut record = Self::base(key, InboxState::InProgress, InboxStatus::Retrying, retry_count);
        record.wait_duration = Some(wait.as_millis() as u64);
        record.metadata = Some(error_metadata(error));
        record
    }

    /// Terminal row for a handled delivery.
    pub fn succeeded(key: &DeliveryKey, retry_count: u32) -> Self {
        Self::base(key, InboxState::Completed, InboxStatus::Succeeded, retry_count)
    }

    /// Terminal row for a delivery that is permanently given up on.
    pub fn failed(key: &DeliveryKey, retry_count: u32, error: impl fmt::Display) -> Self {
        let mut record = Self::base(key, InboxState::Completed, InboxStatus::Failed, retry_count);
        record.metadata = Some(error_metadata(error));
        record
    }
}

fn error_metadata(error: impl fmt::Display) -> String {
    serde_json::json!({ "error": error.to_string() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DeliveryKey {
        DeliveryKey {
            id: "m-1".into(),
            aggregate_id: "a-1".into(),
            aggregate_type: "polls".into(),
            correlation_id: "c-1".into(),
            trace_id: "t-1".into(),
        }
    }

    #[test]
    fn processing_snapshots_payload() {
        let record = NewInboxRecord::processing(&key(), b"{}".to_vec());
        assert_eq!(record.state, InboxState::InProgress);
        assert_eq!(record.status, InboxStatus::Processing);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.payload.as_deref(), Some(b"{}".as_ref()));
    }

    #[test]
    fn retrying_records_backoff_and_error() {
        let record = NewInboxRecord::retrying(&key(), 2, "timed out", Duration::from_millis(250));
        assert_eq!(record.status, InboxStatus::Retrying);
        assert_eq!(record.wait_duration, Some(250));
        assert_eq!(
            record.metadata.as_deref(),
            Some(r#"{"error":"timed out"}"#)
        );
        assert!(record.payload.is_none());
    }

    #[test]
    fn terminal_rows_are_completed() {
        assert_eq!(
            NewInboxRecord::succeeded(&key(), 1).state,
            InboxState::Completed
        );
        let failed = NewInboxRecord::failed(&key(), 4, "rejected");
        assert_eq!(failed.state, InboxState::Completed);
        assert_eq!(failed.status, InboxStatus::Failed);
        assert!(failed.metadata.is_some());
    }
}
