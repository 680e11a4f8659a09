//! Transactional outbox writer.

use uuid::Uuid;

use crate::context::MessageContext;
use crate::store::{Store, TxScope};

use super::error::OutboxError;
use super::message::OutboxMessage;
use super::record::OutboxRecord;
use super::store::{NewOutboxRecord, OutboxStore};

/// Writes outbox records inside the caller's open transaction scope, making
/// the event append atomic with the caller's domain mutation.
///
/// No broker call happens here; publication is the relay's job.
pub struct OutboxWriter {
    outbox: OutboxStore,
}

impl OutboxWriter {
    /// Construct the writer and run the outbox schema checkup.
    ///
    /// # Panics
    ///
    /// Panics when the checkup fails: the messaging core refuses to start
    /// against an incompatible store.
    pub fn new(store: Store) -> Self {
        let outbox = OutboxStore::new(store);
        if let Err(err) = outbox.checkup() {
            panic!("outbox schema checkup failed: {err}");
        }
        OutboxWriter { outbox }
    }

    /// Append one record through the caller's scope.
    ///
    /// Fails with [`OutboxError::MissingContext`] before touching the store
    /// when `ctx` carries no trace id; store failures are returned as-is,
    /// since the caller's rollback, not this method, provides atomicity.
    ///
    /// `aggregate_id` must be a UUID string: it travels as the `cid` header
    /// and consumers reject envelopes whose `cid` does not parse.
    pub fn put(
        &self,
        scope: &TxScope<'_>,
        ctx: &MessageContext,
        aggregate_id: &str,
        msg: OutboxMessage,
    ) -> Result<OutboxRecord, OutboxError> {
        let trace_id = ctx.trace_id().ok_or(OutboxError::MissingContext)?;
        msg.validate()?;
        if Uuid::parse_str(aggregate_id).is_err() {
            return Err(OutboxError::Invalid("aggregate_id"));
        }

        let record = self.outbox.create(
            scope,
            NewOutboxRecord {
                aggregate_id: aggregate_id.to_string(),
                aggregate_type: msg.topic,
                trace_id: trace_id.to_string(),
                event_type: msg.event_type,
                name: msg.name,
                payload: msg.payload,
            },
        )?;

        log::debug!(
            "outbox record {} appended for {} on {}",
            record.id,
            record.aggregate_id,
            record.aggregate_type
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::record::EventType;

    fn message() -> OutboxMessage {
        OutboxMessage::new("PollCreated", "polls", EventType::Event, r#"{"id":"p-1"}"#)
    }

    #[test]
    fn put_requires_trace_id() {
        let store = Store::in_memory().unwrap();
        let writer = OutboxWriter::new(store.clone());
        let poll_id = Uuid::new_v4().to_string();

        let result = store.with_scope(|scope| {
            writer.put(scope, &MessageContext::new(), &poll_id, message())
        });

        assert!(matches!(result, Err(OutboxError::MissingContext)));
    }

    #[test]
    fn put_appends_record_with_caller_trace() {
        let store = Store::in_memory().unwrap();
        let writer = OutboxWriter::new(store.clone());
        let trace_id = Uuid::new_v4();
        let poll_id = Uuid::new_v4().to_string();
        let ctx = MessageContext::new().with_trace_id(trace_id);

        let record = store
            .with_scope(|scope| writer.put(scope, &ctx, &poll_id, message()))
            .unwrap();

        assert_eq!(record.trace_id, trace_id.to_string());
        assert_eq!(record.aggregate_id, poll_id);
        assert_eq!(record.aggregate_type, "polls");
        assert_eq!(record.event_type, EventType::Event);
    }

    #[test]
    fn put_rejects_a_non_uuid_aggregate_id() {
        let store = Store::in_memory().unwrap();
        let writer = OutboxWriter::new(store.clone());
        let ctx = MessageContext::new().with_trace_id(Uuid::new_v4());

        let result = store.with_scope(|scope| writer.put(scope, &ctx, "p-1", message()));

        assert!(matches!(result, Err(OutboxError::Invalid("aggregate_id"))));
    }
}
