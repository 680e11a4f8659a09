use std::marker::PhantomData;

use serde::Serialize;

use super::error::OutboxError;
use super::record::EventType;

/// What a producer hands to the outbox writer.
#[derive(Clone, Debug)]
pub struct OutboxMessage {
    pub name: String,
    /// Destination topic; stored as the record's aggregate type.
    pub topic: String,
    pub event_type: EventType,
    /// Serialized JSON body.
    pub payload: String,
}

impl OutboxMessage {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        event_type: EventType,
        payload: impl Into<String>,
    ) -> Self {
        OutboxMessage {
            name: name.into(),
            topic: topic.into(),
            event_type,
            payload: payload.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), OutboxError> {
        if self.name.is_empty() {
            return Err(OutboxError::Invalid("name"));
        }
        if self.topic.is_empty() {
            return Err(OutboxError::Invalid("topic"));
        }
        if self.payload.is_empty() {
            return Err(OutboxError::Invalid("payload"));
        }
        Ok(())
    }
}

/// Declares a message kind's name, topic, and type once, so call sites only
/// supply the payload.
///
/// ## Example
///
/// ```ignore
/// let vote_cast: MessageSchema<VoteCast> =
///     MessageSchema::new("VoteCast", "votes", EventType::Event);
///
/// let msg = vote_cast.message(&VoteCast { poll_id, option })?;
/// writer.put(scope, &ctx, &poll_id, msg)?;
/// ```
pub struct MessageSchema<T> {
    name: String,
    topic: String,
    event_type: EventType,
    _payload: PhantomData<fn(T)>,
}

impl<T: Serialize> MessageSchema<T> {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        MessageSchema {
            name: name.into(),
            topic: topic.into(),
            event_type,
            _payload: PhantomData,
        }
    }

    /// Build an [`OutboxMessage`] with the payload serialized to JSON.
    pub fn message(&self, payload: &T) -> Result<OutboxMessage, serde_json::Error> {
        Ok(OutboxMessage {
            name: self.name.clone(),
            topic: self.topic.clone(),
            event_type: self.event_type,
            payload: serde_json::to_string(payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct VoteCast {
        poll_id: String,
        option: u32,
    }

    #[test]
    fn schema_serializes_payload() {
        let schema: MessageSchema<VoteCast> =
            MessageSchema::new("VoteCast", "votes", EventType::Event);

        let msg = schema
            .message(&VoteCast {
                poll_id: "p-1".into(),
                option: 2,
            })
            .unwrap();

        assert_eq!(msg.name, "VoteCast");
        assert_eq!(msg.topic, "votes");
        assert_eq!(msg.payload, r#"{"poll_id":"p-1","option":2}"#);
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let msg = OutboxMessage::new("", "votes", EventType::Event, "{}");
        assert!(matches!(msg.validate(), Err(OutboxError::Invalid("name"))));

        let msg = OutboxMessage::new("VoteCast", "votes", EventType::Event, "");
        assert!(matches!(msg.validate(), Err(OutboxError::Invalid("payload"))));
    }
}
