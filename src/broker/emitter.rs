use std::sync::{Arc, Mutex};

use event_emitter_rs::EventEmitter;

use super::{BrokerPublisher, Envelope, PublishError};

/// A publisher that emits envelopes to in-process subscribers via an
/// [`EventEmitter`], keyed by topic. Useful when the "broker" is the same
/// process, e.g. read-model projections listening to relay output.
pub struct EmitterPublisher {
    emitter: Arc<Mutex<EventEmitter>>,
}

impl Default for EmitterPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EmitterPublisher {
    pub fn new() -> Self {
        EmitterPublisher {
            emitter: Arc::new(Mutex::new(EventEmitter::new())),
        }
    }

    pub fn with_emitter(emitter: Arc<Mutex<EventEmitter>>) -> Self {
        EmitterPublisher { emitter }
    }

    /// Shared handle to the emitter, for registering listeners.
    pub fn emitter(&self) -> Arc<Mutex<EventEmitter>> {
        Arc::clone(&self.emitter)
    }
}

impl BrokerPublisher for EmitterPublisher {
    fn publish(&self, topic: &str, _key: &str, envelope: Envelope) -> Result<(), PublishError> {
        // The emitter carries string payloads; assumes UTF-8.
        let payload = String::from_utf8_lossy(&envelope.payload).into_owned();
        self.emitter
            .lock()
            .map_err(|_| PublishError::Other("emitter lock poisoned".into()))?
            .emit(topic, payload);
        Ok(())
    }
}
