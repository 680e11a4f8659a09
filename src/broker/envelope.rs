use std::collections::HashMap;

/// A broker-delivered message: string-keyed metadata headers plus an opaque
/// payload handed unmodified to the registered handler.
///
/// The consumer requires the headers `id`, `tid`, `cid`, `type`, `name`,
/// and `ts`; the relay sets all six when it publishes an outbox record.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create an envelope with the given payload bytes and no headers.
    pub fn new(payload: Vec<u8>) -> Self {
        Envelope {
            headers: HashMap::new(),
            payload,
        }
    }

    /// Create an envelope with a string payload.
    pub fn with_string_payload(payload: impl Into<String>) -> Self {
        Envelope::new(payload.into().into_bytes())
    }

    /// Create an envelope with a bitcode-serialized payload.
    pub fn encode<T: serde::Serialize>(payload: &T) -> Result<Self, bitcode::Error> {
        Ok(Envelope::new(bitcode::serialize(payload)?))
    }

    /// Decode the payload from bitcode binary format.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Get a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
