//! TransportMessage - serialized envelope that travels through transports.

use serde::{Deserialize, Serialize};

use super::headers::Headers;

/// Headers + opaque body bytes.
///
/// The body is never touched after serialization: forwarding to the error
/// queue keeps it byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl TransportMessage {
    pub fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.message_id()
    }
}

/// A message waiting in a transaction context for commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub destination: String,
    pub message: TransportMessage,
}
