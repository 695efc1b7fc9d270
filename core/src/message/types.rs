// Envelope types — the wire contract of the secure channel

use serde::{Deserialize, Serialize};

/// Current wire protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Length of the per-envelope anti-replay nonce
pub const ENVELOPE_NONCE_LEN: usize = 16;

/// The signed, timestamped, nonce-bearing wrapper around an application
/// payload — what actually crosses the transaction characteristic.
///
/// The payload is AEAD-sealed with the session key; the signature covers
/// every other field through [`super::codec::signature_base`] and must
/// verify against the claimed sender before the payload is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Wire protocol version; decoders reject versions they don't know
    pub version: u8,
    /// Unique message ID (UUID v4)
    pub message_id: String,
    /// Sender device ID
    pub sender_id: String,
    /// Recipient device ID
    pub recipient_id: String,
    /// Unix timestamp (seconds) at send time
    pub timestamp: u64,
    /// Random anti-replay nonce
    pub nonce: [u8; ENVELOPE_NONCE_LEN],
    /// AEAD-sealed payload
    pub payload: Vec<u8>,
    /// Detached Ed25519 signature over the signature base
    pub signature: Vec<u8>,
}

impl MessageEnvelope {
    /// Create an unsigned envelope; the signature is attached after the
    /// base is computed over the populated fields.
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        timestamp: u64,
        nonce: [u8; ENVELOPE_NONCE_LEN],
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            timestamp,
            nonce,
            payload,
            signature: Vec::new(),
        }
    }
}
