// Envelope codec — stable serialization, expiry check, signature base

use super::types::{MessageEnvelope, PROTOCOL_VERSION};
use thiserror::Error;

/// Errors for envelope encoding/decoding
#[derive(Error, Debug, Clone)]
pub enum CodecError {
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

/// Encode an envelope for the wire
pub fn encode_envelope(envelope: &MessageEnvelope) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(envelope).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode an envelope, rejecting unknown protocol versions
pub fn decode_envelope(bytes: &[u8]) -> Result<MessageEnvelope, CodecError> {
    let envelope: MessageEnvelope =
        bincode::deserialize(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(envelope.version));
    }
    Ok(envelope)
}

/// Whether the envelope is stale.
///
/// Expiry is strict: an envelope aged exactly `max_age_secs` is still
/// fresh. With no sequence numbers on this link, this check is the primary
/// replay/staleness defense and must run before any further processing.
pub fn is_expired(envelope: &MessageEnvelope, now: u64, max_age_secs: u64) -> bool {
    now.saturating_sub(envelope.timestamp) > max_age_secs
}

/// Deterministic byte sequence that gets signed and verified.
///
/// Non-signature fields concatenated in fixed order with the literal `|`
/// delimiter, binary fields hex-encoded. Implementations on every platform
/// must agree byte-for-byte on this sequence or all signatures mismatch.
pub fn signature_base(envelope: &MessageEnvelope) -> Vec<u8> {
    let mut base = Vec::new();
    base.extend_from_slice(envelope.version.to_string().as_bytes());
    base.push(b'|');
    base.extend_from_slice(envelope.message_id.as_bytes());
    base.push(b'|');
    base.extend_from_slice(envelope.sender_id.as_bytes());
    base.push(b'|');
    base.extend_from_slice(envelope.recipient_id.as_bytes());
    base.push(b'|');
    base.extend_from_slice(envelope.timestamp.to_string().as_bytes());
    base.push(b'|');
    base.extend_from_slice(hex::encode(envelope.nonce).as_bytes());
    base.push(b'|');
    base.extend_from_slice(hex::encode(&envelope.payload).as_bytes());
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::ENVELOPE_NONCE_LEN;
    use proptest::prelude::*;

    fn sample_envelope() -> MessageEnvelope {
        let mut envelope = MessageEnvelope::new(
            "sender-id",
            "recipient-id",
            1_700_000_000,
            [7u8; ENVELOPE_NONCE_LEN],
            vec![1, 2, 3, 4],
        );
        envelope.signature = vec![9u8; 64];
        envelope
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelope = sample_envelope();
        let bytes = encode_envelope(&envelope).expect("encodes");
        let decoded = decode_envelope(&bytes).expect("decodes");
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut envelope = sample_envelope();
        envelope.version = 99;
        let bytes = bincode::serialize(&envelope).expect("serializes");
        assert!(matches!(
            decode_envelope(&bytes),
            Err(CodecError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(matches!(
            decode_envelope(&[0xFF, 0x01, 0x02]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_expiry_boundary() {
        let envelope = sample_envelope();
        let max_age = 30;
        // Exactly max_age old: still fresh
        assert!(!is_expired(&envelope, envelope.timestamp + max_age, max_age));
        // One second past: expired
        assert!(is_expired(&envelope, envelope.timestamp + max_age + 1, max_age));
        // Clock behind the sender: not expired
        assert!(!is_expired(&envelope, envelope.timestamp - 5, max_age));
    }

    #[test]
    fn test_signature_base_is_deterministic_and_field_sensitive() {
        let envelope = sample_envelope();
        assert_eq!(signature_base(&envelope), signature_base(&envelope));

        let mut tampered = envelope.clone();
        tampered.timestamp += 1;
        assert_ne!(signature_base(&envelope), signature_base(&tampered));

        let mut tampered = envelope.clone();
        tampered.payload.push(0);
        assert_ne!(signature_base(&envelope), signature_base(&tampered));
    }

    #[test]
    fn test_signature_base_excludes_signature() {
        let envelope = sample_envelope();
        let mut resigned = envelope.clone();
        resigned.signature = vec![0u8; 64];
        assert_eq!(signature_base(&envelope), signature_base(&resigned));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_envelope(
            sender in "[a-f0-9]{16}",
            recipient in "[a-f0-9]{16}",
            timestamp in any::<u64>(),
            nonce in any::<[u8; ENVELOPE_NONCE_LEN]>(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            signature in proptest::collection::vec(any::<u8>(), 64),
        ) {
            let mut envelope = MessageEnvelope::new(sender, recipient, timestamp, nonce, payload);
            envelope.signature = signature;
            let bytes = encode_envelope(&envelope).unwrap();
            prop_assert_eq!(decode_envelope(&bytes).unwrap(), envelope);
        }
    }
}
