// Handshake frames exchanged over the authentication characteristic
//
// Frame order: Hello (central) -> HelloAck (peripheral notification) ->
// OtpProof (central) -> Complete (peripheral notification). Hello and
// HelloAck are signed over a transcript base so each side proves control
// of the key its certificate binds; OtpProof and Complete are sealed under
// the freshly derived session key.

use crate::crypto::SESSION_NONCE_LEN;
use crate::identity::DeviceCertificate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for handshake framing
#[derive(Error, Debug, Clone)]
pub enum HandshakeError {
    #[error("Malformed handshake frame: {0}")]
    Malformed(String),
    #[error("Unexpected handshake frame: expected {0}")]
    UnexpectedFrame(&'static str),
}

/// One handshake frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HandshakeFrame {
    /// Central opens the handshake with its certificate and nonce
    Hello {
        certificate: DeviceCertificate,
        session_nonce: [u8; SESSION_NONCE_LEN],
        /// Signature over [`hello_base`] by the central's device key
        signature: Vec<u8>,
    },
    /// Peripheral answers with its nonce and the passcode delivery reference
    HelloAck {
        session_nonce: [u8; SESSION_NONCE_LEN],
        /// Reference id the passcode was delivered under
        otp_reference: String,
        /// Signature over [`ack_base`] by the peripheral's device key
        signature: Vec<u8>,
    },
    /// Central proves passcode possession, sealed under the session key
    OtpProof { sealed_code: Vec<u8> },
    /// Peripheral confirms the channel, sealed under the session key
    Complete { sealed_receipt: Vec<u8> },
}

/// Receipt plaintext inside the `Complete` frame
pub const COMPLETE_RECEIPT: &[u8] = b"secure-ready";

/// Encode a frame for a characteristic write or notification
pub fn encode_frame(frame: &HandshakeFrame) -> Result<Vec<u8>, HandshakeError> {
    bincode::serialize(frame).map_err(|e| HandshakeError::Malformed(e.to_string()))
}

/// Decode a frame from characteristic bytes
pub fn decode_frame(bytes: &[u8]) -> Result<HandshakeFrame, HandshakeError> {
    bincode::deserialize(bytes).map_err(|e| HandshakeError::Malformed(e.to_string()))
}

/// Transcript base the central signs in `Hello`
pub fn hello_base(subject_id: &str, session_nonce: &[u8; SESSION_NONCE_LEN]) -> Vec<u8> {
    let mut base = Vec::new();
    base.extend_from_slice(b"vaultlink-hello");
    base.push(b'|');
    base.extend_from_slice(subject_id.as_bytes());
    base.push(b'|');
    base.extend_from_slice(hex::encode(session_nonce).as_bytes());
    base
}

/// Transcript base the peripheral signs in `HelloAck`.
///
/// Binds both nonces so neither side can replay the other's half of the
/// exchange into a different session.
pub fn ack_base(
    subject_id: &str,
    central_nonce: &[u8; SESSION_NONCE_LEN],
    peripheral_nonce: &[u8; SESSION_NONCE_LEN],
    otp_reference: &str,
) -> Vec<u8> {
    let mut base = Vec::new();
    base.extend_from_slice(b"vaultlink-ack");
    base.push(b'|');
    base.extend_from_slice(subject_id.as_bytes());
    base.push(b'|');
    base.extend_from_slice(hex::encode(central_nonce).as_bytes());
    base.push(b'|');
    base.extend_from_slice(hex::encode(peripheral_nonce).as_bytes());
    base.push(b'|');
    base.extend_from_slice(otp_reference.as_bytes());
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DeviceKeypair;

    fn sample_certificate() -> DeviceCertificate {
        let keys = DeviceKeypair::generate();
        DeviceCertificate {
            subject_id: keys.device_id(),
            display_name: "wallet".to_string(),
            public_key: keys.public_key(),
            contact_ref: "+15550100".to_string(),
            issued_at: 0,
            expires_at: u64::MAX,
            issuer: "bank-ca".to_string(),
            signature: vec![0u8; 64],
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = HandshakeFrame::Hello {
            certificate: sample_certificate(),
            session_nonce: [3u8; SESSION_NONCE_LEN],
            signature: vec![1u8; 64],
        };
        let bytes = encode_frame(&frame).expect("encodes");
        match decode_frame(&bytes).expect("decodes") {
            HandshakeFrame::Hello { session_nonce, .. } => {
                assert_eq!(session_nonce, [3u8; SESSION_NONCE_LEN]);
            }
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_frame_rejected() {
        assert!(decode_frame(&[0xFF; 7]).is_err());
    }

    #[test]
    fn test_bases_bind_their_inputs() {
        let a = hello_base("subject", &[1u8; SESSION_NONCE_LEN]);
        let b = hello_base("subject", &[2u8; SESSION_NONCE_LEN]);
        assert_ne!(a, b);

        let ack_1 = ack_base("subject", &[1u8; 16], &[2u8; 16], "ref-1");
        let ack_2 = ack_base("subject", &[1u8; 16], &[2u8; 16], "ref-2");
        assert_ne!(ack_1, ack_2);
    }

    #[test]
    fn test_hello_and_ack_domains_differ() {
        // Same inputs must never produce an interchangeable transcript
        let hello = hello_base("subject", &[1u8; SESSION_NONCE_LEN]);
        let ack = ack_base("subject", &[1u8; 16], &[1u8; 16], "");
        assert_ne!(hello, ack);
    }
}
