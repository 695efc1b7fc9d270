// Per-peer session state
//
// The phase is a tagged union with checked transitions: "encrypted" and
// "authenticated" are derived from it, never tracked as independent flags,
// so a session cannot be authenticated without being encrypted. The session
// key is owned exclusively here and is dropped (zeroized) on close.

use crate::crypto::{self, SessionKey};
use crate::gatt::CharacteristicId;
use crate::identity::{verify_signature, DeviceKeypair, PeerIdentity};
use crate::message::{signature_base, MessageEnvelope, ENVELOPE_NONCE_LEN};
use crate::recovery::ErrorCode;
use crate::transport::ConnectionParams;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Transport-level link up, no key material yet
    Connected,
    /// Session key established, passcode proof outstanding
    Authenticating,
    /// Fully authenticated encrypted channel
    SecureReady,
    /// Closed; all state cleared
    Disconnected,
}

/// Errors for session state handling
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Invalid session transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionPhase,
        to: SessionPhase,
    },
}

/// Failures of the secure channel itself
#[derive(Error, Debug, Clone)]
pub enum SecureChannelError {
    #[error("Session key not established")]
    KeyMissing,
    #[error("Secure channel not ready")]
    NotReady,
    #[error("Envelope expired")]
    Expired,
    #[error("Envelope sender does not match session peer")]
    SenderMismatch,
    #[error("Envelope addressed to a different device")]
    RecipientMismatch,
    #[error("Envelope signature invalid")]
    Signature,
    #[error("Payload authentication failed")]
    Decrypt,
}

impl SecureChannelError {
    /// Classification for the recovery tracker
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Expired => ErrorCode::ExpiredEnvelope,
            Self::SenderMismatch | Self::RecipientMismatch | Self::Signature => {
                ErrorCode::SignatureInvalid
            }
            Self::Decrypt => ErrorCode::DecryptionFailed,
            Self::KeyMissing | Self::NotReady => ErrorCode::AuthenticationFailed,
        }
    }
}

/// State for one connected peer.
///
/// Mutable fields are individually guarded so one peer's handshake never
/// blocks another peer's traffic; the activity timestamp is atomic for the
/// idle sweeper.
pub struct Session {
    /// Session ID (UUID v4)
    pub id: String,
    /// Unix timestamp at connection accept
    pub connected_at: u64,
    peer: RwLock<PeerIdentity>,
    phase: RwLock<SessionPhase>,
    key: RwLock<Option<SessionKey>>,
    subscriptions: RwLock<HashSet<CharacteristicId>>,
    params: RwLock<ConnectionParams>,
    last_activity: AtomicU64,
}

impl Session {
    /// Create a session in the `Connected` phase
    pub fn new(peer: PeerIdentity, now: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connected_at: now,
            peer: RwLock::new(peer),
            phase: RwLock::new(SessionPhase::Connected),
            key: RwLock::new(None),
            subscriptions: RwLock::new(HashSet::new()),
            params: RwLock::new(ConnectionParams::default()),
            last_activity: AtomicU64::new(now),
        }
    }

    /// Snapshot of the peer identity
    pub fn peer(&self) -> PeerIdentity {
        self.peer.read().clone()
    }

    /// Replace the provisional identity once the peer's certificate is
    /// validated during the handshake.
    pub fn set_peer(&self, peer: PeerIdentity) {
        *self.peer.write() = peer;
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    /// Session key established
    pub fn is_encrypted(&self) -> bool {
        matches!(
            self.phase(),
            SessionPhase::Authenticating | SessionPhase::SecureReady
        )
    }

    /// Full handshake complete
    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionPhase::SecureReady
    }

    fn transition(&self, to: SessionPhase) -> Result<(), SessionError> {
        let mut phase = self.phase.write();
        let from = *phase;
        let allowed = matches!(
            (from, to),
            (SessionPhase::Connected, SessionPhase::Authenticating)
                | (SessionPhase::Authenticating, SessionPhase::SecureReady)
                | (_, SessionPhase::Disconnected)
        );
        if !allowed {
            return Err(SessionError::InvalidTransition { from, to });
        }
        *phase = to;
        Ok(())
    }

    /// Install the derived session key; moves `Connected -> Authenticating`
    pub fn install_key(&self, key: SessionKey) -> Result<(), SessionError> {
        self.transition(SessionPhase::Authenticating)?;
        *self.key.write() = Some(key);
        Ok(())
    }

    /// Passcode proof accepted; moves `Authenticating -> SecureReady`
    pub fn promote_secure(&self) -> Result<(), SessionError> {
        self.transition(SessionPhase::SecureReady)
    }

    /// Seal raw bytes under the session key (handshake frames)
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        let key = self.key.read();
        let key = key.as_ref().ok_or(SecureChannelError::KeyMissing)?;
        crypto::seal(key, plaintext).map_err(|_| SecureChannelError::Decrypt)
    }

    /// Open raw sealed bytes under the session key (handshake frames)
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        let key = self.key.read();
        let key = key.as_ref().ok_or(SecureChannelError::KeyMissing)?;
        crypto::open(key, sealed).map_err(|_| SecureChannelError::Decrypt)
    }

    /// Build a signed, sealed envelope for the session peer.
    ///
    /// Requires `SecureReady`: transaction traffic never flows on a
    /// half-authenticated channel.
    pub fn build_envelope(
        &self,
        keys: &DeviceKeypair,
        own_id: &str,
        plaintext: &[u8],
        now: u64,
    ) -> Result<MessageEnvelope, SecureChannelError> {
        if !self.is_authenticated() {
            return Err(SecureChannelError::NotReady);
        }
        let sealed = self.seal(plaintext)?;
        let mut envelope = MessageEnvelope::new(
            own_id,
            self.peer.read().device_id.clone(),
            now,
            crypto::random_bytes::<ENVELOPE_NONCE_LEN>(),
            sealed,
        );
        envelope.signature = keys.sign(&signature_base(&envelope));
        Ok(envelope)
    }

    /// Validate and open an envelope from the session peer.
    ///
    /// Order is fixed: expiry, then addressing, then signature against the
    /// claimed sender — only then is the payload decrypted.
    pub fn open_envelope(
        &self,
        envelope: &MessageEnvelope,
        own_id: &str,
        now: u64,
        max_age_secs: u64,
    ) -> Result<Vec<u8>, SecureChannelError> {
        if !self.is_authenticated() {
            return Err(SecureChannelError::NotReady);
        }
        if crate::message::is_expired(envelope, now, max_age_secs) {
            return Err(SecureChannelError::Expired);
        }
        if envelope.recipient_id != own_id {
            return Err(SecureChannelError::RecipientMismatch);
        }
        let peer = self.peer.read().clone();
        if envelope.sender_id != peer.device_id {
            return Err(SecureChannelError::SenderMismatch);
        }
        verify_signature(
            &signature_base(envelope),
            &envelope.signature,
            &peer.public_key,
        )
        .map_err(|_| SecureChannelError::Signature)?;
        self.open(&envelope.payload)
    }

    pub fn subscribe(&self, characteristic: CharacteristicId) {
        self.subscriptions.write().insert(characteristic);
    }

    pub fn unsubscribe(&self, characteristic: CharacteristicId) {
        self.subscriptions.write().remove(&characteristic);
    }

    pub fn is_subscribed(&self, characteristic: CharacteristicId) -> bool {
        self.subscriptions.read().contains(&characteristic)
    }

    pub fn set_params(&self, params: ConnectionParams) {
        *self.params.write() = params;
    }

    pub fn params(&self) -> ConnectionParams {
        *self.params.read()
    }

    /// Record activity for the idle sweeper
    pub fn touch(&self, now: u64) {
        self.last_activity.store(now, Ordering::Relaxed);
    }

    /// Seconds since last activity
    pub fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_activity.load(Ordering::Relaxed))
    }

    /// Close the session: key dropped and zeroized, subscriptions cleared.
    /// Idempotent.
    pub fn close(&self) {
        *self.phase.write() = SessionPhase::Disconnected;
        self.key.write().take();
        self.subscriptions.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_session_key, SESSION_NONCE_LEN};

    fn secure_pair() -> (Session, DeviceKeypair, Session, DeviceKeypair) {
        let central_keys = DeviceKeypair::generate();
        let peripheral_keys = DeviceKeypair::generate();
        let cn = crypto::random_bytes::<SESSION_NONCE_LEN>();
        let pn = crypto::random_bytes::<SESSION_NONCE_LEN>();

        let central_session = Session::new(peripheral_keys.identity("terminal"), 1000);
        let peripheral_session = Session::new(central_keys.identity("wallet"), 1000);

        let key_c =
            derive_session_key(&central_keys, &peripheral_keys.public_key(), &cn, &pn).unwrap();
        let key_p =
            derive_session_key(&peripheral_keys, &central_keys.public_key(), &cn, &pn).unwrap();

        central_session.install_key(key_c).unwrap();
        peripheral_session.install_key(key_p).unwrap();
        central_session.promote_secure().unwrap();
        peripheral_session.promote_secure().unwrap();

        (
            central_session,
            central_keys,
            peripheral_session,
            peripheral_keys,
        )
    }

    #[test]
    fn test_phase_progression() {
        let keys = DeviceKeypair::generate();
        let session = Session::new(keys.identity("peer"), 0);
        assert_eq!(session.phase(), SessionPhase::Connected);
        assert!(!session.is_encrypted());
        assert!(!session.is_authenticated());

        session
            .install_key(derive_session_key(&keys, &keys.public_key(), &[0; 16], &[1; 16]).unwrap())
            .unwrap();
        assert!(session.is_encrypted());
        assert!(!session.is_authenticated());

        session.promote_secure().unwrap();
        assert!(session.is_encrypted());
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_cannot_skip_to_secure_ready() {
        let keys = DeviceKeypair::generate();
        let session = Session::new(keys.identity("peer"), 0);
        assert!(matches!(
            session.promote_secure(),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_closed_session_stays_closed() {
        let keys = DeviceKeypair::generate();
        let session = Session::new(keys.identity("peer"), 0);
        session.close();
        assert_eq!(session.phase(), SessionPhase::Disconnected);
        assert!(matches!(
            session
                .install_key(derive_session_key(&keys, &keys.public_key(), &[0; 16], &[1; 16]).unwrap()),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_envelope_roundtrip_between_peers() {
        let (central_session, central_keys, peripheral_session, peripheral_keys) = secure_pair();
        let central_id = central_keys.device_id();
        let peripheral_id = peripheral_keys.device_id();

        let envelope = central_session
            .build_envelope(&central_keys, &central_id, b"withdraw 50", 2000)
            .expect("builds");
        let opened = peripheral_session
            .open_envelope(&envelope, &peripheral_id, 2010, 30)
            .expect("opens");
        assert_eq!(opened, b"withdraw 50");
    }

    #[test]
    fn test_expired_envelope_rejected() {
        let (central_session, central_keys, peripheral_session, peripheral_keys) = secure_pair();
        let envelope = central_session
            .build_envelope(&central_keys, &central_keys.device_id(), b"x", 2000)
            .unwrap();
        assert!(matches!(
            peripheral_session.open_envelope(&envelope, &peripheral_keys.device_id(), 2031, 30),
            Err(SecureChannelError::Expired)
        ));
        // Exactly at the boundary: still accepted
        peripheral_session
            .open_envelope(&envelope, &peripheral_keys.device_id(), 2030, 30)
            .expect("boundary accepted");
    }

    #[test]
    fn test_tampered_envelope_rejected_before_decrypt() {
        let (central_session, central_keys, peripheral_session, peripheral_keys) = secure_pair();
        let mut envelope = central_session
            .build_envelope(&central_keys, &central_keys.device_id(), b"x", 2000)
            .unwrap();
        envelope.timestamp += 1;
        assert!(matches!(
            peripheral_session.open_envelope(&envelope, &peripheral_keys.device_id(), 2005, 30),
            Err(SecureChannelError::Signature)
        ));
    }

    #[test]
    fn test_envelope_from_stranger_rejected() {
        let (central_session, central_keys, peripheral_session, peripheral_keys) = secure_pair();
        let mut envelope = central_session
            .build_envelope(&central_keys, &central_keys.device_id(), b"x", 2000)
            .unwrap();
        envelope.sender_id = "someone-else".to_string();
        assert!(matches!(
            peripheral_session.open_envelope(&envelope, &peripheral_keys.device_id(), 2005, 30),
            Err(SecureChannelError::SenderMismatch)
        ));
    }

    #[test]
    fn test_envelope_requires_secure_ready() {
        let keys = DeviceKeypair::generate();
        let session = Session::new(keys.identity("peer"), 0);
        assert!(matches!(
            session.build_envelope(&keys, &keys.device_id(), b"x", 10),
            Err(SecureChannelError::NotReady)
        ));
    }

    #[test]
    fn test_close_clears_key_and_subscriptions() {
        let (central_session, central_keys, _p, _pk) = secure_pair();
        central_session.subscribe(CharacteristicId::Transaction);
        central_session.close();
        assert!(matches!(
            central_session.seal(b"x"),
            Err(SecureChannelError::KeyMissing)
        ));
        assert!(!central_session.is_subscribed(CharacteristicId::Transaction));
    }

    #[test]
    fn test_idle_tracking() {
        let keys = DeviceKeypair::generate();
        let session = Session::new(keys.identity("peer"), 1000);
        assert_eq!(session.idle_for(1030), 30);
        session.touch(1040);
        assert_eq!(session.idle_for(1041), 1);
    }
}
