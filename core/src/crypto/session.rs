// Session key agreement and payload sealing
//
// Flow:
// 1. Convert each side's Ed25519 identity key → X25519 (same curve)
// 2. ECDH: own_secret × peer_public → shared_secret
// 3. KDF: SHA-256(shared_secret || central_nonce || peripheral_nonce) → session key
// 4. Seal: ChaCha20-Poly1305(session_key, random 96-bit nonce, plaintext)
// 5. Output layout: nonce || ciphertext || tag

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::identity::DeviceKeypair;

/// AEAD nonce length (96 bits)
pub const AEAD_NONCE_LEN: usize = 12;

/// Poly1305 authentication tag length (128 bits)
pub const AEAD_TAG_LEN: usize = 16;

/// Session key length (256 bits)
pub const SESSION_KEY_LEN: usize = 32;

/// Handshake session-nonce length
pub const SESSION_NONCE_LEN: usize = 16;

/// Errors for session cryptography
#[derive(Error, Debug, Clone)]
pub enum CryptoError {
    #[error("Invalid peer public key")]
    InvalidPublicKey,
    #[error("Key agreement failed")]
    KeyAgreementFailed,
    #[error("Seal failed")]
    SealFailed,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Ciphertext too short")]
    TruncatedCiphertext,
}

/// A derived session key, exclusively owned by its session.
///
/// Not cloneable and zeroed on drop; encryption and decryption go through
/// [`seal`] and [`open`], never by exporting the raw bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub(crate) fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    fn bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Convert an Ed25519 signing key to an X25519 static secret for ECDH.
///
/// Ed25519 and X25519 share Curve25519; the X25519 secret is the clamped
/// SHA-512 hash of the Ed25519 secret, which is how Ed25519 internally
/// derives its scalar.
fn ed25519_to_x25519_secret(signing_key: &SigningKey) -> StaticSecret {
    let mut hash = <sha2::Sha512 as sha2::Digest>::digest(signing_key.to_bytes());
    let mut secret_bytes = [0u8; 32];
    secret_bytes.copy_from_slice(&hash[..32]);

    let secret = StaticSecret::from(secret_bytes);

    secret_bytes.zeroize();
    hash.as_mut_slice().zeroize();

    secret
}

/// Convert an Ed25519 public key to an X25519 public key via the
/// birational Edwards → Montgomery map.
fn ed25519_public_to_x25519(public_key_bytes: &[u8; 32]) -> Result<X25519PublicKey, CryptoError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;

    let compressed = CompressedEdwardsY::from_slice(public_key_bytes)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let edwards_point = compressed
        .decompress()
        .ok_or(CryptoError::InvalidPublicKey)?;

    let montgomery = edwards_point.to_montgomery();
    Ok(X25519PublicKey::from(montgomery.to_bytes()))
}

/// Derive the shared session key from the static-static ECDH secret mixed
/// with both sides' handshake nonces.
///
/// Both peers compute the same key: ECDH is symmetric and the nonces enter
/// the hash in the fixed central-then-peripheral order.
pub fn derive_session_key(
    own: &DeviceKeypair,
    peer_public: &[u8; 32],
    central_nonce: &[u8; SESSION_NONCE_LEN],
    peripheral_nonce: &[u8; SESSION_NONCE_LEN],
) -> Result<SessionKey, CryptoError> {
    let own_secret = ed25519_to_x25519_secret(&own.signing_key);
    let peer_x25519 = ed25519_public_to_x25519(peer_public)?;

    let shared_secret = own_secret.diffie_hellman(&peer_x25519);

    let mut hasher = Sha256::new();
    hasher.update(shared_secret.as_bytes());
    hasher.update(central_nonce);
    hasher.update(peripheral_nonce);
    let digest = hasher.finalize();

    let mut key_bytes = [0u8; SESSION_KEY_LEN];
    key_bytes.copy_from_slice(&digest);
    let key = SessionKey::from_bytes(key_bytes);
    key_bytes.zeroize();

    Ok(key)
}

/// Seal a plaintext under the session key.
///
/// Output: `nonce || ciphertext || tag` with a fresh random 96-bit nonce
/// per call.
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.bytes()).map_err(|_| CryptoError::SealFailed)?;

    let mut nonce_bytes = [0u8; AEAD_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::SealFailed)?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed payload.
///
/// Any tag mismatch is a hard authentication failure; no partial plaintext
/// and no unencrypted fallback.
pub fn open(key: &SessionKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < AEAD_NONCE_LEN + AEAD_TAG_LEN {
        return Err(CryptoError::TruncatedCiphertext);
    }

    let cipher =
        ChaCha20Poly1305::new_from_slice(key.bytes()).map_err(|_| CryptoError::SealFailed)?;
    let nonce = Nonce::from_slice(&sealed[..AEAD_NONCE_LEN]);

    cipher
        .decrypt(nonce, &sealed[AEAD_NONCE_LEN..])
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Fill an array with cryptographically secure random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a 6-digit one-time passcode
pub fn generate_otp() -> String {
    use rand::Rng;
    let code: u32 = rand::rngs::OsRng.gen_range(0..1_000_000);
    format!("{:06}", code)
}

/// Compare a presented passcode against the expected one in constant time
pub fn verify_otp(candidate: &str, expected: &str) -> bool {
    let a = candidate.as_bytes();
    let b = expected.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let central = DeviceKeypair::generate();
        let peripheral = DeviceKeypair::generate();
        let central_nonce = random_bytes::<SESSION_NONCE_LEN>();
        let peripheral_nonce = random_bytes::<SESSION_NONCE_LEN>();

        let key_c = derive_session_key(
            &central,
            &peripheral.public_key(),
            &central_nonce,
            &peripheral_nonce,
        )
        .expect("central derives");
        let key_p = derive_session_key(
            &peripheral,
            &central.public_key(),
            &central_nonce,
            &peripheral_nonce,
        )
        .expect("peripheral derives");

        let sealed = seal(&key_c, b"cross-check").expect("seals");
        let opened = open(&key_p, &sealed).expect("peer opens");
        assert_eq!(opened, b"cross-check");
    }

    #[test]
    fn test_nonces_change_the_key() {
        let central = DeviceKeypair::generate();
        let peripheral = DeviceKeypair::generate();
        let nonce_a = [1u8; SESSION_NONCE_LEN];
        let nonce_b = [2u8; SESSION_NONCE_LEN];

        let key_1 =
            derive_session_key(&central, &peripheral.public_key(), &nonce_a, &nonce_b).unwrap();
        let key_2 =
            derive_session_key(&central, &peripheral.public_key(), &nonce_b, &nonce_a).unwrap();

        let sealed = seal(&key_1, b"payload").expect("seals");
        assert!(open(&key_2, &sealed).is_err());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = SessionKey::from_bytes(random_bytes());
        let sealed = seal(&key, b"dispense 20 EUR").expect("seals");
        assert!(sealed.len() >= AEAD_NONCE_LEN + AEAD_TAG_LEN);
        let opened = open(&key, &sealed).expect("opens");
        assert_eq!(opened, b"dispense 20 EUR");
    }

    #[test]
    fn test_tampered_ciphertext_fails_hard() {
        let key = SessionKey::from_bytes(random_bytes());
        let mut sealed = seal(&key, b"secret").expect("seals");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(matches!(
            open(&key, &sealed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails_hard() {
        let key = SessionKey::from_bytes(random_bytes());
        let other = SessionKey::from_bytes(random_bytes());
        let sealed = seal(&key, b"secret").expect("seals");
        assert!(matches!(
            open(&other, &sealed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let key = SessionKey::from_bytes(random_bytes());
        assert!(matches!(
            open(&key, &[0u8; AEAD_NONCE_LEN]),
            Err(CryptoError::TruncatedCiphertext)
        ));
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = SessionKey::from_bytes(random_bytes());
        let a = seal(&key, b"same plaintext").expect("seals");
        let b = seal(&key, b"same plaintext").expect("seals");
        assert_ne!(a, b);
    }

    #[test]
    fn test_otp_format() {
        for _ in 0..32 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_otp_verification() {
        assert!(verify_otp("042137", "042137"));
        assert!(!verify_otp("042137", "042138"));
        assert!(!verify_otp("42137", "042137"));
        assert!(!verify_otp("", "042137"));
    }
}
