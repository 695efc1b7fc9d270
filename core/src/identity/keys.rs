// Device key management

use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Errors for key handling
#[derive(Error, Debug, Clone)]
pub enum KeyError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature bytes")]
    InvalidSignature,
    #[error("Invalid key bytes")]
    InvalidKeyBytes,
}

/// Identity advertised by and learned about a peer.
///
/// Created on discovery or from a validated certificate; immutable after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Blake3 hash of the public key, hex (64 chars)
    pub device_id: String,
    /// Short display address (base58 of the leading hash bytes)
    pub short_address: String,
    /// Human-readable display name
    pub display_name: String,
    /// Ed25519 public key
    pub public_key: [u8; 32],
}

impl PeerIdentity {
    /// Build an identity from a public key and display name
    pub fn from_public_key(public_key: [u8; 32], display_name: impl Into<String>) -> Self {
        let hash = blake3::hash(&public_key);
        Self {
            device_id: hex::encode(hash.as_bytes()),
            short_address: bs58::encode(&hash.as_bytes()[..8]).into_string(),
            display_name: display_name.into(),
            public_key,
        }
    }
}

/// Device key pair for signing and key agreement
#[derive(Clone)]
pub struct DeviceKeypair {
    pub(crate) signing_key: SigningKey,
}

impl DeviceKeypair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_key_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();
        Self { signing_key }
    }

    /// Get verifying key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Device ID (Blake3 hash of public key, hex)
    pub fn device_id(&self) -> String {
        let hash = blake3::hash(&self.public_key());
        hex::encode(hash.as_bytes())
    }

    /// Own identity with the given display name
    pub fn identity(&self, display_name: impl Into<String>) -> PeerIdentity {
        PeerIdentity::from_public_key(self.public_key(), display_name)
    }

    /// Sign data with the device key
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    /// Serialize the secret key.
    /// Returns a `Zeroizing<Vec<u8>>` that wipes the material on drop.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    /// Deserialize a key pair from secret key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key =
            SigningKey::from_bytes(bytes.try_into().map_err(|_| KeyError::InvalidKeyBytes)?);
        Ok(Self { signing_key })
    }
}

/// Verify a detached signature against a public key
pub fn verify_signature(data: &[u8], signature: &[u8], public_key: &[u8; 32]) -> Result<(), KeyError> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| KeyError::InvalidPublicKey)?;
    let sig = Ed25519Signature::from_bytes(
        signature.try_into().map_err(|_| KeyError::InvalidSignature)?,
    );
    verifying_key
        .verify(data, &sig)
        .map_err(|_| KeyError::InvalidSignature)
}
