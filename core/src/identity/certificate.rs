// Device certificates for peer authentication

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for certificate validation
#[derive(Error, Debug, Clone)]
pub enum CertificateError {
    #[error("Certificate expired")]
    Expired,
    #[error("Certificate not yet valid")]
    NotYetValid,
    #[error("Certificate signature invalid")]
    BadSignature,
    #[error("Untrusted issuer: {0}")]
    UntrustedIssuer(String),
    #[error("Malformed certificate: {0}")]
    Malformed(String),
    #[error("Issuance failed: {0}")]
    IssuanceFailed(String),
}

/// A certificate binding a device identity to its public key.
///
/// Issued and validated by the identity authority; the core only defines
/// the format and the deterministic signing base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCertificate {
    /// Subject device ID (Blake3 hash of `public_key`, hex)
    pub subject_id: String,
    /// Subject display name
    pub display_name: String,
    /// Subject Ed25519 public key
    pub public_key: [u8; 32],
    /// Contact reference for out-of-band passcode delivery (phone ref)
    pub contact_ref: String,
    /// Issuance time, unix seconds
    pub issued_at: u64,
    /// Expiry time, unix seconds
    pub expires_at: u64,
    /// Issuer identifier
    pub issuer: String,
    /// Issuer Ed25519 signature over `signing_base()`
    pub signature: Vec<u8>,
}

impl DeviceCertificate {
    /// Deterministic byte sequence the issuer signs.
    ///
    /// Field order and the `|` delimiter are fixed; both sides must agree
    /// byte-for-byte or validation fails everywhere.
    pub fn signing_base(&self) -> Vec<u8> {
        let mut base = Vec::new();
        base.extend_from_slice(b"vaultlink-cert");
        base.push(b'|');
        base.extend_from_slice(self.subject_id.as_bytes());
        base.push(b'|');
        base.extend_from_slice(self.display_name.as_bytes());
        base.push(b'|');
        base.extend_from_slice(hex::encode(self.public_key).as_bytes());
        base.push(b'|');
        base.extend_from_slice(self.contact_ref.as_bytes());
        base.push(b'|');
        base.extend_from_slice(self.issued_at.to_string().as_bytes());
        base.push(b'|');
        base.extend_from_slice(self.expires_at.to_string().as_bytes());
        base.push(b'|');
        base.extend_from_slice(self.issuer.as_bytes());
        base
    }

    /// Check the validity window against `now` (unix seconds)
    pub fn check_window(&self, now: u64) -> Result<(), CertificateError> {
        if now < self.issued_at {
            return Err(CertificateError::NotYetValid);
        }
        if now > self.expires_at {
            return Err(CertificateError::Expired);
        }
        Ok(())
    }

    /// Check that the embedded public key actually hashes to `subject_id`
    pub fn check_subject_binding(&self) -> Result<(), CertificateError> {
        let hash = hex::encode(blake3::hash(&self.public_key).as_bytes());
        if hash != self.subject_id {
            return Err(CertificateError::Malformed(
                "subject_id does not match public key".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize for the certificate characteristic
    pub fn to_bytes(&self) -> Result<Vec<u8>, CertificateError> {
        bincode::serialize(self).map_err(|e| CertificateError::Malformed(e.to_string()))
    }

    /// Deserialize from characteristic bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CertificateError> {
        bincode::deserialize(bytes).map_err(|e| CertificateError::Malformed(e.to_string()))
    }
}
