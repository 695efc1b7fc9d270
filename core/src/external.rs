// External collaborator seams — the banking domain the core calls, never implements

use crate::identity::{CertificateError, DeviceCertificate, PeerIdentity};
use crate::recovery::Severity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by external authorities
#[derive(Error, Debug, Clone)]
pub enum AuthorityError {
    #[error("Authority unavailable: {0}")]
    Unavailable(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// A withdrawal request carried as the transaction payload.
///
/// Amounts are minor units (cents); the ledger arithmetic itself lives
/// behind the transaction authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// Opaque account reference known to the banking domain
    pub account_ref: String,
    /// Amount in minor units
    pub amount_minor: u64,
    /// ISO 4217 currency code
    pub currency: String,
}

/// Receipt returned by the transaction authority for an applied withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    /// Authority-side reference for the posted transaction
    pub reference: String,
    /// Amount actually dispensed, minor units
    pub amount_minor: u64,
}

/// Response pushed back to the wallet over the transaction characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub approved: bool,
    pub reference: String,
    pub message: String,
}

/// Banking-side transaction operations the terminal delegates to.
///
/// The core never mutates balances itself; it hands a validated request to
/// this authority and relays the outcome.
#[async_trait]
pub trait TransactionAuthority: Send + Sync {
    /// Generate a fresh one-time passcode for a pairing attempt
    async fn generate_otp(&self) -> Result<String, AuthorityError>;

    /// Verify a presented passcode against the expected one
    async fn verify_otp(&self, code: &str, expected: &str) -> Result<bool, AuthorityError>;

    /// Post a withdrawal against the referenced account
    async fn apply_withdrawal(
        &self,
        account_ref: &str,
        amount_minor: u64,
    ) -> Result<WithdrawalReceipt, AuthorityError>;
}

/// Certificate issuance and validation for peer authentication
pub trait IdentityAuthority: Send + Sync {
    /// Issue a certificate binding the subject identity to its public key
    fn issue_certificate(
        &self,
        subject: &PeerIdentity,
        contact_ref: &str,
        validity_secs: u64,
    ) -> Result<DeviceCertificate, CertificateError>;

    /// Validate a presented certificate (signature, issuer, validity window)
    fn validate_certificate(
        &self,
        certificate: &DeviceCertificate,
        now: u64,
    ) -> Result<(), CertificateError>;
}

/// Out-of-band passcode delivery (SMS or equivalent), keyed by the
/// contact reference carried in the wallet's certificate.
pub trait NotificationSink: Send + Sync {
    fn deliver_otp(&self, contact_ref: &str, reference_id: &str, code: &str);
}

/// Receives every security-relevant event: handshake failures, breaker
/// trips, expired-envelope rejections.
pub trait AuditSink: Send + Sync {
    fn record(&self, peer_id: &str, severity: Severity, description: &str);
}

/// Central-side source of the user-entered one-time passcode.
///
/// The embedding wallet app prompts the user for the code delivered through
/// the notification sink and hands it back through this seam.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn one_time_code(
        &self,
        peer_id: &str,
        reference_id: &str,
    ) -> Result<String, AuthorityError>;
}
