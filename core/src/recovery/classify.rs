// Error taxonomy — fixed, total mapping from code to severity and policy

use serde::{Deserialize, Serialize};

/// Every error the protocol layer can report about a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Transport
    ConnectionFailed,
    ConnectionTimeout,
    OperationTimeout,
    AdvertisingFailed,
    // Signal quality
    WeakSignal,
    OutOfRange,
    // Protocol
    AuthenticationFailed,
    ServiceNotFound,
    CharacteristicNotFound,
    MalformedEnvelope,
    ExpiredEnvelope,
    // Security
    SignatureInvalid,
    DecryptionFailed,
    InvalidCertificate,
    PairingFailed,
    CredentialRejected,
}

/// Severity buckets driving the recovery decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What the caller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    RetryImmediate,
    RetryWithBackoff,
    DisconnectAndRetry,
    DisconnectAndFail,
    CircuitBreakerOpen,
}

impl RecoveryAction {
    /// Whether the action requires dropping the connection
    pub fn requires_disconnect(&self) -> bool {
        matches!(
            self,
            Self::DisconnectAndRetry | Self::DisconnectAndFail | Self::CircuitBreakerOpen
        )
    }
}

impl ErrorCode {
    /// Fixed severity classification.
    ///
    /// Credential, certificate, encryption and pairing failures are
    /// Critical; authentication and missing-service failures High;
    /// connection, timeout and advertising failures Medium; signal-quality
    /// issues Low.
    pub fn severity(&self) -> Severity {
        match self {
            Self::CredentialRejected
            | Self::InvalidCertificate
            | Self::DecryptionFailed
            | Self::SignatureInvalid
            | Self::PairingFailed => Severity::Critical,

            Self::AuthenticationFailed
            | Self::ServiceNotFound
            | Self::CharacteristicNotFound
            | Self::MalformedEnvelope
            | Self::ExpiredEnvelope => Severity::High,

            Self::ConnectionFailed
            | Self::ConnectionTimeout
            | Self::OperationTimeout
            | Self::AdvertisingFailed => Severity::Medium,

            Self::WeakSignal | Self::OutOfRange => Severity::Low,
        }
    }

    /// Whether a retry can succeed without renegotiating the session.
    ///
    /// Security failures and missing services never recover on retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::CredentialRejected
                | Self::InvalidCertificate
                | Self::DecryptionFailed
                | Self::SignatureInvalid
                | Self::PairingFailed
                | Self::ServiceNotFound
                | Self::CharacteristicNotFound
        )
    }

    /// Stable wire/log name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionFailed => "connection_failed",
            Self::ConnectionTimeout => "connection_timeout",
            Self::OperationTimeout => "operation_timeout",
            Self::AdvertisingFailed => "advertising_failed",
            Self::WeakSignal => "weak_signal",
            Self::OutOfRange => "out_of_range",
            Self::AuthenticationFailed => "authentication_failed",
            Self::ServiceNotFound => "service_not_found",
            Self::CharacteristicNotFound => "characteristic_not_found",
            Self::MalformedEnvelope => "malformed_envelope",
            Self::ExpiredEnvelope => "expired_envelope",
            Self::SignatureInvalid => "signature_invalid",
            Self::DecryptionFailed => "decryption_failed",
            Self::InvalidCertificate => "invalid_certificate",
            Self::PairingFailed => "pairing_failed",
            Self::CredentialRejected => "credential_rejected",
        }
    }

    /// Pre-defined, non-technical message for the user.
    ///
    /// Raw codes, stack traces and key material never reach external
    /// callers; this table is the only user-visible vocabulary.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::WeakSignal | Self::OutOfRange => {
                "Move closer to the terminal and try again"
            }
            Self::ConnectionFailed | Self::ConnectionTimeout | Self::AdvertisingFailed => {
                "Could not reach the terminal. Please try again"
            }
            Self::OperationTimeout => "The terminal took too long to respond. Please try again",
            Self::AuthenticationFailed | Self::CredentialRejected => {
                "Verification failed. Please restart the pairing"
            }
            Self::ServiceNotFound | Self::CharacteristicNotFound => {
                "This terminal is not compatible with your wallet"
            }
            Self::MalformedEnvelope | Self::ExpiredEnvelope => {
                "The request could not be processed. Please try again"
            }
            Self::SignatureInvalid | Self::DecryptionFailed | Self::InvalidCertificate
            | Self::PairingFailed => "Secure connection failed. Please restart the pairing",
        }
    }
}
