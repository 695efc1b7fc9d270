// Shared fixtures: a fake banking backend, certificate authority, SMS
// outbox and audit log wired over the in-memory hub.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use vaultlink_core::central::CentralController;
use vaultlink_core::crypto;
use vaultlink_core::external::{
    AuditSink, AuthorityError, CredentialProvider, IdentityAuthority, NotificationSink,
    TransactionAuthority, WithdrawalReceipt,
};
use vaultlink_core::identity::{
    verify_signature, CertificateError, DeviceCertificate, DeviceKeypair, PeerIdentity,
};
use vaultlink_core::peripheral::PeripheralService;
use vaultlink_core::recovery::{ErrorTracker, Severity};
use vaultlink_core::transport::memory::{MemoryCentralLink, MemoryHub};
use vaultlink_core::ProtocolConfig;

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Fake banking backend: real OTP primitives, withdrawals above 500.00
/// are declined.
pub struct FakeBank;

#[async_trait]
impl TransactionAuthority for FakeBank {
    async fn generate_otp(&self) -> Result<String, AuthorityError> {
        Ok(crypto::generate_otp())
    }

    async fn verify_otp(&self, code: &str, expected: &str) -> Result<bool, AuthorityError> {
        Ok(crypto::verify_otp(code, expected))
    }

    async fn apply_withdrawal(
        &self,
        account_ref: &str,
        amount_minor: u64,
    ) -> Result<WithdrawalReceipt, AuthorityError> {
        if amount_minor > 50_000 {
            return Err(AuthorityError::Rejected("insufficient funds".to_string()));
        }
        Ok(WithdrawalReceipt {
            reference: format!("txn-{}-{}", account_ref, amount_minor),
            amount_minor,
        })
    }
}

/// Test certificate authority signing with its own device key
pub struct TestCa {
    keys: DeviceKeypair,
    issuer: String,
}

impl TestCa {
    pub fn new() -> Self {
        Self {
            keys: DeviceKeypair::generate(),
            issuer: "bank-ca".to_string(),
        }
    }
}

impl IdentityAuthority for TestCa {
    fn issue_certificate(
        &self,
        subject: &PeerIdentity,
        contact_ref: &str,
        validity_secs: u64,
    ) -> Result<DeviceCertificate, CertificateError> {
        let issued_at = now();
        let mut certificate = DeviceCertificate {
            subject_id: subject.device_id.clone(),
            display_name: subject.display_name.clone(),
            public_key: subject.public_key,
            contact_ref: contact_ref.to_string(),
            issued_at,
            expires_at: issued_at + validity_secs,
            issuer: self.issuer.clone(),
            signature: Vec::new(),
        };
        certificate.signature = self.keys.sign(&certificate.signing_base());
        Ok(certificate)
    }

    fn validate_certificate(
        &self,
        certificate: &DeviceCertificate,
        now: u64,
    ) -> Result<(), CertificateError> {
        if certificate.issuer != self.issuer {
            return Err(CertificateError::UntrustedIssuer(certificate.issuer.clone()));
        }
        certificate.check_window(now)?;
        verify_signature(
            &certificate.signing_base(),
            &certificate.signature,
            &self.keys.public_key(),
        )
        .map_err(|_| CertificateError::BadSignature)
    }
}

/// Issues certificates with an untrusted key but validates anything it is
/// shown; lets a test wallet accept the terminal while presenting a
/// certificate the terminal's real CA rejects.
pub struct TrustAllCa {
    inner: TestCa,
}

impl TrustAllCa {
    pub fn new() -> Self {
        Self {
            inner: TestCa::new(),
        }
    }
}

impl IdentityAuthority for TrustAllCa {
    fn issue_certificate(
        &self,
        subject: &PeerIdentity,
        contact_ref: &str,
        validity_secs: u64,
    ) -> Result<DeviceCertificate, CertificateError> {
        self.inner.issue_certificate(subject, contact_ref, validity_secs)
    }

    fn validate_certificate(
        &self,
        _certificate: &DeviceCertificate,
        _now: u64,
    ) -> Result<(), CertificateError> {
        Ok(())
    }
}

/// Captures delivered passcodes; doubles as the wallet-side credential
/// provider, simulating the user copying the SMS code.
#[derive(Default)]
pub struct SmsOutbox {
    messages: Mutex<Vec<(String, String, String)>>,
}

impl SmsOutbox {
    pub fn delivered_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl NotificationSink for SmsOutbox {
    fn deliver_otp(&self, contact_ref: &str, reference_id: &str, code: &str) {
        self.messages.lock().unwrap().push((
            contact_ref.to_string(),
            reference_id.to_string(),
            code.to_string(),
        ));
    }
}

#[async_trait]
impl CredentialProvider for SmsOutbox {
    async fn one_time_code(
        &self,
        _peer_id: &str,
        reference_id: &str,
    ) -> Result<String, AuthorityError> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, reference, _)| reference == reference_id)
            .map(|(_, _, code)| code.clone())
            .ok_or_else(|| AuthorityError::Unavailable("no passcode delivered".to_string()))
    }
}

/// A credential provider that always answers with the wrong passcode
pub struct WrongCodeProvider;

#[async_trait]
impl CredentialProvider for WrongCodeProvider {
    async fn one_time_code(
        &self,
        _peer_id: &str,
        _reference_id: &str,
    ) -> Result<String, AuthorityError> {
        Ok("000000".to_string())
    }
}

/// Collects audit events for assertions
#[derive(Default)]
pub struct AuditLog {
    events: Mutex<Vec<(String, Severity, String)>>,
}

impl AuditLog {
    pub fn events(&self) -> Vec<(String, Severity, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, fragment: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(_, _, description)| description.contains(fragment))
    }
}

impl AuditSink for AuditLog {
    fn record(&self, peer_id: &str, severity: Severity, description: &str) {
        self.events.lock().unwrap().push((
            peer_id.to_string(),
            severity,
            description.to_string(),
        ));
    }
}

/// A terminal hosted on the hub, advertising and ready to pair
pub struct Terminal {
    pub service: Arc<PeripheralService>,
    pub tracker: Arc<ErrorTracker>,
    pub sms: Arc<SmsOutbox>,
    pub audit: Arc<AuditLog>,
}

pub fn spawn_terminal(
    hub: &MemoryHub,
    ca: Arc<dyn IdentityAuthority>,
    config: &ProtocolConfig,
    address: &str,
    terminal_id: &str,
) -> Terminal {
    let sms = Arc::new(SmsOutbox::default());
    let audit = Arc::new(AuditLog::default());
    let tracker = Arc::new(
        ErrorTracker::new(
            config.breaker_threshold,
            config.breaker_cooldown_secs,
            config.tracker_stale_secs,
        )
        .with_audit(audit.clone()),
    );
    let service = Arc::new(PeripheralService::new(
        config.clone(),
        DeviceKeypair::generate(),
        tracker.clone(),
        Arc::new(FakeBank),
        ca,
        sms.clone(),
        audit.clone(),
    ));
    let radio = hub.register_terminal(address, service.clone());
    service.bind_radio(radio);
    service.initialize(terminal_id).expect("terminal initializes");
    Terminal {
        service,
        tracker,
        sms,
        audit,
    }
}

/// A wallet controller linked into the hub
pub struct Wallet {
    pub controller: Arc<CentralController>,
    pub link: Arc<MemoryCentralLink>,
    pub tracker: Arc<ErrorTracker>,
    pub audit: Arc<AuditLog>,
}

pub fn spawn_wallet(
    hub: &MemoryHub,
    ca: Arc<dyn IdentityAuthority>,
    config: &ProtocolConfig,
    wallet_id: &str,
    credentials: Arc<dyn CredentialProvider>,
) -> Wallet {
    let audit = Arc::new(AuditLog::default());
    let tracker = Arc::new(
        ErrorTracker::new(
            config.breaker_threshold,
            config.breaker_cooldown_secs,
            config.tracker_stale_secs,
        )
        .with_audit(audit.clone()),
    );
    let link = hub.central_link(wallet_id);
    let controller = Arc::new(
        CentralController::new(
            config.clone(),
            DeviceKeypair::generate(),
            wallet_id,
            "+15550100",
            link.clone(),
            tracker.clone(),
            ca,
            credentials,
            audit.clone(),
        )
        .expect("wallet controller builds"),
    );
    Wallet {
        controller,
        link,
        tracker,
        audit,
    }
}
