// Terminal-side service: advertising, admission, security-gated routing,
// handshake responder and transaction processing.

use crate::config::ProtocolConfig;
use crate::external::{
    AuditSink, AuthorityError, IdentityAuthority, NotificationSink, TransactionAuthority,
    TransactionResponse, WithdrawalRequest,
};
use crate::gatt::{
    characteristic_catalog, find_characteristic, CharacteristicId, CharacteristicSpec, GattError,
    SERVICE_UUID,
};
use crate::handshake::{
    ack_base, decode_frame, encode_frame, hello_base, HandshakeError, HandshakeFrame,
    COMPLETE_RECEIPT,
};
use crate::identity::{
    verify_signature, CertificateError, DeviceCertificate, DeviceKeypair, PeerIdentity,
};
use crate::message::{decode_envelope, encode_envelope, CodecError};
use crate::recovery::{ErrorCode, ErrorTracker, Severity};
use crate::session::{SecureChannelError, Session, SessionError, SessionPhase};
use crate::transport::{
    Advertisement, CashLevel, PeripheralRadio, TerminalStatus, TransportError, VendorPayload,
};
use crate::{crypto, unix_now};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors for peripheral operations
#[derive(Error, Debug)]
pub enum PeripheralError {
    #[error("Service not initialized")]
    NotInitialized,
    #[error("Service already initialized")]
    AlreadyInitialized,
    #[error("Service not advertising")]
    NotAdvertising,
    #[error("No radio bound")]
    NoRadio,
    #[error("Peer is blocked: {0}")]
    PeerBlocked(String),
    #[error("Maximum concurrent peers reached")]
    MaxPeersReached,
    #[error("No session for peer: {0}")]
    UnknownSession(String),
    #[error("Characteristic security level not met")]
    SecurityLevelNotMet,
    #[error("Peer not subscribed to notifications")]
    NotSubscribed,
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error(transparent)]
    Gatt(#[from] GattError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Channel(#[from] SecureChannelError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Service lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Idle,
    Initialized,
    Advertising,
}

/// Value served by the status characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: TerminalStatus,
    pub cash_level: CashLevel,
}

/// Handshake state kept between the Hello and the passcode proof
struct PendingHandshake {
    expected_otp: String,
}

/// The terminal-side protocol service.
///
/// Owns the map of active sessions keyed by transport peer id. Radio and
/// banking concerns are injected; the service itself never sleeps or
/// hardcodes radio timing.
pub struct PeripheralService {
    config: ProtocolConfig,
    keys: DeviceKeypair,
    identity: RwLock<Option<PeerIdentity>>,
    certificate: RwLock<Option<DeviceCertificate>>,
    state: RwLock<ServiceState>,
    catalog: RwLock<Vec<CharacteristicSpec>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    pending: RwLock<HashMap<String, PendingHandshake>>,
    status: RwLock<TerminalStatus>,
    cash_level: RwLock<CashLevel>,
    radio: RwLock<Option<Arc<dyn PeripheralRadio>>>,
    tracker: Arc<ErrorTracker>,
    transactions: Arc<dyn TransactionAuthority>,
    identities: Arc<dyn IdentityAuthority>,
    notifications: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    sessions_accepted: AtomicU64,
    envelopes_processed: AtomicU64,
}

impl PeripheralService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProtocolConfig,
        keys: DeviceKeypair,
        tracker: Arc<ErrorTracker>,
        transactions: Arc<dyn TransactionAuthority>,
        identities: Arc<dyn IdentityAuthority>,
        notifications: Arc<dyn NotificationSink>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            keys,
            identity: RwLock::new(None),
            certificate: RwLock::new(None),
            state: RwLock::new(ServiceState::Idle),
            catalog: RwLock::new(Vec::new()),
            sessions: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            status: RwLock::new(TerminalStatus::InService),
            cash_level: RwLock::new(CashLevel::High),
            radio: RwLock::new(None),
            tracker,
            transactions,
            identities,
            notifications,
            audit,
            sessions_accepted: AtomicU64::new(0),
            envelopes_processed: AtomicU64::new(0),
        }
    }

    /// Attach the radio adapter. Separate from construction so the radio
    /// can hold a handle back to the service.
    pub fn bind_radio(&self, radio: Arc<dyn PeripheralRadio>) {
        *self.radio.write() = Some(radio);
    }

    fn radio(&self) -> Result<Arc<dyn PeripheralRadio>, PeripheralError> {
        self.radio.read().clone().ok_or(PeripheralError::NoRadio)
    }

    /// Build the characteristic catalog and obtain the terminal certificate
    pub fn initialize(&self, self_id: &str) -> Result<(), PeripheralError> {
        {
            let state = self.state.read();
            if *state != ServiceState::Idle {
                return Err(PeripheralError::AlreadyInitialized);
            }
        }
        let identity = self.keys.identity(self_id);
        let certificate = self.identities.issue_certificate(
            &identity,
            "",
            self.config.certificate_validity_secs,
        )?;
        *self.identity.write() = Some(identity);
        *self.certificate.write() = Some(certificate);
        *self.catalog.write() = characteristic_catalog();
        *self.state.write() = ServiceState::Initialized;
        info!("peripheral initialized as {}", self_id);
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    fn own_identity(&self) -> Result<PeerIdentity, PeripheralError> {
        self.identity
            .read()
            .clone()
            .ok_or(PeripheralError::NotInitialized)
    }

    /// Current advertisement for this terminal
    pub fn advertisement(&self) -> Result<Advertisement, PeripheralError> {
        let identity = self.own_identity()?;
        Ok(Advertisement {
            service_uuid: SERVICE_UUID,
            name: format!(
                "{}-{}",
                self.config.advertised_name_prefix, identity.display_name
            ),
            address: identity.short_address.clone(),
            rssi_dbm: 0,
            connectable: true,
            vendor: Some(VendorPayload {
                device_type: 0x01,
                capabilities: 0x0003,
                status: *self.status.read(),
                cash_level: *self.cash_level.read(),
            }),
        })
    }

    /// Start advertising. No-op when already advertising; error when the
    /// service was never initialized.
    pub async fn start_advertising(&self) -> Result<(), PeripheralError> {
        match self.state() {
            ServiceState::Advertising => return Ok(()),
            ServiceState::Idle => return Err(PeripheralError::NotInitialized),
            ServiceState::Initialized => {}
        }
        let advertisement = self.advertisement()?;
        let radio = self.radio()?;
        if let Err(e) = radio.start_advertising(advertisement).await {
            let own_id = self.own_identity()?.device_id;
            self.tracker.handle_error(
                &own_id,
                ErrorCode::AdvertisingFailed,
                "start_advertising",
                Some(e.to_string()),
            );
            return Err(e.into());
        }
        *self.state.write() = ServiceState::Advertising;
        info!("peripheral advertising");
        Ok(())
    }

    pub async fn stop_advertising(&self) -> Result<(), PeripheralError> {
        if self.state() != ServiceState::Advertising {
            return Ok(());
        }
        let radio = self.radio()?;
        radio.stop_advertising().await?;
        *self.state.write() = ServiceState::Initialized;
        Ok(())
    }

    /// Re-assert the current advertisement; driven by the scheduler
    pub async fn refresh_advertising(&self) -> Result<(), PeripheralError> {
        if self.state() != ServiceState::Advertising {
            return Ok(());
        }
        let advertisement = self.advertisement()?;
        let radio = self.radio()?;
        radio.start_advertising(advertisement).await?;
        Ok(())
    }

    /// Admit or reject an incoming connection
    pub fn handle_connection_request(
        &self,
        peer_id: &str,
        address: &str,
    ) -> Result<(), PeripheralError> {
        if self.state() != ServiceState::Advertising {
            return Err(PeripheralError::NotAdvertising);
        }
        if self.tracker.is_device_blocked(peer_id) {
            warn!("rejecting blocked peer {}", peer_id);
            self.audit.record(
                peer_id,
                Severity::High,
                "connection rejected: circuit breaker open",
            );
            return Err(PeripheralError::PeerBlocked(peer_id.to_string()));
        }
        let now = unix_now();
        {
            let mut sessions = self.sessions.write();
            let live = sessions
                .values()
                .filter(|s| s.phase() != SessionPhase::Disconnected)
                .count();
            if live >= self.config.max_peers {
                return Err(PeripheralError::MaxPeersReached);
            }
            // Provisional identity; replaced once the certificate arrives
            let provisional = PeerIdentity {
                device_id: peer_id.to_string(),
                short_address: address.to_string(),
                display_name: String::new(),
                public_key: [0u8; 32],
            };
            sessions.insert(peer_id.to_string(), Arc::new(Session::new(provisional, now)));
        }
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
        info!("accepted connection from {}", peer_id);
        Ok(())
    }

    /// Tear down the peer's session and handshake state
    pub fn handle_disconnection(&self, peer_id: &str) {
        if let Some(session) = self.sessions.write().remove(peer_id) {
            session.close();
            debug!("session for {} closed", peer_id);
        }
        self.pending.write().remove(peer_id);
    }

    fn session_for(&self, peer_id: &str) -> Result<Arc<Session>, PeripheralError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(peer_id)
            .ok_or_else(|| PeripheralError::UnknownSession(peer_id.to_string()))?;
        if session.phase() == SessionPhase::Disconnected {
            return Err(PeripheralError::UnknownSession(peer_id.to_string()));
        }
        Ok(session.clone())
    }

    fn spec_for(&self, uuid: u16) -> Result<CharacteristicSpec, PeripheralError> {
        Ok(find_characteristic(&self.catalog.read(), uuid)?)
    }

    /// Serve a characteristic read
    pub fn handle_characteristic_read(
        &self,
        peer_id: &str,
        characteristic: u16,
    ) -> Result<Vec<u8>, PeripheralError> {
        let session = self.session_for(peer_id)?;
        let spec = self.spec_for(characteristic)?;
        if !spec.readable {
            return Err(GattError::NotReadable.into());
        }
        if !spec.security.satisfied_by(session.phase()) {
            return Err(PeripheralError::SecurityLevelNotMet);
        }
        session.touch(unix_now());
        match spec.id {
            CharacteristicId::Status => {
                let snapshot = StatusSnapshot {
                    status: *self.status.read(),
                    cash_level: *self.cash_level.read(),
                };
                bincode::serialize(&snapshot)
                    .map_err(|e| CodecError::Malformed(e.to_string()).into())
            }
            CharacteristicId::Certificate => {
                let certificate = self
                    .certificate
                    .read()
                    .clone()
                    .ok_or(PeripheralError::NotInitialized)?;
                Ok(certificate.to_bytes()?)
            }
            _ => Err(GattError::NotReadable.into()),
        }
    }

    /// Track a notification subscription change from the transport
    pub fn handle_subscription_change(
        &self,
        peer_id: &str,
        characteristic: u16,
        subscribed: bool,
    ) -> Result<(), PeripheralError> {
        let session = self.session_for(peer_id)?;
        let spec = self.spec_for(characteristic)?;
        if !spec.notifiable {
            return Err(GattError::NotNotifiable.into());
        }
        if subscribed {
            session.subscribe(spec.id);
        } else {
            session.unsubscribe(spec.id);
        }
        Ok(())
    }

    /// Route a characteristic write.
    ///
    /// Security gating happens here, before any payload inspection: an
    /// under-secured write is rejected, never queued.
    pub async fn handle_characteristic_write(
        &self,
        peer_id: &str,
        characteristic: u16,
        data: &[u8],
    ) -> Result<(), PeripheralError> {
        let session = self.session_for(peer_id)?;
        let spec = self.spec_for(characteristic)?;
        if !spec.writable {
            return Err(GattError::NotWritable.into());
        }
        if !spec.security.satisfied_by(session.phase()) {
            self.report_failure(
                peer_id,
                ErrorCode::AuthenticationFailed,
                "characteristic_write",
                "write below required security level",
            )
            .await;
            return Err(PeripheralError::SecurityLevelNotMet);
        }
        session.touch(unix_now());
        match spec.id {
            CharacteristicId::Authentication => {
                self.handle_handshake_frame(&session, peer_id, data).await
            }
            CharacteristicId::Transaction => {
                self.handle_transaction_envelope(&session, peer_id, data).await
            }
            _ => Err(GattError::NotWritable.into()),
        }
    }

    async fn handle_handshake_frame(
        &self,
        session: &Arc<Session>,
        peer_id: &str,
        data: &[u8],
    ) -> Result<(), PeripheralError> {
        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.report_failure(
                    peer_id,
                    ErrorCode::MalformedEnvelope,
                    "handshake",
                    &e.to_string(),
                )
                .await;
                return Err(e.into());
            }
        };
        match frame {
            HandshakeFrame::Hello {
                certificate,
                session_nonce,
                signature,
            } => {
                self.handle_hello(session, peer_id, certificate, session_nonce, &signature)
                    .await
            }
            HandshakeFrame::OtpProof { sealed_code } => {
                self.handle_otp_proof(session, peer_id, &sealed_code).await
            }
            _ => {
                self.report_failure(
                    peer_id,
                    ErrorCode::PairingFailed,
                    "handshake",
                    "unexpected frame direction",
                )
                .await;
                Err(PeripheralError::HandshakeFailed(
                    "unexpected frame".to_string(),
                ))
            }
        }
    }

    async fn handle_hello(
        &self,
        session: &Arc<Session>,
        peer_id: &str,
        certificate: DeviceCertificate,
        central_nonce: [u8; crypto::SESSION_NONCE_LEN],
        signature: &[u8],
    ) -> Result<(), PeripheralError> {
        if session.phase() != SessionPhase::Connected {
            self.report_failure(peer_id, ErrorCode::PairingFailed, "hello", "out of order")
                .await;
            return Err(PeripheralError::HandshakeFailed("out of order".to_string()));
        }
        let now = unix_now();
        if let Err(e) = certificate
            .check_subject_binding()
            .and_then(|_| self.identities.validate_certificate(&certificate, now))
        {
            self.report_failure(
                peer_id,
                ErrorCode::InvalidCertificate,
                "hello",
                &e.to_string(),
            )
            .await;
            return Err(e.into());
        }
        if verify_signature(
            &hello_base(&certificate.subject_id, &central_nonce),
            signature,
            &certificate.public_key,
        )
        .is_err()
        {
            self.report_failure(
                peer_id,
                ErrorCode::SignatureInvalid,
                "hello",
                "hello transcript signature mismatch",
            )
            .await;
            return Err(PeripheralError::HandshakeFailed(
                "bad hello signature".to_string(),
            ));
        }

        let peripheral_nonce = crypto::random_bytes::<{ crypto::SESSION_NONCE_LEN }>();
        let key = crypto::derive_session_key(
            &self.keys,
            &certificate.public_key,
            &central_nonce,
            &peripheral_nonce,
        )
        .map_err(|_| PeripheralError::HandshakeFailed("key agreement".to_string()))?;

        session.set_peer(PeerIdentity::from_public_key(
            certificate.public_key,
            certificate.display_name.clone(),
        ));
        session.install_key(key)?;

        let otp = self.transactions.generate_otp().await?;
        let otp_reference = format!("otp-{}", &session.id[..8]);
        self.notifications
            .deliver_otp(&certificate.contact_ref, &otp_reference, &otp);
        self.pending
            .write()
            .insert(peer_id.to_string(), PendingHandshake { expected_otp: otp });

        let own = self.own_identity()?;
        let ack_signature = self.keys.sign(&ack_base(
            &own.device_id,
            &central_nonce,
            &peripheral_nonce,
            &otp_reference,
        ));
        let ack = HandshakeFrame::HelloAck {
            session_nonce: peripheral_nonce,
            otp_reference,
            signature: ack_signature,
        };
        let bytes = encode_frame(&ack)?;
        self.send_notification(peer_id, CharacteristicId::Authentication, &bytes)
            .await?;
        debug!("hello accepted from {}, passcode issued", peer_id);
        Ok(())
    }

    async fn handle_otp_proof(
        &self,
        session: &Arc<Session>,
        peer_id: &str,
        sealed_code: &[u8],
    ) -> Result<(), PeripheralError> {
        if session.phase() != SessionPhase::Authenticating {
            self.report_failure(peer_id, ErrorCode::PairingFailed, "otp_proof", "out of order")
                .await;
            return Err(PeripheralError::HandshakeFailed("out of order".to_string()));
        }
        let expected = {
            let pending = self.pending.read();
            match pending.get(peer_id) {
                Some(p) => p.expected_otp.clone(),
                None => {
                    return Err(PeripheralError::HandshakeFailed(
                        "no pending handshake".to_string(),
                    ))
                }
            }
        };
        let code_bytes = match session.open(sealed_code) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.report_failure(
                    peer_id,
                    ErrorCode::DecryptionFailed,
                    "otp_proof",
                    &e.to_string(),
                )
                .await;
                return Err(e.into());
            }
        };
        let code = String::from_utf8(code_bytes).unwrap_or_default();
        let verified = self.transactions.verify_otp(&code, &expected).await?;
        if !verified {
            self.report_failure(
                peer_id,
                ErrorCode::CredentialRejected,
                "otp_proof",
                "passcode mismatch",
            )
            .await;
            return Err(PeripheralError::HandshakeFailed(
                "passcode rejected".to_string(),
            ));
        }

        session.promote_secure()?;
        self.pending.write().remove(peer_id);
        self.tracker.reset_error_tracking(peer_id);
        info!("secure channel established with {}", peer_id);

        let sealed_receipt = session.seal(COMPLETE_RECEIPT)?;
        let bytes = encode_frame(&HandshakeFrame::Complete { sealed_receipt })?;
        self.send_notification(peer_id, CharacteristicId::Authentication, &bytes)
            .await
    }

    async fn handle_transaction_envelope(
        &self,
        session: &Arc<Session>,
        peer_id: &str,
        data: &[u8],
    ) -> Result<(), PeripheralError> {
        let now = unix_now();
        let own = self.own_identity()?;
        let envelope = match decode_envelope(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.report_failure(
                    peer_id,
                    ErrorCode::MalformedEnvelope,
                    "transaction",
                    &e.to_string(),
                )
                .await;
                return Err(e.into());
            }
        };
        let plaintext = match session.open_envelope(
            &envelope,
            &own.device_id,
            now,
            self.config.envelope_max_age_secs,
        ) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                self.report_failure(peer_id, e.error_code(), "transaction", &e.to_string())
                    .await;
                return Err(e.into());
            }
        };
        let request: WithdrawalRequest = match bincode::deserialize(&plaintext) {
            Ok(request) => request,
            Err(e) => {
                self.report_failure(
                    peer_id,
                    ErrorCode::MalformedEnvelope,
                    "transaction",
                    &e.to_string(),
                )
                .await;
                return Err(CodecError::Malformed(e.to_string()).into());
            }
        };

        debug!(
            "processing withdrawal of {} minor units for {}",
            request.amount_minor, peer_id
        );
        let response = match self
            .transactions
            .apply_withdrawal(&request.account_ref, request.amount_minor)
            .await
        {
            Ok(receipt) => TransactionResponse {
                approved: true,
                reference: receipt.reference,
                message: "Please take your cash".to_string(),
            },
            Err(AuthorityError::Rejected(_)) => TransactionResponse {
                approved: false,
                reference: String::new(),
                message: "Transaction declined".to_string(),
            },
            Err(e) => return Err(e.into()),
        };
        self.envelopes_processed.fetch_add(1, Ordering::Relaxed);

        let payload =
            bincode::serialize(&response).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let reply = session.build_envelope(&self.keys, &own.device_id, &payload, now)?;
        let bytes = encode_envelope(&reply)?;
        self.send_notification(peer_id, CharacteristicId::Transaction, &bytes)
            .await?;
        self.tracker.reset_error_tracking(peer_id);
        Ok(())
    }

    /// Push a notification to a subscribed peer; fails when the peer never
    /// subscribed on that characteristic.
    pub async fn send_notification(
        &self,
        peer_id: &str,
        characteristic: CharacteristicId,
        data: &[u8],
    ) -> Result<(), PeripheralError> {
        let session = self.session_for(peer_id)?;
        if !session.is_subscribed(characteristic) {
            return Err(PeripheralError::NotSubscribed);
        }
        let radio = self.radio()?;
        radio.notify(peer_id, characteristic.uuid(), data).await?;
        Ok(())
    }

    /// Change the advertised status, refresh the advertisement and notify
    /// subscribed peers.
    pub async fn update_status(
        &self,
        status: TerminalStatus,
        cash_level: CashLevel,
    ) -> Result<(), PeripheralError> {
        *self.status.write() = status;
        *self.cash_level.write() = cash_level;
        self.refresh_advertising().await?;

        let snapshot = StatusSnapshot { status, cash_level };
        let bytes =
            bincode::serialize(&snapshot).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let targets: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, s)| {
                    s.phase() != SessionPhase::Disconnected
                        && s.is_subscribed(CharacteristicId::Status)
                })
                .map(|(peer_id, _)| peer_id.clone())
                .collect()
        };
        for peer_id in targets {
            if let Err(e) = self
                .send_notification(&peer_id, CharacteristicId::Status, &bytes)
                .await
            {
                debug!("status notification to {} failed: {}", peer_id, e);
            }
        }
        Ok(())
    }

    /// Close sessions idle past the configured timeout; returns the peers
    /// that were dropped. Driven by the scheduler.
    pub async fn sweep_idle(&self, now: u64) -> Vec<String> {
        let stale: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, s)| {
                    s.phase() != SessionPhase::Disconnected
                        && s.idle_for(now) > self.config.idle_timeout_secs
                })
                .map(|(peer_id, _)| peer_id.clone())
                .collect()
        };
        for peer_id in &stale {
            info!("closing idle session for {}", peer_id);
            self.drop_peer(peer_id).await;
        }
        stale
    }

    async fn drop_peer(&self, peer_id: &str) {
        self.handle_disconnection(peer_id);
        if let Ok(radio) = self.radio() {
            if let Err(e) = radio.disconnect(peer_id).await {
                debug!("radio disconnect for {} failed: {}", peer_id, e);
            }
        }
    }

    /// Feed a failure through the tracker, audit it when security-relevant
    /// and disconnect when the decided action requires it.
    async fn report_failure(&self, peer_id: &str, code: ErrorCode, operation: &str, detail: &str) {
        let severity = code.severity();
        if severity >= Severity::High {
            self.audit
                .record(peer_id, severity, &format!("{}: {}", operation, detail));
        }
        let action = self
            .tracker
            .handle_error(peer_id, code, operation, Some(detail.to_string()));
        debug!(
            "failure on {}: {} during {} -> {:?}",
            peer_id,
            code.as_str(),
            operation,
            action
        );
        if action.requires_disconnect() {
            self.drop_peer(peer_id).await;
        }
    }

    /// Stop advertising and drop every live session; used at orchestrator
    /// teardown.
    pub async fn shutdown(&self) -> Result<(), PeripheralError> {
        self.stop_advertising().await?;
        let peers: Vec<String> = self.sessions.read().keys().cloned().collect();
        for peer_id in peers {
            self.drop_peer(&peer_id).await;
        }
        Ok(())
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.phase() != SessionPhase::Disconnected)
            .count()
    }

    /// Session handle for a peer, if live
    pub fn session(&self, peer_id: &str) -> Option<Arc<Session>> {
        self.session_for(peer_id).ok()
    }

    pub fn sessions_accepted(&self) -> u64 {
        self.sessions_accepted.load(Ordering::Relaxed)
    }

    pub fn envelopes_processed(&self) -> u64 {
        self.envelopes_processed.load(Ordering::Relaxed)
    }
}
