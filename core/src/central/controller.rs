// Wallet-side controller: scan, connect, handshake, secure messaging.

use crate::config::ProtocolConfig;
use crate::crypto::{self, CryptoError};
use crate::external::{AuditSink, AuthorityError, CredentialProvider, IdentityAuthority};
use crate::gatt::{CharacteristicId, REQUIRED_CHARACTERISTICS};
use crate::handshake::{
    ack_base, decode_frame, encode_frame, hello_base, HandshakeError, HandshakeFrame,
    COMPLETE_RECEIPT,
};
use crate::identity::{
    verify_signature, CertificateError, DeviceCertificate, DeviceKeypair, PeerIdentity,
};
use crate::message::{decode_envelope, encode_envelope, CodecError};
use crate::recovery::{ErrorCode, ErrorTracker, Severity};
use crate::session::{SecureChannelError, Session, SessionError};
use crate::transport::{Advertisement, CentralRadio, ConnectionParams, TransportError};
use crate::unix_now;

use super::scan::ScanFilter;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Errors for central operations
#[derive(Error, Debug)]
pub enum CentralError {
    #[error("Peer is blocked: {0}")]
    PeerBlocked(String),
    #[error("Not connected to {0}")]
    NotConnected(String),
    #[error("Secure channel not established with {0}")]
    NotSecure(String),
    #[error("Required characteristic missing: {0:#06x}")]
    MissingCharacteristic(u16),
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
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
    Crypto(#[from] CryptoError),
}

impl CentralError {
    /// Non-technical message safe to surface to the user.
    ///
    /// Raw codes and causes stay in logs; this is the only vocabulary the
    /// embedding app shows.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PeerBlocked(_) => "This terminal is temporarily unavailable. Try again shortly",
            Self::Timeout(_) | Self::Transport(_) => {
                "Could not reach the terminal. Please try again"
            }
            Self::MissingCharacteristic(_) => "This terminal is not compatible with your wallet",
            Self::Certificate(_) | Self::Handshake(_) | Self::HandshakeFailed(_)
            | Self::Channel(_) | Self::Crypto(_) => {
                "Secure connection failed. Please restart the pairing"
            }
            _ => "Something went wrong. Please try again",
        }
    }
}

/// An established link to one terminal.
///
/// The notification receivers double as per-characteristic ordering locks:
/// a sender holds the receiver's mutex across write-and-await, so no write
/// can observe a response meant for a different in-flight write.
struct PeerLink {
    session: Arc<Session>,
    auth_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    transaction_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    _status_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

/// The wallet-side protocol controller.
///
/// Tracker entries are keyed by transport address: failures must survive
/// across reconnect attempts, before any certificate identifies the peer.
pub struct CentralController {
    config: ProtocolConfig,
    keys: DeviceKeypair,
    identity: PeerIdentity,
    certificate: DeviceCertificate,
    radio: Arc<dyn CentralRadio>,
    tracker: Arc<ErrorTracker>,
    identities: Arc<dyn IdentityAuthority>,
    credentials: Arc<dyn CredentialProvider>,
    audit: Arc<dyn AuditSink>,
    links: RwLock<HashMap<String, Arc<PeerLink>>>,
}

impl CentralController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProtocolConfig,
        keys: DeviceKeypair,
        display_name: &str,
        contact_ref: &str,
        radio: Arc<dyn CentralRadio>,
        tracker: Arc<ErrorTracker>,
        identities: Arc<dyn IdentityAuthority>,
        credentials: Arc<dyn CredentialProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, CentralError> {
        let identity = keys.identity(display_name);
        let certificate = identities.issue_certificate(
            &identity,
            contact_ref,
            config.certificate_validity_secs,
        )?;
        Ok(Self {
            config,
            keys,
            identity,
            certificate,
            radio,
            tracker,
            identities,
            credentials,
            audit,
            links: RwLock::new(HashMap::new()),
        })
    }

    /// Own device identity
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Collect advertisements for the window, then filter by signal
    /// strength and advertised identity. Devices below the RSSI floor are
    /// silently dropped.
    pub async fn scan(&self, timeout_secs: u64) -> Result<Vec<Advertisement>, CentralError> {
        let raw = self
            .radio
            .scan(Duration::from_secs(timeout_secs))
            .await?;
        let filter = ScanFilter::new(
            self.config.min_rssi_dbm,
            self.config.advertised_name_prefix.clone(),
        );
        Ok(filter.filter(raw))
    }

    fn live_link(&self, address: &str) -> Option<Arc<PeerLink>> {
        let links = self.links.read();
        links
            .get(address)
            .filter(|link| link.session.is_authenticated())
            .cloned()
    }

    /// Whether a secure session to the address is currently live
    pub fn is_connected(&self, address: &str) -> bool {
        self.live_link(address).is_some()
    }

    /// Addresses with live sessions
    pub fn connected_addresses(&self) -> Vec<String> {
        self.links
            .read()
            .iter()
            .filter(|(_, link)| link.session.is_authenticated())
            .map(|(address, _)| address.clone())
            .collect()
    }

    /// Connect to a terminal and run the handshake to `SecureReady`.
    ///
    /// Idempotent: an existing live session for the address is returned
    /// unchanged.
    pub async fn connect(&self, address: &str) -> Result<Arc<Session>, CentralError> {
        if let Some(link) = self.live_link(address) {
            debug!("reusing live session for {}", address);
            return Ok(link.session.clone());
        }
        if self.tracker.is_device_blocked(address) {
            return Err(CentralError::PeerBlocked(address.to_string()));
        }

        match self.establish(address).await {
            Ok(session) => {
                self.tracker.reset_error_tracking(address);
                info!("secure session established with {}", address);
                Ok(session)
            }
            Err((code, error)) => {
                self.report(address, code, "connect", &error.to_string()).await;
                let _ = self.radio.disconnect(address).await;
                Err(error)
            }
        }
    }

    /// Transport connect, discovery, negotiation and handshake. Returns the
    /// classification alongside the error so `connect` can report once.
    async fn establish(
        &self,
        address: &str,
    ) -> Result<Arc<Session>, (ErrorCode, CentralError)> {
        let connect_timeout = self.config.connect_timeout();
        let operation_timeout = self.config.operation_timeout();

        match tokio::time::timeout(connect_timeout, self.radio.connect(address)).await {
            Err(_) => {
                return Err((
                    ErrorCode::ConnectionTimeout,
                    CentralError::Timeout("connect"),
                ))
            }
            Ok(Err(e)) => return Err((ErrorCode::ConnectionFailed, e.into())),
            Ok(Ok(())) => {}
        }

        // Fail closed if any required characteristic is missing
        let found = match tokio::time::timeout(
            operation_timeout,
            self.radio.discover_characteristics(address),
        )
        .await
        {
            Err(_) => {
                return Err((
                    ErrorCode::OperationTimeout,
                    CentralError::Timeout("discovery"),
                ))
            }
            Ok(Err(e)) => return Err((ErrorCode::ConnectionFailed, e.into())),
            Ok(Ok(found)) => found,
        };
        for required in REQUIRED_CHARACTERISTICS {
            if !found.contains(&required.uuid()) {
                return Err((
                    ErrorCode::CharacteristicNotFound,
                    CentralError::MissingCharacteristic(required.uuid()),
                ));
            }
        }

        let params = self
            .radio
            .negotiate_parameters(address, ConnectionParams::default())
            .await
            .map_err(|e| (ErrorCode::ConnectionFailed, CentralError::from(e)))?;

        let auth_rx = self
            .radio
            .subscribe(address, CharacteristicId::Authentication.uuid())
            .await
            .map_err(|e| (ErrorCode::ConnectionFailed, CentralError::from(e)))?;
        let transaction_rx = self
            .radio
            .subscribe(address, CharacteristicId::Transaction.uuid())
            .await
            .map_err(|e| (ErrorCode::ConnectionFailed, CentralError::from(e)))?;
        let status_rx = self
            .radio
            .subscribe(address, CharacteristicId::Status.uuid())
            .await
            .map_err(|e| (ErrorCode::ConnectionFailed, CentralError::from(e)))?;

        // Validate the terminal's certificate before any key agreement
        let certificate_bytes = self
            .radio
            .read(address, CharacteristicId::Certificate.uuid())
            .await
            .map_err(|e| (ErrorCode::ConnectionFailed, CentralError::from(e)))?;
        let peer_certificate = DeviceCertificate::from_bytes(&certificate_bytes)
            .map_err(|e| (ErrorCode::InvalidCertificate, CentralError::from(e)))?;
        peer_certificate
            .check_subject_binding()
            .and_then(|_| {
                self.identities
                    .validate_certificate(&peer_certificate, unix_now())
            })
            .map_err(|e| (ErrorCode::InvalidCertificate, CentralError::from(e)))?;

        let peer = PeerIdentity::from_public_key(
            peer_certificate.public_key,
            peer_certificate.display_name.clone(),
        );
        let session = Arc::new(Session::new(peer, unix_now()));
        session.set_params(params);

        let mut auth_rx = auth_rx;
        self.run_handshake(address, &session, &peer_certificate, &mut auth_rx)
            .await?;

        let link = Arc::new(PeerLink {
            session: session.clone(),
            auth_rx: Mutex::new(auth_rx),
            transaction_rx: Mutex::new(transaction_rx),
            _status_rx: Mutex::new(status_rx),
        });
        self.links.write().insert(address.to_string(), link);
        Ok(session)
    }

    async fn run_handshake(
        &self,
        address: &str,
        session: &Arc<Session>,
        peer_certificate: &DeviceCertificate,
        auth_rx: &mut mpsc::Receiver<Vec<u8>>,
    ) -> Result<(), (ErrorCode, CentralError)> {
        let operation_timeout = self.config.operation_timeout();
        let central_nonce = crypto::random_bytes::<{ crypto::SESSION_NONCE_LEN }>();

        let hello = HandshakeFrame::Hello {
            certificate: self.certificate.clone(),
            session_nonce: central_nonce,
            signature: self
                .keys
                .sign(&hello_base(&self.certificate.subject_id, &central_nonce)),
        };
        let bytes =
            encode_frame(&hello).map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?;
        self.radio
            .write(address, CharacteristicId::Authentication.uuid(), &bytes)
            .await
            .map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?;

        let ack_bytes = next_frame(auth_rx, operation_timeout)
            .await
            .map_err(|e| (ErrorCode::OperationTimeout, e))?;
        let (peripheral_nonce, otp_reference) = match decode_frame(&ack_bytes)
            .map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?
        {
            HandshakeFrame::HelloAck {
                session_nonce,
                otp_reference,
                signature,
            } => {
                verify_signature(
                    &ack_base(
                        &peer_certificate.subject_id,
                        &central_nonce,
                        &session_nonce,
                        &otp_reference,
                    ),
                    &signature,
                    &peer_certificate.public_key,
                )
                .map_err(|_| {
                    (
                        ErrorCode::SignatureInvalid,
                        CentralError::HandshakeFailed("bad ack signature".to_string()),
                    )
                })?;
                (session_nonce, otp_reference)
            }
            _ => {
                return Err((
                    ErrorCode::PairingFailed,
                    CentralError::HandshakeFailed("expected hello ack".to_string()),
                ))
            }
        };

        let key = crypto::derive_session_key(
            &self.keys,
            &peer_certificate.public_key,
            &central_nonce,
            &peripheral_nonce,
        )
        .map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?;
        session
            .install_key(key)
            .map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?;

        // The user receives the passcode out of band and hands it back
        // through the credential provider
        let code = self
            .credentials
            .one_time_code(&peer_certificate.subject_id, &otp_reference)
            .await
            .map_err(|e| (ErrorCode::CredentialRejected, CentralError::from(e)))?;
        let sealed_code = session
            .seal(code.as_bytes())
            .map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?;
        let bytes = encode_frame(&HandshakeFrame::OtpProof { sealed_code })
            .map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?;
        self.radio
            .write(address, CharacteristicId::Authentication.uuid(), &bytes)
            .await
            .map_err(|e| (ErrorCode::CredentialRejected, CentralError::from(e)))?;

        let complete_bytes = next_frame(auth_rx, operation_timeout)
            .await
            .map_err(|e| (ErrorCode::OperationTimeout, e))?;
        match decode_frame(&complete_bytes)
            .map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?
        {
            HandshakeFrame::Complete { sealed_receipt } => {
                let receipt = session
                    .open(&sealed_receipt)
                    .map_err(|e| (ErrorCode::DecryptionFailed, CentralError::from(e)))?;
                if receipt != COMPLETE_RECEIPT {
                    return Err((
                        ErrorCode::PairingFailed,
                        CentralError::HandshakeFailed("bad completion receipt".to_string()),
                    ));
                }
            }
            _ => {
                return Err((
                    ErrorCode::PairingFailed,
                    CentralError::HandshakeFailed("expected completion".to_string()),
                ))
            }
        }

        session
            .promote_secure()
            .map_err(|e| (ErrorCode::PairingFailed, CentralError::from(e)))?;
        Ok(())
    }

    /// Release the session and transport resources for an address
    pub async fn disconnect(&self, address: &str) -> Result<(), CentralError> {
        let link = self.links.write().remove(address);
        if let Some(link) = link {
            link.session.close();
        }
        let _ = self.radio.disconnect(address).await;
        info!("disconnected from {}", address);
        Ok(())
    }

    /// Disconnect every live session; used at orchestrator shutdown
    pub async fn disconnect_all(&self) {
        let addresses: Vec<String> = self.links.read().keys().cloned().collect();
        let _ = futures::future::join_all(
            addresses.iter().map(|address| self.disconnect(address)),
        )
        .await;
    }

    /// Send a payload over the secure channel and return the response
    /// payload.
    ///
    /// Requires an existing `SecureReady` session. The write and the wait
    /// for its response happen under the transaction characteristic's
    /// ordering lock.
    pub async fn send_secure_message(
        &self,
        address: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, CentralError> {
        let link = self
            .live_link(address)
            .ok_or_else(|| CentralError::NotSecure(address.to_string()))?;
        let operation_timeout = self.config.operation_timeout();
        let now = unix_now();

        let envelope =
            link.session
                .build_envelope(&self.keys, &self.identity.device_id, payload, now)?;
        let bytes = encode_envelope(&envelope)?;

        let mut rx = link.transaction_rx.lock().await;

        if let Err(e) = tokio::time::timeout(
            operation_timeout,
            self.radio
                .write(address, CharacteristicId::Transaction.uuid(), &bytes),
        )
        .await
        .map_err(|_| CentralError::Timeout("transaction write"))
        .and_then(|r| r.map_err(CentralError::from))
        {
            drop(rx);
            self.report(address, ErrorCode::OperationTimeout, "send", &e.to_string())
                .await;
            return Err(e);
        }

        let response_bytes = match next_frame(&mut rx, operation_timeout).await {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(rx);
                self.report(address, ErrorCode::OperationTimeout, "send", &e.to_string())
                    .await;
                return Err(e);
            }
        };
        drop(rx);

        let response = match decode_envelope(&response_bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.report(address, ErrorCode::MalformedEnvelope, "send", &e.to_string())
                    .await;
                return Err(e.into());
            }
        };
        let plaintext = match link.session.open_envelope(
            &response,
            &self.identity.device_id,
            unix_now(),
            self.config.envelope_max_age_secs,
        ) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                self.report(address, e.error_code(), "send", &e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        link.session.touch(unix_now());
        self.tracker.reset_error_tracking(address);
        Ok(plaintext)
    }

    /// Feed a failure through the tracker; audit security-relevant ones and
    /// drop the link when the decided action requires it.
    async fn report(&self, address: &str, code: ErrorCode, operation: &str, detail: &str) {
        let severity = code.severity();
        if severity >= Severity::High {
            self.audit
                .record(address, severity, &format!("{}: {}", operation, detail));
        }
        let action = self
            .tracker
            .handle_error(address, code, operation, Some(detail.to_string()));
        if action.requires_disconnect() {
            warn!(
                "dropping link to {} after {} ({:?})",
                address,
                code.as_str(),
                action
            );
            let link = self.links.write().remove(address);
            if let Some(link) = link {
                link.session.close();
            }
            let _ = self.radio.disconnect(address).await;
        }
    }
}

/// Await the next notification on a characteristic, bounded by the
/// operation timeout.
async fn next_frame(
    rx: &mut mpsc::Receiver<Vec<u8>>,
    timeout: Duration,
) -> Result<Vec<u8>, CentralError> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Err(_) => Err(CentralError::Timeout("notification")),
        Ok(None) => Err(TransportError::LinkClosed.into()),
        Ok(Some(bytes)) => Ok(bytes),
    }
}
