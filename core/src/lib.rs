// VaultLink Core — secure wallet/terminal link
//
// A mobile wallet (central) pairs with a cash-dispensing terminal
// (peripheral) over a GATT-style service, establishes an authenticated
// encrypted channel and exchanges framed, replay-resistant transaction
// messages. Banking concerns (ledger, passcode delivery, certificates,
// audit) live behind the traits in `external` — this crate drives the
// protocol, nothing else.

pub mod central;
pub mod config;
pub mod crypto;
pub mod external;
pub mod gatt;
pub mod handshake;
pub mod identity;
pub mod message;
pub mod node;
pub mod peripheral;
pub mod recovery;
pub mod session;
pub mod transport;

pub use central::{CentralController, CentralError, ScanFilter};
pub use config::{ConfigError, ProtocolConfig};
pub use external::{
    AuditSink, AuthorityError, CredentialProvider, IdentityAuthority, NotificationSink,
    TransactionAuthority, TransactionResponse, WithdrawalReceipt, WithdrawalRequest,
};
pub use identity::{DeviceCertificate, DeviceKeypair, PeerIdentity};
pub use message::{decode_envelope, encode_envelope, is_expired, MessageEnvelope};
pub use node::{NodeError, NodeStats, OperationMode, VaultLinkNode};
pub use peripheral::{PeripheralError, PeripheralService, ServiceState, StatusSnapshot};
pub use recovery::{ErrorCode, ErrorTracker, RecoveryAction, Severity};
pub use session::{Session, SessionPhase};
pub use transport::{
    Advertisement, CashLevel, CentralRadio, ConnectionParams, PeripheralRadio, TerminalStatus,
    TransportError, VendorPayload,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
