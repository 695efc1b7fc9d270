// GATT-style service catalog for the wallet/terminal link
//
// The four characteristics and their security levels are a fixed contract
// both sides agree on out of band; the catalog is built once at service
// initialization and read-only afterwards.

use crate::session::SessionPhase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service UUID advertised by every terminal (0xA700)
pub const SERVICE_UUID: u16 = 0xA700;

/// Maximum characteristic payload size (protocol limitation)
pub const MAX_CHARACTERISTIC_SIZE: usize = 512;

/// Errors for catalog lookups
#[derive(Error, Debug, Clone)]
pub enum GattError {
    #[error("Unknown characteristic: {0:#06x}")]
    UnknownCharacteristic(u16),
    #[error("Characteristic not readable")]
    NotReadable,
    #[error("Characteristic not writable")]
    NotWritable,
    #[error("Characteristic not notifiable")]
    NotNotifiable,
}

/// The fixed characteristic set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacteristicId {
    /// Handshake frames (key exchange, passcode proof)
    Authentication,
    /// Sealed transaction envelopes
    Transaction,
    /// Terminal status and cash level
    Status,
    /// Terminal certificate for peer validation
    Certificate,
}

impl CharacteristicId {
    /// Short-form UUID
    pub fn uuid(&self) -> u16 {
        match self {
            CharacteristicId::Authentication => 0xA701,
            CharacteristicId::Transaction => 0xA702,
            CharacteristicId::Status => 0xA703,
            CharacteristicId::Certificate => 0xA704,
        }
    }

    /// Reverse lookup from a wire UUID
    pub fn from_uuid(uuid: u16) -> Option<Self> {
        match uuid {
            0xA701 => Some(CharacteristicId::Authentication),
            0xA702 => Some(CharacteristicId::Transaction),
            0xA703 => Some(CharacteristicId::Status),
            0xA704 => Some(CharacteristicId::Certificate),
            _ => None,
        }
    }
}

/// Every characteristic a conforming central must find after discovery
pub const REQUIRED_CHARACTERISTICS: [CharacteristicId; 4] = [
    CharacteristicId::Authentication,
    CharacteristicId::Transaction,
    CharacteristicId::Status,
    CharacteristicId::Certificate,
];

/// Required security level for accessing a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Open access
    None,
    /// Session key must be established
    Encrypted,
    /// Full handshake (key + passcode) must be complete
    Authenticated,
}

impl SecurityLevel {
    /// Whether a session in `phase` satisfies this level
    pub fn satisfied_by(&self, phase: SessionPhase) -> bool {
        match self {
            SecurityLevel::None => phase != SessionPhase::Disconnected,
            SecurityLevel::Encrypted => {
                matches!(phase, SessionPhase::Authenticating | SessionPhase::SecureReady)
            }
            SecurityLevel::Authenticated => phase == SessionPhase::SecureReady,
        }
    }
}

/// Access flags and security requirement of one characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicSpec {
    pub id: CharacteristicId,
    pub readable: bool,
    pub writable: bool,
    pub notifiable: bool,
    pub security: SecurityLevel,
}

/// Build the fixed catalog.
///
/// Authentication is open for writes because handshake frames are
/// self-authenticated (signed against the presented certificate) before
/// any session key exists; the responder enforces frame ordering itself.
pub fn characteristic_catalog() -> Vec<CharacteristicSpec> {
    vec![
        CharacteristicSpec {
            id: CharacteristicId::Authentication,
            readable: false,
            writable: true,
            notifiable: true,
            security: SecurityLevel::None,
        },
        CharacteristicSpec {
            id: CharacteristicId::Transaction,
            readable: false,
            writable: true,
            notifiable: true,
            security: SecurityLevel::Authenticated,
        },
        CharacteristicSpec {
            id: CharacteristicId::Status,
            readable: true,
            writable: false,
            notifiable: true,
            security: SecurityLevel::None,
        },
        CharacteristicSpec {
            id: CharacteristicId::Certificate,
            readable: true,
            writable: false,
            notifiable: false,
            security: SecurityLevel::None,
        },
    ]
}

/// Look up a characteristic spec by wire UUID
pub fn find_characteristic(
    catalog: &[CharacteristicSpec],
    uuid: u16,
) -> Result<CharacteristicSpec, GattError> {
    let id = CharacteristicId::from_uuid(uuid).ok_or(GattError::UnknownCharacteristic(uuid))?;
    catalog
        .iter()
        .find(|spec| spec.id == id)
        .copied()
        .ok_or(GattError::UnknownCharacteristic(uuid))
}
