//! Transport abstraction for the wallet/terminal link
//!
//! The protocol layer sits above these traits; a real radio stack (or the
//! deterministic in-memory link in [`memory`]) is injected underneath, so
//! no radio timing is ever hardcoded in the protocol itself.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors for transport operations
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Operation timed out")]
    Timeout,
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
    #[error("Advertising failed: {0}")]
    AdvertisingFailed(String),
    #[error("Peer not subscribed")]
    NotSubscribed,
    #[error("Write rejected: {0}")]
    Rejected(String),
    #[error("Link closed")]
    LinkClosed,
}

/// Operational status a terminal advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    InService,
    Busy,
    OutOfService,
}

/// Coarse dispensable-cash level carried in the vendor payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashLevel {
    High,
    Medium,
    Low,
    Empty,
}

/// Vendor-specific advertisement payload.
///
/// Its presence is part of the trust decision during scan filtering:
/// advertisements without it are dropped, never trusted by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorPayload {
    /// Device type discriminator (0x01 = dispensing terminal)
    pub device_type: u8,
    /// Capability bitmask
    pub capabilities: u16,
    /// Advertised operational status
    pub status: TerminalStatus,
    /// Advertised cash level
    pub cash_level: CashLevel,
}

/// One advertisement observed during a scan window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Advertised service UUID
    pub service_uuid: u16,
    /// Advertised display name
    pub name: String,
    /// Transport address to connect to
    pub address: String,
    /// Received signal strength, dBm
    pub rssi_dbm: i8,
    /// Whether the peripheral accepts connections
    pub connectable: bool,
    /// Optional vendor payload
    pub vendor: Option<VendorPayload>,
}

/// Negotiated link parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Connection interval, milliseconds
    pub interval_ms: u16,
    /// Slave latency, events
    pub latency: u16,
    /// Supervision timeout, milliseconds
    pub supervision_timeout_ms: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            interval_ms: 30,
            latency: 0,
            supervision_timeout_ms: 4000,
        }
    }
}

impl ConnectionParams {
    /// Clamp a requested parameter set into the peripheral's accepted range
    pub fn clamp_requested(requested: Self) -> Self {
        Self {
            interval_ms: requested.interval_ms.clamp(15, 240),
            latency: requested.latency.min(4),
            supervision_timeout_ms: requested.supervision_timeout_ms.clamp(1000, 10_000),
        }
    }
}

/// Central-side radio operations.
///
/// Implementations bound every operation themselves (scan by its window,
/// the rest by the radio stack); the controller adds protocol-level
/// timeouts on top.
#[async_trait]
pub trait CentralRadio: Send + Sync {
    /// Collect advertisements for the given window
    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError>;

    /// Open a transport-level connection
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Tear down the connection and release resources
    async fn disconnect(&self, address: &str) -> Result<(), TransportError>;

    /// Discover the characteristic UUIDs offered by the peer
    async fn discover_characteristics(&self, address: &str) -> Result<Vec<u16>, TransportError>;

    /// Negotiate connection parameters; returns what the peer accepted
    async fn negotiate_parameters(
        &self,
        address: &str,
        requested: ConnectionParams,
    ) -> Result<ConnectionParams, TransportError>;

    /// Read a characteristic value
    async fn read(&self, address: &str, characteristic: u16) -> Result<Vec<u8>, TransportError>;

    /// Write a characteristic value
    async fn write(
        &self,
        address: &str,
        characteristic: u16,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Subscribe to notifications on a characteristic
    async fn subscribe(
        &self,
        address: &str,
        characteristic: u16,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;
}

/// Peripheral-side radio operations
#[async_trait]
pub trait PeripheralRadio: Send + Sync {
    /// Start (or refresh) advertising
    async fn start_advertising(&self, advertisement: Advertisement)
        -> Result<(), TransportError>;

    /// Stop advertising
    async fn stop_advertising(&self) -> Result<(), TransportError>;

    /// Push a notification to a subscribed peer
    async fn notify(
        &self,
        peer_id: &str,
        characteristic: u16,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Drop the link to a peer
    async fn disconnect(&self, peer_id: &str) -> Result<(), TransportError>;
}
