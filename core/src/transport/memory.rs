//! Deterministic in-memory link for tests and demos
//!
//! A hub hosts peripheral services keyed by address; central links route
//! reads, writes and subscriptions straight into the service handlers.
//! Per-link RSSI is configurable and terminals can be taken offline to
//! inject transport faults. `scan` returns the current advertisement set
//! immediately — a real radio adapter honors the scan window, this fake
//! stays deterministic.

use super::{
    Advertisement, CentralRadio, ConnectionParams, PeripheralRadio, TransportError,
};
use crate::peripheral::PeripheralService;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Notification channel depth per (peer, characteristic)
const NOTIFY_CHANNEL_DEPTH: usize = 32;

/// Default signal strength reported for hub terminals
const DEFAULT_RSSI_DBM: i8 = -55;

struct TerminalEntry {
    service: Arc<PeripheralService>,
    advertising: RwLock<Option<Advertisement>>,
    subscribers: RwLock<HashMap<(String, u16), mpsc::Sender<Vec<u8>>>>,
    offline: AtomicBool,
}

struct HubInner {
    terminals: RwLock<HashMap<String, Arc<TerminalEntry>>>,
}

/// The shared in-memory radio environment
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                terminals: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Host a peripheral service at an address; returns the radio handle to
    /// bind onto the service.
    pub fn register_terminal(
        &self,
        address: &str,
        service: Arc<PeripheralService>,
    ) -> Arc<MemoryPeripheralRadio> {
        let entry = Arc::new(TerminalEntry {
            service,
            advertising: RwLock::new(None),
            subscribers: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        });
        self.inner
            .terminals
            .write()
            .insert(address.to_string(), entry.clone());
        Arc::new(MemoryPeripheralRadio { entry })
    }

    /// Create a central-side link into the hub
    pub fn central_link(&self, central_id: &str) -> Arc<MemoryCentralLink> {
        Arc::new(MemoryCentralLink {
            hub: self.inner.clone(),
            central_id: central_id.to_string(),
            rssi: RwLock::new(HashMap::new()),
            connected: RwLock::new(HashSet::new()),
        })
    }

    /// Take a terminal off the air to inject transport failures
    pub fn set_offline(&self, address: &str, offline: bool) {
        if let Some(entry) = self.inner.terminals.read().get(address) {
            entry.offline.store(offline, Ordering::Relaxed);
        }
    }
}

/// Peripheral-side radio handle for one hub terminal
pub struct MemoryPeripheralRadio {
    entry: Arc<TerminalEntry>,
}

#[async_trait]
impl PeripheralRadio for MemoryPeripheralRadio {
    async fn start_advertising(
        &self,
        advertisement: Advertisement,
    ) -> Result<(), TransportError> {
        if self.entry.offline.load(Ordering::Relaxed) {
            return Err(TransportError::AdvertisingFailed("radio offline".to_string()));
        }
        *self.entry.advertising.write() = Some(advertisement);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        *self.entry.advertising.write() = None;
        Ok(())
    }

    async fn notify(
        &self,
        peer_id: &str,
        characteristic: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let sender = self
            .entry
            .subscribers
            .read()
            .get(&(peer_id.to_string(), characteristic))
            .cloned()
            .ok_or(TransportError::NotSubscribed)?;
        sender
            .try_send(data.to_vec())
            .map_err(|_| TransportError::LinkClosed)
    }

    async fn disconnect(&self, peer_id: &str) -> Result<(), TransportError> {
        self.entry
            .subscribers
            .write()
            .retain(|(subscriber, _), _| subscriber != peer_id);
        self.entry.service.handle_disconnection(peer_id);
        Ok(())
    }
}

/// Central-side radio link into the hub
pub struct MemoryCentralLink {
    hub: Arc<HubInner>,
    central_id: String,
    rssi: RwLock<HashMap<String, i8>>,
    connected: RwLock<HashSet<String>>,
}

impl MemoryCentralLink {
    /// Override the signal strength this link observes for an address
    pub fn set_rssi(&self, address: &str, rssi_dbm: i8) {
        self.rssi.write().insert(address.to_string(), rssi_dbm);
    }

    fn terminal(&self, address: &str) -> Result<Arc<TerminalEntry>, TransportError> {
        self.hub
            .terminals
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(address.to_string()))
    }

    fn connected_terminal(&self, address: &str) -> Result<Arc<TerminalEntry>, TransportError> {
        if !self.connected.read().contains(address) {
            return Err(TransportError::NotConnected);
        }
        self.terminal(address)
    }
}

#[async_trait]
impl CentralRadio for MemoryCentralLink {
    async fn scan(&self, _window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let terminals = self.hub.terminals.read();
        let rssi = self.rssi.read();
        let mut results = Vec::new();
        for (address, entry) in terminals.iter() {
            if entry.offline.load(Ordering::Relaxed) {
                continue;
            }
            if let Some(mut advertisement) = entry.advertising.read().clone() {
                advertisement.address = address.clone();
                advertisement.rssi_dbm = rssi.get(address).copied().unwrap_or(DEFAULT_RSSI_DBM);
                results.push(advertisement);
            }
        }
        Ok(results)
    }

    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let entry = self.terminal(address)?;
        if entry.offline.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectFailed("radio offline".to_string()));
        }
        entry
            .service
            .handle_connection_request(&self.central_id, &self.central_id)
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        self.connected.write().insert(address.to_string());
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<(), TransportError> {
        if !self.connected.write().remove(address) {
            return Ok(());
        }
        let entry = self.terminal(address)?;
        entry
            .subscribers
            .write()
            .retain(|(subscriber, _), _| subscriber != &self.central_id);
        entry.service.handle_disconnection(&self.central_id);
        Ok(())
    }

    async fn discover_characteristics(&self, address: &str) -> Result<Vec<u16>, TransportError> {
        self.connected_terminal(address)?;
        Ok(crate::gatt::REQUIRED_CHARACTERISTICS
            .iter()
            .map(|c| c.uuid())
            .collect())
    }

    async fn negotiate_parameters(
        &self,
        address: &str,
        requested: ConnectionParams,
    ) -> Result<ConnectionParams, TransportError> {
        self.connected_terminal(address)?;
        Ok(ConnectionParams::clamp_requested(requested))
    }

    async fn read(&self, address: &str, characteristic: u16) -> Result<Vec<u8>, TransportError> {
        let entry = self.connected_terminal(address)?;
        entry
            .service
            .handle_characteristic_read(&self.central_id, characteristic)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn write(
        &self,
        address: &str,
        characteristic: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let entry = self.connected_terminal(address)?;
        if entry.offline.load(Ordering::Relaxed) {
            return Err(TransportError::Timeout);
        }
        entry
            .service
            .handle_characteristic_write(&self.central_id, characteristic, data)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn subscribe(
        &self,
        address: &str,
        characteristic: u16,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let entry = self.connected_terminal(address)?;
        let (tx, rx) = mpsc::channel(NOTIFY_CHANNEL_DEPTH);
        entry
            .subscribers
            .write()
            .insert((self.central_id.clone(), characteristic), tx);
        entry
            .service
            .handle_subscription_change(&self.central_id, characteristic, true)
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        Ok(rx)
    }
}
