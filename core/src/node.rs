// Transport orchestrator — operation mode, lifecycle and background
// maintenance.
//
// The node owns a bounded worker pool for radio-facing calls and a single
// periodic scheduler task that refreshes advertising, sweeps idle sessions
// and cleans stale tracker entries. Both are scoped to the node: shutdown
// stops the scheduler and releases every session, nothing is process-wide.

use crate::central::{CentralController, CentralError};
use crate::config::{ConfigError, ProtocolConfig};
use crate::peripheral::{PeripheralError, PeripheralService};
use crate::recovery::ErrorTracker;
use crate::session::Session;
use crate::transport::Advertisement;
use crate::unix_now;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Errors for node lifecycle and delegated operations
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Node already running")]
    AlreadyRunning,
    #[error("Node not running")]
    NotRunning,
    #[error("Operation mode requires a {0} component")]
    MissingComponent(&'static str),
    #[error("Worker pool closed")]
    WorkerPoolClosed,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Peripheral(#[from] PeripheralError),
    #[error(transparent)]
    Central(#[from] CentralError),
}

/// Which half (or both) of the protocol this node runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    Central,
    Peripheral,
    Dual,
}

/// Point-in-time node statistics, serializable for ops surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub mode: OperationMode,
    pub uptime_secs: u64,
    pub peripheral_sessions: usize,
    pub central_sessions: usize,
    pub envelopes_processed: u64,
    pub open_breakers: usize,
}

/// The orchestrator tying both protocol halves together
pub struct VaultLinkNode {
    config: ProtocolConfig,
    mode: OperationMode,
    peripheral: Option<Arc<PeripheralService>>,
    central: Option<Arc<CentralController>>,
    tracker: Arc<ErrorTracker>,
    workers: Arc<Semaphore>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    started_at: AtomicU64,
}

impl VaultLinkNode {
    pub fn new(
        config: ProtocolConfig,
        mode: OperationMode,
        peripheral: Option<Arc<PeripheralService>>,
        central: Option<Arc<CentralController>>,
        tracker: Arc<ErrorTracker>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        match mode {
            OperationMode::Peripheral if peripheral.is_none() => {
                return Err(NodeError::MissingComponent("peripheral"))
            }
            OperationMode::Central if central.is_none() => {
                return Err(NodeError::MissingComponent("central"))
            }
            OperationMode::Dual if peripheral.is_none() || central.is_none() => {
                return Err(NodeError::MissingComponent("peripheral and central"))
            }
            _ => {}
        }
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));
        Ok(Self {
            config,
            mode,
            peripheral,
            central,
            tracker,
            workers,
            scheduler: Mutex::new(None),
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
        })
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn central(&self) -> Result<&Arc<CentralController>, NodeError> {
        self.central
            .as_ref()
            .ok_or(NodeError::MissingComponent("central"))
    }

    /// Start the node: begin advertising (peripheral modes) and launch the
    /// maintenance scheduler.
    pub async fn start(&self) -> Result<(), NodeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyRunning);
        }
        self.started_at.store(unix_now(), Ordering::Relaxed);

        if let Some(peripheral) = &self.peripheral {
            peripheral.start_advertising().await?;
        }

        let peripheral = self.peripheral.clone();
        let tracker = self.tracker.clone();
        let interval = self.config.maintenance_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let now = unix_now();
                if let Some(peripheral) = &peripheral {
                    if let Err(e) = peripheral.refresh_advertising().await {
                        debug!("advertising refresh failed: {}", e);
                    }
                    let dropped = peripheral.sweep_idle(now).await;
                    if !dropped.is_empty() {
                        debug!("idle sweep dropped {} session(s)", dropped.len());
                    }
                }
                tracker.cleanup_stale(now);
            }
        });
        *self.scheduler.lock() = Some(handle);
        info!("node started in {:?} mode", self.mode);
        Ok(())
    }

    /// Stop the scheduler, stop advertising and release every session
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(NodeError::NotRunning);
        }
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
        }
        if let Some(peripheral) = &self.peripheral {
            peripheral.shutdown().await?;
        }
        if let Some(central) = &self.central {
            central.disconnect_all().await;
        }
        info!("node stopped");
        Ok(())
    }

    /// Scan through the bounded worker pool
    pub async fn scan(&self, timeout_secs: u64) -> Result<Vec<Advertisement>, NodeError> {
        let central = self.central()?;
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| NodeError::WorkerPoolClosed)?;
        Ok(central.scan(timeout_secs).await?)
    }

    /// Connect through the bounded worker pool
    pub async fn connect(&self, address: &str) -> Result<Arc<Session>, NodeError> {
        let central = self.central()?;
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| NodeError::WorkerPoolClosed)?;
        Ok(central.connect(address).await?)
    }

    /// Send a secure message through the bounded worker pool
    pub async fn send_secure_message(
        &self,
        address: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, NodeError> {
        let central = self.central()?;
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| NodeError::WorkerPoolClosed)?;
        Ok(central.send_secure_message(address, payload).await?)
    }

    pub async fn disconnect(&self, address: &str) -> Result<(), NodeError> {
        Ok(self.central()?.disconnect(address).await?)
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.central
            .as_ref()
            .map(|central| central.is_connected(address))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            mode: self.mode,
            uptime_secs: if self.is_running() {
                unix_now().saturating_sub(self.started_at.load(Ordering::Relaxed))
            } else {
                0
            },
            peripheral_sessions: self
                .peripheral
                .as_ref()
                .map(|p| p.session_count())
                .unwrap_or(0),
            central_sessions: self
                .central
                .as_ref()
                .map(|c| c.connected_addresses().len())
                .unwrap_or(0),
            envelopes_processed: self
                .peripheral
                .as_ref()
                .map(|p| p.envelopes_processed())
                .unwrap_or(0),
            open_breakers: self.tracker.open_breakers(),
        }
    }

    /// Stats as a JSON document for the embedding ops surface
    pub fn stats_json(&self) -> String {
        serde_json::to_string(&self.stats()).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> Arc<ErrorTracker> {
        Arc::new(ErrorTracker::new(3, 30, 300))
    }

    #[test]
    fn test_central_mode_requires_central() {
        let result = VaultLinkNode::new(
            ProtocolConfig::default(),
            OperationMode::Central,
            None,
            None,
            tracker(),
        );
        assert!(matches!(result, Err(NodeError::MissingComponent(_))));
    }

    #[test]
    fn test_peripheral_mode_requires_peripheral() {
        let result = VaultLinkNode::new(
            ProtocolConfig::default(),
            OperationMode::Peripheral,
            None,
            None,
            tracker(),
        );
        assert!(matches!(result, Err(NodeError::MissingComponent(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ProtocolConfig {
            worker_pool_size: 0,
            ..Default::default()
        };
        let result = VaultLinkNode::new(config, OperationMode::Central, None, None, tracker());
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
