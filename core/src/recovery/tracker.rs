// Per-peer error tracking and circuit breaking
//
// Errors are remembered across reconnect attempts, independent of any live
// session, so repeated failures from the same peer keep driving the breaker.

use super::classify::{ErrorCode, RecoveryAction, Severity};
use crate::external::AuditSink;
use crate::unix_now;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One recorded failure
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub peer_id: String,
    pub code: ErrorCode,
    pub operation: String,
    pub cause: Option<String>,
    pub timestamp: u64,
}

/// Aggregated per-peer failure state
#[derive(Debug, Clone, Default)]
struct PeerErrorState {
    /// Lifetime audit figure; never reset
    total: u64,
    /// Reset to zero on any fully successful operation
    consecutive: u32,
    last_error_at: u64,
    last_record: Option<ErrorRecord>,
    breaker_open: bool,
    breaker_opened_at: u64,
}

/// Central retry-policy authority.
///
/// Every failure on the link passes through here before any retry decision
/// is made, so recovery behavior stays peer-specific and in one place.
pub struct ErrorTracker {
    threshold: u32,
    cooldown_secs: u64,
    stale_after_secs: u64,
    peers: RwLock<HashMap<String, PeerErrorState>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ErrorTracker {
    pub fn new(threshold: u32, cooldown_secs: u64, stale_after_secs: u64) -> Self {
        Self {
            threshold,
            cooldown_secs,
            stale_after_secs,
            peers: RwLock::new(HashMap::new()),
            audit: None,
        }
    }

    /// Attach an audit sink; breaker trips are security-relevant events
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Record a failure and decide the recovery action
    pub fn handle_error(
        &self,
        peer_id: &str,
        code: ErrorCode,
        operation: &str,
        cause: Option<String>,
    ) -> RecoveryAction {
        self.handle_error_at(peer_id, code, operation, cause, unix_now())
    }

    pub(crate) fn handle_error_at(
        &self,
        peer_id: &str,
        code: ErrorCode,
        operation: &str,
        cause: Option<String>,
        now: u64,
    ) -> RecoveryAction {
        let severity = code.severity();
        let consecutive;
        {
            let mut peers = self.peers.write();
            let state = peers.entry(peer_id.to_string()).or_default();
            state.total += 1;
            state.consecutive += 1;
            state.last_error_at = now;
            state.last_record = Some(ErrorRecord {
                peer_id: peer_id.to_string(),
                code,
                operation: operation.to_string(),
                cause: cause.clone(),
                timestamp: now,
            });
            consecutive = state.consecutive;

            if consecutive >= self.threshold && !state.breaker_open {
                state.breaker_open = true;
                state.breaker_opened_at = now;
            }
        }

        debug!(
            "peer error: peer={} code={} op={} consecutive={} cause={:?}",
            peer_id,
            code.as_str(),
            operation,
            consecutive,
            cause
        );

        // Decision ladder, in order:
        // 1. breaker threshold reached
        if consecutive >= self.threshold {
            warn!("circuit breaker open for peer {}", peer_id);
            if let Some(audit) = &self.audit {
                audit.record(
                    peer_id,
                    Severity::Critical,
                    &format!(
                        "circuit breaker opened after {} consecutive failures",
                        consecutive
                    ),
                );
            }
            return RecoveryAction::CircuitBreakerOpen;
        }
        // 2. critical severity, regardless of count
        if severity == Severity::Critical {
            return RecoveryAction::DisconnectAndFail;
        }
        // 3. high severity with repeated failures
        if severity == Severity::High && consecutive >= 2 {
            return RecoveryAction::DisconnectAndRetry;
        }
        // 4. errors that cannot heal without renegotiation
        if !code.is_recoverable() {
            return RecoveryAction::DisconnectAndFail;
        }
        // 5. scale by consecutive count
        match consecutive {
            c if c >= 3 => RecoveryAction::DisconnectAndRetry,
            2 => RecoveryAction::RetryWithBackoff,
            _ => RecoveryAction::RetryImmediate,
        }
    }

    /// Whether the peer's breaker is currently open.
    ///
    /// The cool-down check happens lazily here: once the window has elapsed
    /// the breaker closes and the consecutive counter resets, with no
    /// separate timer involved.
    pub fn is_device_blocked(&self, peer_id: &str) -> bool {
        self.is_device_blocked_at(peer_id, unix_now())
    }

    pub(crate) fn is_device_blocked_at(&self, peer_id: &str, now: u64) -> bool {
        let mut peers = self.peers.write();
        let Some(state) = peers.get_mut(peer_id) else {
            return false;
        };
        if !state.breaker_open {
            return false;
        }
        if now.saturating_sub(state.breaker_opened_at) >= self.cooldown_secs {
            debug!("circuit breaker cool-down elapsed for peer {}", peer_id);
            state.breaker_open = false;
            state.consecutive = 0;
            return false;
        }
        true
    }

    /// Zero the consecutive counter after a fully successful operation.
    /// The lifetime total is untouched.
    pub fn reset_error_tracking(&self, peer_id: &str) {
        let mut peers = self.peers.write();
        if let Some(state) = peers.get_mut(peer_id) {
            state.consecutive = 0;
        }
    }

    /// Lifetime error count for a peer
    pub fn total_errors(&self, peer_id: &str) -> u64 {
        self.peers.read().get(peer_id).map_or(0, |s| s.total)
    }

    /// Current consecutive error count for a peer
    pub fn consecutive_errors(&self, peer_id: &str) -> u32 {
        self.peers.read().get(peer_id).map_or(0, |s| s.consecutive)
    }

    /// Most recent failure recorded for a peer
    pub fn last_error(&self, peer_id: &str) -> Option<ErrorRecord> {
        self.peers
            .read()
            .get(peer_id)
            .and_then(|s| s.last_record.clone())
    }

    /// Number of peers with an open breaker right now
    pub fn open_breakers(&self) -> usize {
        let now = unix_now();
        let peers = self.peers.read();
        peers
            .values()
            .filter(|s| {
                s.breaker_open && now.saturating_sub(s.breaker_opened_at) < self.cooldown_secs
            })
            .count()
    }

    /// Drop entries with no activity for the stale window; driven by the
    /// maintenance scheduler.
    pub fn cleanup_stale(&self, now: u64) {
        let mut peers = self.peers.write();
        peers.retain(|_, state| {
            state.breaker_open || now.saturating_sub(state.last_error_at) < self.stale_after_secs
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Audit {}
        impl AuditSink for Audit {
            fn record(&self, peer_id: &str, severity: Severity, description: &str);
        }
    }

    fn tracker() -> ErrorTracker {
        ErrorTracker::new(3, 30, 300)
    }

    #[test]
    fn test_first_medium_error_retries_immediately() {
        let t = tracker();
        let action = t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 100);
        assert_eq!(action, RecoveryAction::RetryImmediate);
        assert!(!t.is_device_blocked_at("peer", 100));

        let record = t.last_error("peer").expect("record kept");
        assert_eq!(record.code, ErrorCode::ConnectionTimeout);
        assert_eq!(record.operation, "connect");
        assert_eq!(record.timestamp, 100);
    }

    #[test]
    fn test_second_medium_error_backs_off() {
        let t = tracker();
        t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 100);
        let action = t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 101);
        assert_eq!(action, RecoveryAction::RetryWithBackoff);
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let t = tracker();
        t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 100);
        t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 101);
        let action = t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 102);
        assert_eq!(action, RecoveryAction::CircuitBreakerOpen);
        assert!(t.is_device_blocked_at("peer", 103));
    }

    #[test]
    fn test_breaker_closes_lazily_after_cooldown() {
        let t = tracker();
        for i in 0..3 {
            t.handle_error_at("peer", ErrorCode::ConnectionFailed, "connect", None, 100 + i);
        }
        assert!(t.is_device_blocked_at("peer", 110));
        // Cool-down elapsed: closes on the query itself, consecutive resets
        assert!(!t.is_device_blocked_at("peer", 132));
        assert_eq!(t.consecutive_errors("peer"), 0);
        // Lifetime total untouched
        assert_eq!(t.total_errors("peer"), 3);
    }

    #[test]
    fn test_critical_on_fresh_peer_fails_immediately() {
        let t = tracker();
        let action =
            t.handle_error_at("peer", ErrorCode::InvalidCertificate, "handshake", None, 100);
        assert_eq!(action, RecoveryAction::DisconnectAndFail);
        assert!(!t.is_device_blocked_at("peer", 100));
    }

    #[test]
    fn test_high_severity_ramps_to_disconnect_and_retry() {
        let t = tracker();
        t.handle_error_at("peer", ErrorCode::AuthenticationFailed, "handshake", None, 100);
        let action =
            t.handle_error_at("peer", ErrorCode::AuthenticationFailed, "handshake", None, 101);
        assert_eq!(action, RecoveryAction::DisconnectAndRetry);
    }

    #[test]
    fn test_non_recoverable_fails_even_at_low_count() {
        let t = tracker();
        let action = t.handle_error_at(
            "peer",
            ErrorCode::CharacteristicNotFound,
            "discover",
            None,
            100,
        );
        assert_eq!(action, RecoveryAction::DisconnectAndFail);
    }

    #[test]
    fn test_success_resets_consecutive_only() {
        let t = tracker();
        t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 100);
        t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 101);
        t.reset_error_tracking("peer");
        assert_eq!(t.consecutive_errors("peer"), 0);
        assert_eq!(t.total_errors("peer"), 2);
        // Counter starts over, no carried ramp
        let action = t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 102);
        assert_eq!(action, RecoveryAction::RetryImmediate);
    }

    #[test]
    fn test_errors_survive_without_session() {
        // Tracker state is keyed by peer id alone; a reconnecting peer
        // inherits its previous failures.
        let t = tracker();
        t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 100);
        t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 101);
        let action = t.handle_error_at("peer", ErrorCode::ConnectionTimeout, "connect", None, 150);
        assert_eq!(action, RecoveryAction::CircuitBreakerOpen);
    }

    #[test]
    fn test_cleanup_retains_open_breakers() {
        let t = tracker();
        for i in 0..3 {
            t.handle_error_at("blocked", ErrorCode::ConnectionFailed, "connect", None, 100 + i);
        }
        t.handle_error_at("quiet", ErrorCode::WeakSignal, "scan", None, 100);
        t.cleanup_stale(100 + 400);
        // Quiet peer swept, blocked peer retained
        assert_eq!(t.total_errors("quiet"), 0);
        assert_eq!(t.total_errors("blocked"), 3);
    }

    #[test]
    fn test_breaker_trip_reaches_audit_sink() {
        let mut audit = MockAudit::new();
        audit
            .expect_record()
            .withf(|peer, severity, description| {
                peer == "peer"
                    && *severity == Severity::Critical
                    && description.contains("circuit breaker")
            })
            .times(1)
            .return_const(());

        let t = ErrorTracker::new(3, 30, 300).with_audit(Arc::new(audit));
        for i in 0..3 {
            t.handle_error_at("peer", ErrorCode::ConnectionFailed, "connect", None, 100 + i);
        }
    }
}
