// Recovery module — error classification, tracking and circuit breaking

pub mod classify;
pub mod tracker;

pub use classify::{ErrorCode, RecoveryAction, Severity};
pub use tracker::{ErrorRecord, ErrorTracker};
