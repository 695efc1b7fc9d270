// Peripheral module — the terminal side of the link

pub mod service;

pub use service::{PeripheralError, PeripheralService, ServiceState, StatusSnapshot};
