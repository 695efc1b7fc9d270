// Central module — the wallet side of the link

pub mod controller;
pub mod scan;

pub use controller::{CentralController, CentralError};
pub use scan::ScanFilter;
