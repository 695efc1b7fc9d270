// Identity module — device keys and peer certificates

pub mod certificate;
pub mod keys;

pub use certificate::{CertificateError, DeviceCertificate};
pub use keys::{verify_signature, DeviceKeypair, KeyError, PeerIdentity};
