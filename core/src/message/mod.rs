// Message module — envelope types and serialization for the secure channel

pub mod codec;
pub mod types;

pub use codec::{decode_envelope, encode_envelope, is_expired, signature_base, CodecError};
pub use types::{MessageEnvelope, ENVELOPE_NONCE_LEN, PROTOCOL_VERSION};
