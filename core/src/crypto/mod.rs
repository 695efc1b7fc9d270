// Cryptography module — session key agreement, sealing, passcodes

pub mod session;

pub use session::{
    derive_session_key, generate_otp, open, random_bytes, seal, verify_otp, CryptoError,
    SessionKey, AEAD_NONCE_LEN, AEAD_TAG_LEN, SESSION_KEY_LEN, SESSION_NONCE_LEN,
};
