//! Shadowsocks cipher primitives: method identifiers, key derivation,
//! stream ciphers and AEAD ciphers, plus the hash helpers (HMAC/HKDF) the
//! AEAD subkey derivation needs.

pub mod aead;
pub mod hash;
pub mod keys;
pub mod method;
pub mod stream;

pub use aead::{AeadDecryptor, AeadEncryptor};
pub use keys::generate_key;
pub use method::CryptoMethod;
pub use stream::{StreamDecryptor, StreamEncryptor};
