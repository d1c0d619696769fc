//! Hash helpers layered over RustCrypto primitives: MD5 for the stream
//! cipher key schedule, SHA-224 for Trojan's password digest, and
//! HKDF-SHA1 for the AEAD per-session subkey derivation.

use crate::common::error::{Error, Result};
use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha2::Sha224;

pub fn md5(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha224_hex(data: &[u8]) -> String {
    let mut hasher = Sha224::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// `HKDF-SHA1(master_key, salt, info="ss-subkey")`, truncated to `out_len`
/// bytes, used to derive the per-session AEAD subkey from the method's
/// master key and this session's random salt.
pub fn hkdf_sha1_subkey(master_key: &[u8], salt: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<sha1::Sha1>::new(Some(salt), master_key);
    let mut out = vec![0u8; out_len];
    hk.expand(b"ss-subkey", &mut out)
        .map_err(|_| Error::crypto("HKDF output length invalid"))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_known_vector() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        let digest = md5(b"");
        assert_eq!(hex::encode(digest), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn sha224_password_hash_length() {
        let h = sha224_hex(b"hunter2");
        assert_eq!(h.len(), 56);
    }

    #[test]
    fn hkdf_subkey_is_deterministic() {
        let key = [0x11u8; 32];
        let salt = [0x22u8; 32];
        let a = hkdf_sha1_subkey(&key, &salt, 32).unwrap();
        let b = hkdf_sha1_subkey(&key, &salt, 32).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
