//! Shadowsocks `CryptoMethod` identifiers and their key/IV/nonce/tag sizes.

use crate::common::error::{Error, Result};
use std::fmt;

/// All Shadowsocks cipher methods this node understands, split into the
/// legacy stream-cipher family (stateful IV, no authentication) and the
/// AEAD family (per-chunk nonce, authenticated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptoMethod {
    Rc4Md5,
    BfCfb,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Camellia128Cfb,
    Camellia192Cfb,
    Camellia256Cfb,
    ChaCha20,
    Salsa20,
    ChaCha20Ietf,
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
    ChaCha20IetfPoly1305,
    XChaCha20IetfPoly1305,
}

impl CryptoMethod {
    pub fn is_aead(self) -> bool {
        matches!(
            self,
            CryptoMethod::Aes128Gcm
                | CryptoMethod::Aes192Gcm
                | CryptoMethod::Aes256Gcm
                | CryptoMethod::ChaCha20IetfPoly1305
                | CryptoMethod::XChaCha20IetfPoly1305
        )
    }

    pub fn is_stream(self) -> bool {
        !self.is_aead()
    }

    /// Master key length in bytes, as fed into `generate_key`.
    pub fn key_size(self) -> usize {
        use CryptoMethod::*;
        match self {
            Rc4Md5 => 16,
            BfCfb => 16,
            Aes128Ctr | Aes128Cfb | Camellia128Cfb | Aes128Gcm => 16,
            Aes192Ctr | Aes192Cfb | Camellia192Cfb | Aes192Gcm => 24,
            Aes256Ctr | Aes256Cfb | Camellia256Cfb | Aes256Gcm => 32,
            ChaCha20 | Salsa20 | ChaCha20Ietf => 32,
            ChaCha20IetfPoly1305 | XChaCha20IetfPoly1305 => 32,
        }
    }

    /// IV length in bytes, for stream ciphers only.
    pub fn iv_size(self) -> usize {
        use CryptoMethod::*;
        match self {
            Rc4Md5 => 16,
            BfCfb => 8,
            Aes128Ctr | Aes192Ctr | Aes256Ctr => 16,
            Aes128Cfb | Aes192Cfb | Aes256Cfb => 16,
            Camellia128Cfb | Camellia192Cfb | Camellia256Cfb => 16,
            ChaCha20 | Salsa20 => 8,
            ChaCha20Ietf => 12,
            _ => 0,
        }
    }

    /// Per-chunk nonce length in bytes, for AEAD ciphers only.
    pub fn nonce_size(self) -> usize {
        use CryptoMethod::*;
        match self {
            Aes128Gcm | Aes192Gcm | Aes256Gcm | ChaCha20IetfPoly1305 => 12,
            XChaCha20IetfPoly1305 => 24,
            _ => 0,
        }
    }

    /// Authentication tag length in bytes, for AEAD ciphers only.
    pub fn tag_size(self) -> usize {
        if self.is_aead() {
            16
        } else {
            0
        }
    }

    /// Random salt length prefixed to an AEAD stream; by convention equal
    /// to the key size.
    pub fn salt_size(self) -> usize {
        self.key_size()
    }

    /// The IV (stream) or salt (AEAD) length that precedes ciphertext on
    /// the wire.
    pub fn leading_size(self) -> usize {
        if self.is_aead() {
            self.salt_size()
        } else {
            self.iv_size()
        }
    }
}

impl fmt::Display for CryptoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CryptoMethod {
    pub fn as_str(self) -> &'static str {
        use CryptoMethod::*;
        match self {
            Rc4Md5 => "rc4-md5",
            BfCfb => "bf-cfb",
            Aes128Ctr => "aes-128-ctr",
            Aes192Ctr => "aes-192-ctr",
            Aes256Ctr => "aes-256-ctr",
            Aes128Cfb => "aes-128-cfb",
            Aes192Cfb => "aes-192-cfb",
            Aes256Cfb => "aes-256-cfb",
            Camellia128Cfb => "camellia-128-cfb",
            Camellia192Cfb => "camellia-192-cfb",
            Camellia256Cfb => "camellia-256-cfb",
            ChaCha20 => "chacha20",
            Salsa20 => "salsa20",
            ChaCha20Ietf => "chacha20-ietf",
            Aes128Gcm => "aes-128-gcm",
            Aes192Gcm => "aes-192-gcm",
            Aes256Gcm => "aes-256-gcm",
            ChaCha20IetfPoly1305 => "chacha20-ietf-poly1305",
            XChaCha20IetfPoly1305 => "xchacha20-ietf-poly1305",
        }
    }
}

impl std::str::FromStr for CryptoMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        use CryptoMethod::*;
        Ok(match s {
            "rc4-md5" => Rc4Md5,
            "bf-cfb" => BfCfb,
            "aes-128-ctr" => Aes128Ctr,
            "aes-192-ctr" => Aes192Ctr,
            "aes-256-ctr" => Aes256Ctr,
            "aes-128-cfb" => Aes128Cfb,
            "aes-192-cfb" => Aes192Cfb,
            "aes-256-cfb" => Aes256Cfb,
            "camellia-128-cfb" => Camellia128Cfb,
            "camellia-192-cfb" => Camellia192Cfb,
            "camellia-256-cfb" => Camellia256Cfb,
            "chacha20" => ChaCha20,
            "salsa20" => Salsa20,
            "chacha20-ietf" => ChaCha20Ietf,
            "aes-128-gcm" => Aes128Gcm,
            "aes-192-gcm" => Aes192Gcm,
            "aes-256-gcm" => Aes256Gcm,
            "chacha20-ietf-poly1305" => ChaCha20IetfPoly1305,
            "xchacha20-ietf-poly1305" => XChaCha20IetfPoly1305,
            other => return Err(Error::config(format!("unknown cipher method: {}", other))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_round_trips_names() {
        for name in [
            "rc4-md5",
            "aes-256-gcm",
            "chacha20-ietf-poly1305",
            "xchacha20-ietf-poly1305",
            "camellia-128-cfb",
        ] {
            let m: CryptoMethod = name.parse().unwrap();
            assert_eq!(m.as_str(), name);
        }
    }

    #[test]
    fn aead_methods_have_no_iv() {
        assert_eq!(CryptoMethod::Aes256Gcm.iv_size(), 0);
        assert_eq!(CryptoMethod::Aes256Gcm.nonce_size(), 12);
        assert_eq!(CryptoMethod::Aes256Gcm.salt_size(), 32);
    }

    #[test]
    fn stream_methods_have_no_nonce_or_tag() {
        assert_eq!(CryptoMethod::ChaCha20Ietf.nonce_size(), 0);
        assert_eq!(CryptoMethod::ChaCha20Ietf.tag_size(), 0);
        assert_eq!(CryptoMethod::ChaCha20Ietf.iv_size(), 12);
    }

    #[test]
    fn rejects_unknown_method() {
        assert!("not-a-cipher".parse::<CryptoMethod>().is_err());
    }
}
