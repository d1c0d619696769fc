//! Stream-cipher family: stateful IV, XOR keystream, no authentication.
//! One `StreamEncryptor`/`StreamDecryptor` instance is created per
//! connection direction after the IV has been exchanged, then every
//! subsequent chunk of plaintext/ciphertext is run through
//! `apply_keystream` in place.

use crate::common::error::{Error, Result};
use crate::crypto::hash::md5;
use crate::crypto::method::CryptoMethod;
use aes::{Aes128, Aes192, Aes256};
use camellia::{Camellia128, Camellia192, Camellia256};
use chacha20::{ChaCha20, ChaCha20Legacy};
use cipher::{KeyIvInit, StreamCipher as _};
use salsa20::Salsa20;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;
type Aes192CfbEnc = cfb_mode::Encryptor<Aes192>;
type Aes192CfbDec = cfb_mode::Decryptor<Aes192>;
type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;
type BfCfbEnc = cfb_mode::Encryptor<blowfish::Blowfish>;
type BfCfbDec = cfb_mode::Decryptor<blowfish::Blowfish>;
type Camellia128CfbEnc = cfb_mode::Encryptor<Camellia128>;
type Camellia128CfbDec = cfb_mode::Decryptor<Camellia128>;
type Camellia192CfbEnc = cfb_mode::Encryptor<Camellia192>;
type Camellia192CfbDec = cfb_mode::Decryptor<Camellia192>;
type Camellia256CfbEnc = cfb_mode::Encryptor<Camellia256>;
type Camellia256CfbDec = cfb_mode::Decryptor<Camellia256>;

/// Either direction of a CFB-mode cipher implements `StreamCipher`
/// identically from the caller's point of view; this macro spares us
/// writing the same enum variant/match arm twice per block cipher.
macro_rules! stream_enum {
    ($name:ident { $($variant:ident($ty:ty)),* $(,)? }) => {
        enum $name {
            $($variant($ty)),*
        }

        impl $name {
            fn apply(&mut self, data: &mut [u8]) {
                match self {
                    $(Self::$variant(c) => c.apply_keystream(data)),*
                }
            }
        }
    };
}

stream_enum!(EncInner {
    Rc4(rc4::Rc4),
    BfCfb(BfCfbEnc),
    Aes128Ctr(Aes128Ctr),
    Aes192Ctr(Aes192Ctr),
    Aes256Ctr(Aes256Ctr),
    Aes128Cfb(Aes128CfbEnc),
    Aes192Cfb(Aes192CfbEnc),
    Aes256Cfb(Aes256CfbEnc),
    Camellia128Cfb(Camellia128CfbEnc),
    Camellia192Cfb(Camellia192CfbEnc),
    Camellia256Cfb(Camellia256CfbEnc),
    ChaCha20(ChaCha20),
    ChaCha20Legacy(ChaCha20Legacy),
    Salsa20(Salsa20),
});

stream_enum!(DecInner {
    Rc4(rc4::Rc4),
    BfCfb(BfCfbDec),
    Aes128Ctr(Aes128Ctr),
    Aes192Ctr(Aes192Ctr),
    Aes256Ctr(Aes256Ctr),
    Aes128Cfb(Aes128CfbDec),
    Aes192Cfb(Aes192CfbDec),
    Aes256Cfb(Aes256CfbDec),
    Camellia128Cfb(Camellia128CfbDec),
    Camellia192Cfb(Camellia192CfbDec),
    Camellia256Cfb(Camellia256CfbDec),
    ChaCha20(ChaCha20),
    ChaCha20Legacy(ChaCha20Legacy),
    Salsa20(Salsa20),
});

/// `rc4-md5` does not use the generated master key directly: the actual
/// RC4 key is `MD5(master_key || iv)`.
fn rc4_md5_key(master_key: &[u8], iv: &[u8]) -> [u8; 16] {
    let mut input = Vec::with_capacity(master_key.len() + iv.len());
    input.extend_from_slice(master_key);
    input.extend_from_slice(iv);
    md5(&input)
}

fn build_enc(method: CryptoMethod, key: &[u8], iv: &[u8]) -> Result<EncInner> {
    use CryptoMethod::*;
    let bad = || Error::crypto("bad key/iv length for stream cipher");
    Ok(match method {
        Rc4Md5 => {
            let k = rc4_md5_key(key, iv);
            EncInner::Rc4(rc4::Rc4::new_from_slice(&k).map_err(|_| bad())?)
        }
        BfCfb => EncInner::BfCfb(BfCfbEnc::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes128Ctr => EncInner::Aes128Ctr(Aes128Ctr::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes192Ctr => EncInner::Aes192Ctr(Aes192Ctr::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes256Ctr => EncInner::Aes256Ctr(Aes256Ctr::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes128Cfb => EncInner::Aes128Cfb(Aes128CfbEnc::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes192Cfb => EncInner::Aes192Cfb(Aes192CfbEnc::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes256Cfb => EncInner::Aes256Cfb(Aes256CfbEnc::new_from_slices(key, iv).map_err(|_| bad())?),
        Camellia128Cfb => {
            EncInner::Camellia128Cfb(Camellia128CfbEnc::new_from_slices(key, iv).map_err(|_| bad())?)
        }
        Camellia192Cfb => {
            EncInner::Camellia192Cfb(Camellia192CfbEnc::new_from_slices(key, iv).map_err(|_| bad())?)
        }
        Camellia256Cfb => {
            EncInner::Camellia256Cfb(Camellia256CfbEnc::new_from_slices(key, iv).map_err(|_| bad())?)
        }
        ChaCha20 => EncInner::ChaCha20Legacy(ChaCha20Legacy::new_from_slices(key, iv).map_err(|_| bad())?),
        Salsa20 => EncInner::Salsa20(Salsa20::new_from_slices(key, iv).map_err(|_| bad())?),
        ChaCha20Ietf => EncInner::ChaCha20(ChaCha20::new_from_slices(key, iv).map_err(|_| bad())?),
        other => return Err(Error::crypto(format!("{} is not a stream cipher", other))),
    })
}

fn build_dec(method: CryptoMethod, key: &[u8], iv: &[u8]) -> Result<DecInner> {
    use CryptoMethod::*;
    let bad = || Error::crypto("bad key/iv length for stream cipher");
    Ok(match method {
        Rc4Md5 => {
            let k = rc4_md5_key(key, iv);
            DecInner::Rc4(rc4::Rc4::new_from_slice(&k).map_err(|_| bad())?)
        }
        BfCfb => DecInner::BfCfb(BfCfbDec::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes128Ctr => DecInner::Aes128Ctr(Aes128Ctr::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes192Ctr => DecInner::Aes192Ctr(Aes192Ctr::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes256Ctr => DecInner::Aes256Ctr(Aes256Ctr::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes128Cfb => DecInner::Aes128Cfb(Aes128CfbDec::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes192Cfb => DecInner::Aes192Cfb(Aes192CfbDec::new_from_slices(key, iv).map_err(|_| bad())?),
        Aes256Cfb => DecInner::Aes256Cfb(Aes256CfbDec::new_from_slices(key, iv).map_err(|_| bad())?),
        Camellia128Cfb => {
            DecInner::Camellia128Cfb(Camellia128CfbDec::new_from_slices(key, iv).map_err(|_| bad())?)
        }
        Camellia192Cfb => {
            DecInner::Camellia192Cfb(Camellia192CfbDec::new_from_slices(key, iv).map_err(|_| bad())?)
        }
        Camellia256Cfb => {
            DecInner::Camellia256Cfb(Camellia256CfbDec::new_from_slices(key, iv).map_err(|_| bad())?)
        }
        ChaCha20 => DecInner::ChaCha20Legacy(ChaCha20Legacy::new_from_slices(key, iv).map_err(|_| bad())?),
        Salsa20 => DecInner::Salsa20(Salsa20::new_from_slices(key, iv).map_err(|_| bad())?),
        ChaCha20Ietf => DecInner::ChaCha20(ChaCha20::new_from_slices(key, iv).map_err(|_| bad())?),
        other => return Err(Error::crypto(format!("{} is not a stream cipher", other))),
    })
}

pub struct StreamEncryptor {
    inner: EncInner,
}

impl StreamEncryptor {
    pub fn new(method: CryptoMethod, key: &[u8], iv: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: build_enc(method, key, iv)?,
        })
    }

    /// XOR the keystream into `data` in place, continuing from wherever
    /// the stream left off after the previous call.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.inner.apply(data)
    }
}

pub struct StreamDecryptor {
    inner: DecInner,
}

impl StreamDecryptor {
    pub fn new(method: CryptoMethod, key: &[u8], iv: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: build_dec(method, key, iv)?,
        })
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.inner.apply(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_key;

    fn roundtrip(method: CryptoMethod) {
        let key = generate_key(b"password", method.key_size());
        let iv = vec![0x42u8; method.iv_size().max(1)];
        let mut enc = StreamEncryptor::new(method, &key, &iv).unwrap();
        let mut dec = StreamDecryptor::new(method, &key, &iv).unwrap();
        let plaintext = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut buf = plaintext.clone();
        enc.encrypt(&mut buf);
        assert_ne!(buf, plaintext);
        dec.decrypt(&mut buf);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn roundtrips_all_stream_methods() {
        for m in [
            CryptoMethod::Rc4Md5,
            CryptoMethod::BfCfb,
            CryptoMethod::Aes128Ctr,
            CryptoMethod::Aes192Ctr,
            CryptoMethod::Aes256Ctr,
            CryptoMethod::Aes128Cfb,
            CryptoMethod::Aes192Cfb,
            CryptoMethod::Aes256Cfb,
            CryptoMethod::Camellia128Cfb,
            CryptoMethod::Camellia192Cfb,
            CryptoMethod::Camellia256Cfb,
            CryptoMethod::ChaCha20,
            CryptoMethod::Salsa20,
            CryptoMethod::ChaCha20Ietf,
        ] {
            roundtrip(m);
        }
    }

    #[test]
    fn split_chunks_match_single_call() {
        let method = CryptoMethod::Aes256Ctr;
        let key = generate_key(b"password", method.key_size());
        let iv = vec![0x01u8; method.iv_size()];
        let plaintext = b"0123456789abcdefghijklmnopqrstuvwxyz".to_vec();

        let mut whole = plaintext.clone();
        StreamEncryptor::new(method, &key, &iv).unwrap().encrypt(&mut whole);

        let mut chunked = plaintext.clone();
        let mut enc = StreamEncryptor::new(method, &key, &iv).unwrap();
        let (a, b) = chunked.split_at_mut(10);
        enc.encrypt(a);
        enc.encrypt(b);

        assert_eq!(whole, chunked);
    }
}
