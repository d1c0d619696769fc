//! AEAD cipher family, framed the way Shadowsocks' AEAD protocol frames a
//! stream: each chunk is `length(2 bytes) || length_tag || payload || payload_tag`,
//! where `length` is capped at `0x3FFF` and both the length and the
//! payload are sealed separately under a nonce that increments by one
//! after every seal/open call (little-endian increment, matching
//! libsodium's `increment` convention).

use crate::common::error::{Error, Result};
use crate::crypto::hash::hkdf_sha1_subkey;
use crate::crypto::method::CryptoMethod;
use aead::generic_array::{typenum::U16, GenericArray};
use aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes192Gcm, Aes256Gcm};
use bytes::{Buf, BufMut, BytesMut};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};

/// Maximum plaintext bytes per chunk, per the Shadowsocks AEAD spec.
pub const MAX_CHUNK_SIZE: usize = 0x3FFF;

enum Inner {
    Aes128Gcm(Aes128Gcm, [u8; 12]),
    Aes192Gcm(Aes192Gcm, [u8; 12]),
    Aes256Gcm(Aes256Gcm, [u8; 12]),
    ChaCha20Poly1305(ChaCha20Poly1305, [u8; 12]),
    XChaCha20Poly1305(XChaCha20Poly1305, [u8; 24]),
}

fn increment(nonce: &mut [u8]) {
    for byte in nonce.iter_mut() {
        let (new, carry) = byte.overflowing_add(1);
        *byte = new;
        if !carry {
            break;
        }
    }
}

impl Inner {
    fn new(method: CryptoMethod, subkey: &[u8]) -> Result<Self> {
        let bad = || Error::crypto("bad AEAD subkey length");
        Ok(match method {
            CryptoMethod::Aes128Gcm => Inner::Aes128Gcm(
                Aes128Gcm::new_from_slice(subkey).map_err(|_| bad())?,
                [0u8; 12],
            ),
            CryptoMethod::Aes192Gcm => Inner::Aes192Gcm(
                Aes192Gcm::new_from_slice(subkey).map_err(|_| bad())?,
                [0u8; 12],
            ),
            CryptoMethod::Aes256Gcm => Inner::Aes256Gcm(
                Aes256Gcm::new_from_slice(subkey).map_err(|_| bad())?,
                [0u8; 12],
            ),
            CryptoMethod::ChaCha20IetfPoly1305 => Inner::ChaCha20Poly1305(
                ChaCha20Poly1305::new_from_slice(subkey).map_err(|_| bad())?,
                [0u8; 12],
            ),
            CryptoMethod::XChaCha20IetfPoly1305 => Inner::XChaCha20Poly1305(
                XChaCha20Poly1305::new_from_slice(subkey).map_err(|_| bad())?,
                [0u8; 24],
            ),
            other => return Err(Error::crypto(format!("{} is not an AEAD cipher", other))),
        })
    }

    fn seal_in_place(&mut self, buf: &mut Vec<u8>) -> Result<[u8; 16]> {
        let tag = match self {
            Inner::Aes128Gcm(c, n) => {
                let t = c
                    .encrypt_in_place_detached((&n[..]).into(), b"", buf)
                    .map_err(|_| Error::crypto("AEAD seal failed"))?;
                increment(n);
                t
            }
            Inner::Aes192Gcm(c, n) => {
                let t = c
                    .encrypt_in_place_detached((&n[..]).into(), b"", buf)
                    .map_err(|_| Error::crypto("AEAD seal failed"))?;
                increment(n);
                t
            }
            Inner::Aes256Gcm(c, n) => {
                let t = c
                    .encrypt_in_place_detached((&n[..]).into(), b"", buf)
                    .map_err(|_| Error::crypto("AEAD seal failed"))?;
                increment(n);
                t
            }
            Inner::ChaCha20Poly1305(c, n) => {
                let t = c
                    .encrypt_in_place_detached((&n[..]).into(), b"", buf)
                    .map_err(|_| Error::crypto("AEAD seal failed"))?;
                increment(n);
                t
            }
            Inner::XChaCha20Poly1305(c, n) => {
                let t = c
                    .encrypt_in_place_detached((&n[..]).into(), b"", buf)
                    .map_err(|_| Error::crypto("AEAD seal failed"))?;
                increment(n);
                t
            }
        };
        let mut out = [0u8; 16];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    fn open_in_place(&mut self, buf: &mut Vec<u8>, tag: &[u8]) -> Result<()> {
        let tag = GenericArray::<u8, U16>::clone_from_slice(tag);
        let result = match self {
            Inner::Aes128Gcm(c, n) => {
                let r = c.decrypt_in_place_detached((&n[..]).into(), b"", buf, &tag);
                increment(n);
                r
            }
            Inner::Aes192Gcm(c, n) => {
                let r = c.decrypt_in_place_detached((&n[..]).into(), b"", buf, &tag);
                increment(n);
                r
            }
            Inner::Aes256Gcm(c, n) => {
                let r = c.decrypt_in_place_detached((&n[..]).into(), b"", buf, &tag);
                increment(n);
                r
            }
            Inner::ChaCha20Poly1305(c, n) => {
                let r = c.decrypt_in_place_detached((&n[..]).into(), b"", buf, &tag);
                increment(n);
                r
            }
            Inner::XChaCha20Poly1305(c, n) => {
                let r = c.decrypt_in_place_detached((&n[..]).into(), b"", buf, &tag);
                increment(n);
                r
            }
        };
        result.map_err(|_| Error::crypto("AEAD tag mismatch"))
    }
}

fn derive_subkey(method: CryptoMethod, master_key: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
    hkdf_sha1_subkey(master_key, salt, method.key_size())
}

pub struct AeadEncryptor {
    inner: Inner,
}

impl AeadEncryptor {
    pub fn new(method: CryptoMethod, master_key: &[u8], salt: &[u8]) -> Result<Self> {
        let subkey = derive_subkey(method, master_key, salt)?;
        Ok(Self {
            inner: Inner::new(method, &subkey)?,
        })
    }

    /// Seal one chunk of up to `MAX_CHUNK_SIZE` plaintext bytes, returning
    /// the complete wire frame (length+tag, payload+tag).
    pub fn seal_chunk(&mut self, plaintext: &[u8]) -> Result<BytesMut> {
        if plaintext.len() > MAX_CHUNK_SIZE {
            return Err(Error::buffer_overflow("AEAD chunk exceeds 0x3FFF bytes"));
        }
        let mut len_buf = vec![(plaintext.len() >> 8) as u8, (plaintext.len() & 0xff) as u8];
        let len_tag = self.inner.seal_in_place(&mut len_buf)?;

        let mut payload = plaintext.to_vec();
        let payload_tag = self.inner.seal_in_place(&mut payload)?;

        let mut out = BytesMut::with_capacity(len_buf.len() + 16 + payload.len() + 16);
        out.put_slice(&len_buf);
        out.put_slice(&len_tag);
        out.put_slice(&payload);
        out.put_slice(&payload_tag);
        Ok(out)
    }
}

pub struct AeadDecryptor {
    inner: Inner,
    buf: BytesMut,
    pending_len: Option<usize>,
}

impl AeadDecryptor {
    pub fn new(method: CryptoMethod, master_key: &[u8], salt: &[u8]) -> Result<Self> {
        let subkey = derive_subkey(method, master_key, salt)?;
        Ok(Self {
            inner: Inner::new(method, &subkey)?,
            buf: BytesMut::new(),
            pending_len: None,
        })
    }

    /// Feed newly-received ciphertext bytes in; any complete chunks are
    /// appended (decrypted) to `out`. Incomplete trailing bytes remain
    /// buffered for the next call.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.buf.extend_from_slice(data);
        loop {
            if self.pending_len.is_none() {
                if self.buf.len() < 2 + 16 {
                    return Ok(());
                }
                let mut len_ct = self.buf[..2].to_vec();
                let tag = self.buf[2..18].to_vec();
                self.inner.open_in_place(&mut len_ct, &tag)?;
                let len = ((len_ct[0] as usize) << 8) | len_ct[1] as usize;
                if len > MAX_CHUNK_SIZE {
                    return Err(Error::buffer_overflow("AEAD chunk length exceeds 0x3FFF"));
                }
                self.buf.advance(18);
                self.pending_len = Some(len);
            }
            let len = self.pending_len.unwrap();
            if self.buf.len() < len + 16 {
                return Ok(());
            }
            let mut payload = self.buf[..len].to_vec();
            let tag = self.buf[len..len + 16].to_vec();
            self.inner.open_in_place(&mut payload, &tag)?;
            self.buf.advance(len + 16);
            out.extend_from_slice(&payload);
            self.pending_len = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(method: CryptoMethod) {
        let master_key = vec![0x07u8; method.key_size()];
        let salt = vec![0x09u8; method.salt_size()];
        let mut enc = AeadEncryptor::new(method, &master_key, &salt).unwrap();
        let mut dec = AeadDecryptor::new(method, &master_key, &salt).unwrap();

        let chunks: Vec<&[u8]> = vec![b"hello", b"world, this is a longer chunk of plaintext"];
        let mut wire = BytesMut::new();
        for c in &chunks {
            wire.extend_from_slice(&enc.seal_chunk(c).unwrap());
        }

        let mut out = Vec::new();
        dec.feed(&wire, &mut out).unwrap();
        let expected: Vec<u8> = chunks.concat();
        assert_eq!(out, expected);
    }

    #[test]
    fn roundtrips_all_aead_methods() {
        for m in [
            CryptoMethod::Aes128Gcm,
            CryptoMethod::Aes192Gcm,
            CryptoMethod::Aes256Gcm,
            CryptoMethod::ChaCha20IetfPoly1305,
            CryptoMethod::XChaCha20IetfPoly1305,
        ] {
            roundtrip(m);
        }
    }

    #[test]
    fn feed_byte_at_a_time() {
        let method = CryptoMethod::Aes256Gcm;
        let master_key = vec![0x01u8; method.key_size()];
        let salt = vec![0x02u8; method.salt_size()];
        let mut enc = AeadEncryptor::new(method, &master_key, &salt).unwrap();
        let mut dec = AeadDecryptor::new(method, &master_key, &salt).unwrap();

        let wire = enc.seal_chunk(b"split across many reads").unwrap();
        let mut out = Vec::new();
        for byte in wire.iter() {
            dec.feed(&[*byte], &mut out).unwrap();
        }
        assert_eq!(out, b"split across many reads");
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let method = CryptoMethod::ChaCha20IetfPoly1305;
        let master_key = vec![0x03u8; method.key_size()];
        let salt = vec![0x04u8; method.salt_size()];
        let mut enc = AeadEncryptor::new(method, &master_key, &salt).unwrap();
        let mut dec = AeadDecryptor::new(method, &master_key, &salt).unwrap();

        let mut wire = enc.seal_chunk(b"payload").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        let mut out = Vec::new();
        assert!(dec.feed(&wire, &mut out).is_err());
    }
}
