//! Shadowsocks adapter: the entire protocol is "prepend an IV/salt, then
//! everything after is the destination endpoint followed by payload, all
//! run through the stream or AEAD cipher." Because of that, the cleanest
//! way to express it is a stream wrapper (`ShadowsocksStream`) that makes
//! encryption transparent to whatever reads/writes through it — the
//! ingress/egress adapters below just read an `Endpoint` off the front of
//! an already-decrypting stream.

use crate::common::endpoint::Endpoint;
use crate::common::error::{Error, Result};
use crate::crypto::aead::{AeadDecryptor, AeadEncryptor, MAX_CHUNK_SIZE};
use crate::crypto::keys::generate_key;
use crate::crypto::method::CryptoMethod;
use crate::crypto::stream::{StreamDecryptor, StreamEncryptor};
use crate::net::{BoxedStream, EgressAdapter, IngressAdapter};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use rand::RngCore;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

enum ReadCrypto {
    Stream(StreamDecryptor),
    Aead(AeadDecryptor),
}

enum WriteCrypto {
    Stream(StreamEncryptor),
    Aead(AeadEncryptor),
}

/// A stream that transparently decrypts everything read from `inner` and
/// encrypts everything written to it. The leading IV/salt is handled once,
/// lazily, on first use in each direction.
pub struct ShadowsocksStream<S> {
    inner: S,
    method: CryptoMethod,
    master_key: Vec<u8>,

    read_leading: BytesMut,
    read_crypto: Option<ReadCrypto>,
    decoded: BytesMut,

    write_crypto: Option<WriteCrypto>,
    write_pending: BytesMut,
}

impl<S> ShadowsocksStream<S> {
    pub fn new(inner: S, method: CryptoMethod, master_key: Vec<u8>) -> Self {
        Self {
            inner,
            method,
            master_key,
            read_leading: BytesMut::new(),
            read_crypto: None,
            decoded: BytesMut::new(),
            write_crypto: None,
            write_pending: BytesMut::new(),
        }
    }

    /// Build a stream whose read side has already consumed its IV/salt
    /// (the caller read it off the wire itself, e.g. to check it against
    /// the replay cache before any decryption happens).
    fn with_leading_consumed(
        inner: S,
        method: CryptoMethod,
        master_key: Vec<u8>,
        leading: &[u8],
    ) -> Result<Self> {
        let read_crypto = if method.is_aead() {
            ReadCrypto::Aead(AeadDecryptor::new(method, &master_key, leading)?)
        } else {
            ReadCrypto::Stream(StreamDecryptor::new(method, &master_key, leading)?)
        };
        Ok(Self {
            inner,
            method,
            master_key,
            read_leading: BytesMut::new(),
            read_crypto: Some(read_crypto),
            decoded: BytesMut::new(),
            write_crypto: None,
            write_pending: BytesMut::new(),
        })
    }
}

fn drain<S: AsyncWrite + Unpin>(
    inner: &mut S,
    pending: &mut BytesMut,
    cx: &mut Context<'_>,
) -> Poll<io::Result<()>> {
    while !pending.is_empty() {
        match Pin::new(&mut *inner).poll_write(cx, pending) {
            Poll::Ready(Ok(0)) => {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::WriteZero, "write zero")))
            }
            Poll::Ready(Ok(n)) => pending.advance(n),
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }
    }
    Poll::Ready(Ok(()))
}

impl<S: AsyncRead + Unpin> AsyncRead for ShadowsocksStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.read_crypto.is_none() {
            let needed = this.method.leading_size();
            while this.read_leading.len() < needed {
                let mut tmp = [0u8; 64];
                let want = (needed - this.read_leading.len()).min(tmp.len());
                let mut rb = ReadBuf::new(&mut tmp[..want]);
                match Pin::new(&mut this.inner).poll_read(cx, &mut rb) {
                    Poll::Ready(Ok(())) => {
                        if rb.filled().is_empty() {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "eof while reading shadowsocks iv/salt",
                            )));
                        }
                        this.read_leading.extend_from_slice(rb.filled());
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            let leading = this.read_leading.split_to(needed);
            let crypto = if this.method.is_aead() {
                let dec =
                    AeadDecryptor::new(this.method, &this.master_key, &leading).map_err(to_io)?;
                ReadCrypto::Aead(dec)
            } else {
                let dec =
                    StreamDecryptor::new(this.method, &this.master_key, &leading).map_err(to_io)?;
                ReadCrypto::Stream(dec)
            };
            this.read_crypto = Some(crypto);
        }

        loop {
            if !this.decoded.is_empty() {
                let n = this.decoded.len().min(buf.remaining());
                buf.put_slice(&this.decoded[..n]);
                this.decoded.advance(n);
                return Poll::Ready(Ok(()));
            }

            let mut tmp = [0u8; 16 * 1024];
            let mut rb = ReadBuf::new(&mut tmp);
            match Pin::new(&mut this.inner).poll_read(cx, &mut rb) {
                Poll::Ready(Ok(())) => {
                    let raw = rb.filled();
                    if raw.is_empty() {
                        return Poll::Ready(Ok(()));
                    }
                    match this.read_crypto.as_mut().unwrap() {
                        ReadCrypto::Stream(dec) => {
                            let mut owned = raw.to_vec();
                            dec.decrypt(&mut owned);
                            this.decoded.extend_from_slice(&owned);
                        }
                        ReadCrypto::Aead(dec) => {
                            let mut out = Vec::new();
                            dec.feed(raw, &mut out).map_err(to_io)?;
                            this.decoded.extend_from_slice(&out);
                        }
                    }
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ShadowsocksStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.write_crypto.is_none() {
            let mut leading = vec![0u8; this.method.leading_size()];
            rand::thread_rng().fill_bytes(&mut leading);
            let crypto = if this.method.is_aead() {
                WriteCrypto::Aead(
                    AeadEncryptor::new(this.method, &this.master_key, &leading).map_err(to_io)?,
                )
            } else {
                WriteCrypto::Stream(
                    StreamEncryptor::new(this.method, &this.master_key, &leading).map_err(to_io)?,
                )
            };
            this.write_pending.extend_from_slice(&leading);
            this.write_crypto = Some(crypto);
        }

        match this.write_crypto.as_mut().unwrap() {
            WriteCrypto::Stream(enc) => {
                let mut owned = buf.to_vec();
                enc.encrypt(&mut owned);
                this.write_pending.extend_from_slice(&owned);
            }
            WriteCrypto::Aead(enc) => {
                for chunk in buf.chunks(MAX_CHUNK_SIZE) {
                    let frame = enc.seal_chunk(chunk).map_err(to_io)?;
                    this.write_pending.extend_from_slice(&frame);
                }
            }
        }

        match drain(&mut this.inner, &mut this.write_pending, cx) {
            Poll::Ready(Ok(())) | Poll::Pending => Poll::Ready(Ok(buf.len())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match drain(&mut this.inner, &mut this.write_pending, cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match drain(&mut this.inner, &mut this.write_pending, cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_shutdown(cx),
            other => other,
        }
    }
}

fn to_io(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

pub struct ShadowsocksIngress {
    method: CryptoMethod,
    master_key: Vec<u8>,
    replay_cache: Arc<crate::replay::ReplayCache>,
}

impl ShadowsocksIngress {
    pub fn new(
        method: CryptoMethod,
        password: &str,
        replay_cache: Arc<crate::replay::ReplayCache>,
    ) -> Self {
        Self {
            method,
            master_key: generate_key(password.as_bytes(), method.key_size()),
            replay_cache,
        }
    }
}

#[async_trait]
impl IngressAdapter for ShadowsocksIngress {
    async fn handshake(&self, stream: &mut BoxedStream) -> Result<(Endpoint, Vec<u8>)> {
        let leading_size = self.method.leading_size();
        let mut leading = vec![0u8; leading_size];
        stream.read_exact(&mut leading).await?;

        if !self.replay_cache.check_and_insert(&leading) {
            return Err(Error::replayed("duplicate shadowsocks IV"));
        }

        let raw = std::mem::replace(stream, Box::new(tokio::io::empty()));
        let mut ss = ShadowsocksStream::with_leading_consumed(
            raw,
            self.method,
            self.master_key.clone(),
            &leading,
        )?;
        let endpoint = Endpoint::read_from(&mut ss).await?;
        *stream = Box::new(ss);
        Ok((endpoint, Vec::new()))
    }

    async fn confirm(&self, _stream: &mut BoxedStream) -> Result<()> {
        // Shadowsocks has no success acknowledgement; the first relayed
        // bytes from the egress are the confirmation.
        Ok(())
    }

    async fn report_failure(&self, _stream: &mut BoxedStream, _err: &Error) {
        // Nothing protocol-specific to send; the connection is simply
        // dropped by the caller.
    }
}

pub struct ShadowsocksEgress {
    name: String,
    server_addr: String,
    method: CryptoMethod,
    master_key: Vec<u8>,
}

impl ShadowsocksEgress {
    pub fn new(
        name: impl Into<String>,
        server_addr: impl Into<String>,
        method: CryptoMethod,
        password: &str,
    ) -> Self {
        Self {
            name: name.into(),
            server_addr: server_addr.into(),
            method,
            master_key: generate_key(password.as_bytes(), method.key_size()),
        }
    }
}

#[async_trait]
impl EgressAdapter for ShadowsocksEgress {
    async fn connect(&self, remote: &Endpoint) -> Result<BoxedStream> {
        let addr: SocketAddr = self.server_addr.parse().map_err(|_| {
            Error::config(format!("bad shadowsocks server address: {}", self.server_addr))
        })?;
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::conn_failure(format!("shadowsocks server {}: {}", addr, e)))?;
        let mut ss = ShadowsocksStream::new(tcp, self.method, self.master_key.clone());
        let mut header = BytesMut::new();
        remote.encode(&mut header)?;
        ss.write_all(&header).await?;
        Ok(Box::new(ss))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayCache;
    use tokio::io::duplex;

    #[tokio::test]
    async fn stream_cipher_roundtrip_through_wrapper() {
        let (client, server) = duplex(4096);
        let method = CryptoMethod::Aes256Ctr;
        let key = generate_key(b"hunter2", method.key_size());

        let mut client_ss = ShadowsocksStream::new(client, method, key.clone());
        let mut server_ss = ShadowsocksStream::new(server, method, key);

        client_ss.write_all(b"hello shadowsocks").await.unwrap();
        client_ss.flush().await.unwrap();

        let mut buf = vec![0u8; 17];
        server_ss.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello shadowsocks");
    }

    #[tokio::test]
    async fn aead_roundtrip_through_wrapper() {
        let (client, server) = duplex(4096);
        let method = CryptoMethod::Aes256Gcm;
        let key = generate_key(b"hunter2", method.key_size());

        let mut client_ss = ShadowsocksStream::new(client, method, key.clone());
        let mut server_ss = ShadowsocksStream::new(server, method, key);

        client_ss.write_all(b"aead payload").await.unwrap();
        client_ss.flush().await.unwrap();

        let mut buf = vec![0u8; 12];
        server_ss.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"aead payload");
    }

    #[test]
    fn replay_cache_rejects_duplicate_iv() {
        let cache = ReplayCache::new();
        let leading = vec![7u8; CryptoMethod::Aes128Ctr.leading_size()];
        assert!(cache.check_and_insert(&leading));
        assert!(!cache.check_and_insert(&leading));
    }
}
