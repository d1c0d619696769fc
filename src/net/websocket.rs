//! A minimal RFC 6455 WebSocket layer used as an optional composable
//! stream wrapper: handshakes over an existing (possibly TLS-wrapped)
//! stream, then frames/deframes binary messages so the byte-oriented
//! relay above it never has to know WebSocket framing exists.
//!
//! Only binary data frames are relayed; ping/pong/close control frames
//! are recognized but not specially handled beyond terminating the
//! stream on Close.

use crate::common::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const OP_CONTINUATION: u8 = 0x0;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn random_key() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    STANDARD.encode(raw)
}

/// Perform the client-side opening handshake: send the GET Upgrade
/// request and verify the server's 101 response.
pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    path: &str,
) -> Result<()> {
    let key = random_key();
    let req = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(req.as_bytes()).await?;

    let response = read_http_head(stream).await?;
    if !response.starts_with("HTTP/1.1 101") && !response.starts_with("HTTP/1.0 101") {
        return Err(Error::protocol(format!(
            "WebSocket upgrade rejected: {}",
            response.lines().next().unwrap_or("")
        )));
    }
    let expected = accept_key(&key);
    let accept_line = response
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("sec-websocket-accept:"))
        .ok_or_else(|| Error::protocol("missing Sec-WebSocket-Accept"))?;
    let got = accept_line.splitn(2, ':').nth(1).unwrap_or("").trim();
    if got != expected {
        return Err(Error::protocol("Sec-WebSocket-Accept mismatch"));
    }
    Ok(())
}

/// Perform the server-side opening handshake: parse the client's GET
/// request and answer with 101.
pub async fn server_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    let request = read_http_head(stream).await?;
    let key_line = request
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("sec-websocket-key:"))
        .ok_or_else(|| Error::bad_proto("missing Sec-WebSocket-Key"))?;
    let key = key_line.splitn(2, ':').nth(1).unwrap_or("").trim();
    let accept = accept_key(key);
    let resp = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    stream.write_all(resp.as_bytes()).await?;
    Ok(())
}

async fn read_http_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::bad_proto("connection closed during WebSocket handshake"));
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > 16 * 1024 {
            return Err(Error::buffer_overflow("WebSocket handshake head too large"));
        }
    }
    String::from_utf8(buf).map_err(|_| Error::bad_proto("handshake head is not valid UTF-8"))
}

/// Wraps a stream with RFC 6455 framing. `masked` selects client-side
/// (masked outgoing frames) vs. server-side (unmasked outgoing frames)
/// behavior.
pub struct WsStream<S> {
    inner: S,
    masked: bool,
    read_raw: BytesMut,
    decoded: BytesMut,
    write_pending: BytesMut,
    closed: bool,
}

impl<S> WsStream<S> {
    pub fn new(inner: S, masked: bool) -> Self {
        Self {
            inner,
            masked,
            read_raw: BytesMut::new(),
            decoded: BytesMut::new(),
            write_pending: BytesMut::new(),
            closed: false,
        }
    }
}

/// Attempt to parse one complete frame from `buf`, returning
/// `(opcode, payload)` and advancing `buf` past it. Returns `None` if the
/// buffer doesn't yet hold a whole frame.
fn try_parse_frame(buf: &mut BytesMut) -> Option<(u8, Vec<u8>)> {
    if buf.len() < 2 {
        return None;
    }
    let b0 = buf[0];
    let b1 = buf[1];
    let opcode = b0 & 0x0f;
    let masked = b1 & 0x80 != 0;
    let mut len = (b1 & 0x7f) as u64;
    let mut pos = 2usize;

    if len == 126 {
        if buf.len() < pos + 2 {
            return None;
        }
        len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as u64;
        pos += 2;
    } else if len == 127 {
        if buf.len() < pos + 8 {
            return None;
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[pos..pos + 8]);
        len = u64::from_be_bytes(raw);
        pos += 8;
    }

    let mask_key = if masked {
        if buf.len() < pos + 4 {
            return None;
        }
        let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
        pos += 4;
        Some(key)
    } else {
        None
    };

    let total = pos + len as usize;
    if buf.len() < total {
        return None;
    }

    let mut payload = buf[pos..total].to_vec();
    if let Some(key) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }
    buf.advance(total);
    Some((opcode, payload))
}

fn encode_frame(opcode: u8, payload: &[u8], masked: bool, out: &mut BytesMut) {
    out.put_u8(0x80 | opcode); // FIN=1
    let mask_bit = if masked { 0x80 } else { 0x00 };
    if payload.len() < 126 {
        out.put_u8(mask_bit | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.put_u8(mask_bit | 126);
        out.put_u16(payload.len() as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(payload.len() as u64);
    }
    if masked {
        let mut key = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut key);
        out.put_slice(&key);
        let start = out.len();
        out.put_slice(payload);
        for (i, byte) in out[start..].iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    } else {
        out.put_slice(payload);
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for WsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.decoded.is_empty() {
                let n = this.decoded.len().min(buf.remaining());
                buf.put_slice(&this.decoded[..n]);
                this.decoded.advance(n);
                return Poll::Ready(Ok(()));
            }
            if this.closed {
                return Poll::Ready(Ok(()));
            }

            // Try to parse whatever raw bytes we already have first.
            while let Some((opcode, payload)) = try_parse_frame(&mut this.read_raw) {
                match opcode {
                    OP_BINARY | OP_CONTINUATION => this.decoded.put_slice(&payload),
                    OP_CLOSE => {
                        this.closed = true;
                        break;
                    }
                    OP_PING | OP_PONG => {}
                    _ => {}
                }
            }
            if !this.decoded.is_empty() || this.closed {
                continue;
            }

            let mut tmp = [0u8; 4096];
            let mut read_buf = ReadBuf::new(&mut tmp);
            match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let n = read_buf.filled().len();
                    if n == 0 {
                        this.closed = true;
                        continue;
                    }
                    this.read_raw.extend_from_slice(read_buf.filled());
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for WsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        encode_frame(OP_BINARY, buf, this.masked, &mut this.write_pending);
        match drain_pending(&mut this.inner, &mut this.write_pending, cx) {
            Poll::Ready(Ok(())) | Poll::Pending => Poll::Ready(Ok(buf.len())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match drain_pending(&mut this.inner, &mut this.write_pending, cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match drain_pending(&mut this.inner, &mut this.write_pending, cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_shutdown(cx),
            other => other,
        }
    }
}

fn drain_pending<S: AsyncWrite + Unpin>(
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip_unmasked() {
        let mut out = BytesMut::new();
        encode_frame(OP_BINARY, b"hello world", false, &mut out);
        let (opcode, payload) = try_parse_frame(&mut out).unwrap();
        assert_eq!(opcode, OP_BINARY);
        assert_eq!(payload, b"hello world");
        assert!(out.is_empty());
    }

    #[test]
    fn frame_roundtrip_masked() {
        let mut out = BytesMut::new();
        encode_frame(OP_BINARY, b"client payload", true, &mut out);
        let (opcode, payload) = try_parse_frame(&mut out).unwrap();
        assert_eq!(opcode, OP_BINARY);
        assert_eq!(payload, b"client payload");
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut out = BytesMut::new();
        encode_frame(OP_BINARY, b"truncated", false, &mut out);
        out.truncate(out.len() - 1);
        assert!(try_parse_frame(&mut out).is_none());
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        // RFC 6455 section 1.3 worked example.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
