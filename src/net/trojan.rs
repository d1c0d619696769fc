//! Trojan adapter: the wire format deliberately looks like nothing at all
//! until the password hash checks out — `hex(SHA224(password)) CRLF CMD
//! ADDR CRLF payload`, CMD/ADDR sharing the SOCKS5 address encoding. A
//! client that gets the hash wrong is never told so; fallback is to
//! splice the connection to a masquerade site instead, since replying
//! with anything protocol-specific is itself a probing oracle.

use crate::common::endpoint::Endpoint;
use crate::common::error::{Error, Result};
use crate::crypto::hash::sha224_hex;
use crate::net::{BoxedStream, EgressAdapter, IngressAdapter};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const CMD_CONNECT: u8 = 0x01;
const HASH_HEX_LEN: usize = 56;

pub struct TrojanIngress {
    password_hash: String,
    fallback: Endpoint,
}

impl TrojanIngress {
    pub fn new(password: &str, fallback: Endpoint) -> Self {
        Self {
            password_hash: sha224_hex(password.as_bytes()),
            fallback,
        }
    }
}

#[async_trait]
impl IngressAdapter for TrojanIngress {
    async fn handshake(&self, stream: &mut BoxedStream) -> Result<(Endpoint, Vec<u8>)> {
        let mut header = vec![0u8; HASH_HEX_LEN + 2];
        stream.read_exact(&mut header).await?;

        let hash_matches = header[..HASH_HEX_LEN] == *self.password_hash.as_bytes()
            && &header[HASH_HEX_LEN..] == b"\r\n";

        if !hash_matches {
            // Masquerade: replay exactly what we read, unmodified, to the
            // fallback site and let the session treat this connection as
            // a perfectly ordinary one to that destination.
            return Ok((self.fallback.clone(), header));
        }

        let cmd = stream.read_u8().await?;
        if cmd != CMD_CONNECT {
            return Err(Error::unsupported("only the trojan CONNECT command is supported"));
        }
        let endpoint = Endpoint::read_from(stream).await?;
        let mut crlf = [0u8; 2];
        stream.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(Error::bad_proto("missing CRLF after trojan request"));
        }
        Ok((endpoint, Vec::new()))
    }

    async fn confirm(&self, _stream: &mut BoxedStream) -> Result<()> {
        // No acknowledgement in the trojan protocol; relaying starts
        // immediately and the egress's bytes are the confirmation.
        Ok(())
    }

    async fn report_failure(&self, _stream: &mut BoxedStream, _err: &Error) {
        // Silence on failure is the point: anything else would let a
        // prober distinguish "routing failed" from "bad password".
    }
}

pub struct TrojanEgress {
    name: String,
    server_addr: String,
    password_hash: String,
    sni: String,
    skip_cert_verify: bool,
}

impl TrojanEgress {
    pub fn new(
        name: impl Into<String>,
        server_addr: impl Into<String>,
        password: &str,
        sni: impl Into<String>,
        skip_cert_verify: bool,
    ) -> Self {
        Self {
            name: name.into(),
            server_addr: server_addr.into(),
            password_hash: sha224_hex(password.as_bytes()),
            sni: sni.into(),
            skip_cert_verify,
        }
    }
}

#[async_trait]
impl EgressAdapter for TrojanEgress {
    async fn connect(&self, remote: &Endpoint) -> Result<BoxedStream> {
        let tcp = TcpStream::connect(&self.server_addr)
            .await
            .map_err(|e| Error::conn_failure(format!("trojan server {}: {}", self.server_addr, e)))?;
        let tls_config = crate::net::tls::client_config(self.skip_cert_verify);
        let mut stream = crate::net::tls::connect_client(tcp, &self.sni, tls_config).await?;

        let mut request = Vec::with_capacity(HASH_HEX_LEN + 2 + 1 + 32);
        request.extend_from_slice(self.password_hash.as_bytes());
        request.extend_from_slice(b"\r\n");
        request.push(CMD_CONNECT);
        let mut addr_buf = bytes::BytesMut::new();
        remote.encode(&mut addr_buf)?;
        request.extend_from_slice(&addr_buf);
        request.extend_from_slice(b"\r\n");

        stream.write_all(&request).await?;
        Ok(Box::new(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn handshake_accepts_correct_password() {
        let ingress = TrojanIngress::new("hunter2", Endpoint::Domain("example.com".into(), 80));
        let (mut client, server) = duplex(4096);
        let mut boxed: BoxedStream = Box::new(server);

        let hash = sha224_hex(b"hunter2");
        let mut req = Vec::new();
        req.extend_from_slice(hash.as_bytes());
        req.extend_from_slice(b"\r\n");
        req.push(CMD_CONNECT);
        let mut addr = bytes::BytesMut::new();
        Endpoint::Domain("target.test".into(), 443).encode(&mut addr).unwrap();
        req.extend_from_slice(&addr);
        req.extend_from_slice(b"\r\n");
        client.write_all(&req).await.unwrap();

        let (endpoint, prelude) = ingress.handshake(&mut boxed).await.unwrap();
        assert_eq!(endpoint, Endpoint::Domain("target.test".into(), 443));
        assert!(prelude.is_empty());
    }

    #[tokio::test]
    async fn handshake_falls_back_on_bad_password() {
        let fallback = Endpoint::Domain("masquerade.example".into(), 443);
        let ingress = TrojanIngress::new("hunter2", fallback.clone());
        let (mut client, server) = duplex(4096);
        let mut boxed: BoxedStream = Box::new(server);

        let mut req = vec![b'0'; HASH_HEX_LEN];
        req.extend_from_slice(b"\r\n");
        client.write_all(&req).await.unwrap();

        let (endpoint, prelude) = ingress.handshake(&mut boxed).await.unwrap();
        assert_eq!(endpoint, fallback);
        assert_eq!(prelude, req);
    }
}
