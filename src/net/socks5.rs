//! SOCKS5 adapter (RFC 1928 method negotiation + RFC 1929 username/password
//! auth). Only the CONNECT command is supported; BIND and UDP ASSOCIATE
//! are out of scope.

use crate::common::endpoint::Endpoint;
use crate::common::error::{Error, Result};
use crate::net::{BoxedStream, EgressAdapter, IngressAdapter};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const VERSION: u8 = 0x05;
const METHOD_NONE: u8 = 0x00;
const METHOD_USERPASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const AUTH_VERSION: u8 = 0x01;
const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

#[derive(Clone)]
pub struct Socks5Auth {
    pub username: String,
    pub password: String,
}

pub struct Socks5Ingress {
    auth: Option<Socks5Auth>,
}

impl Socks5Ingress {
    pub fn new(auth: Option<Socks5Auth>) -> Self {
        Self { auth }
    }

    async fn negotiate_method(&self, stream: &mut BoxedStream) -> Result<()> {
        let version = stream.read_u8().await?;
        if version != VERSION {
            return Err(Error::bad_proto(format!("unsupported SOCKS version {}", version)));
        }
        let n = stream.read_u8().await? as usize;
        let mut methods = vec![0u8; n];
        stream.read_exact(&mut methods).await?;

        let wanted = if self.auth.is_some() {
            METHOD_USERPASS
        } else {
            METHOD_NONE
        };
        if !methods.contains(&wanted) {
            stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await?;
            return Err(Error::bad_auth_method("client offered no acceptable SOCKS5 auth method"));
        }
        stream.write_all(&[VERSION, wanted]).await?;

        if wanted == METHOD_USERPASS {
            self.negotiate_userpass(stream).await?;
        }
        Ok(())
    }

    async fn negotiate_userpass(&self, stream: &mut BoxedStream) -> Result<()> {
        let expected = self.auth.as_ref().unwrap();
        let ver = stream.read_u8().await?;
        if ver != AUTH_VERSION {
            return Err(Error::bad_proto("unsupported SOCKS5 auth subnegotiation version"));
        }
        let ulen = stream.read_u8().await? as usize;
        let mut user = vec![0u8; ulen];
        stream.read_exact(&mut user).await?;
        let plen = stream.read_u8().await? as usize;
        let mut pass = vec![0u8; plen];
        stream.read_exact(&mut pass).await?;

        let ok = user == expected.username.as_bytes() && pass == expected.password.as_bytes();
        stream
            .write_all(&[AUTH_VERSION, if ok { AUTH_SUCCESS } else { AUTH_FAILURE }])
            .await?;
        if ok {
            Ok(())
        } else {
            Err(Error::unauthenticated("bad SOCKS5 username/password"))
        }
    }
}

#[async_trait]
impl IngressAdapter for Socks5Ingress {
    async fn handshake(&self, stream: &mut BoxedStream) -> Result<(Endpoint, Vec<u8>)> {
        self.negotiate_method(stream).await?;

        let version = stream.read_u8().await?;
        if version != VERSION {
            return Err(Error::bad_proto("unsupported SOCKS version in request"));
        }
        let cmd = stream.read_u8().await?;
        let _rsv = stream.read_u8().await?;
        if cmd != CMD_CONNECT {
            reply(stream, REP_COMMAND_NOT_SUPPORTED).await?;
            return Err(Error::unsupported("only the SOCKS5 CONNECT command is supported"));
        }

        let endpoint = Endpoint::read_from(stream).await?;
        Ok((endpoint, Vec::new()))
    }

    async fn confirm(&self, stream: &mut BoxedStream) -> Result<()> {
        reply(stream, REP_SUCCESS).await
    }

    async fn report_failure(&self, stream: &mut BoxedStream, err: &Error) {
        let rep = match err {
            Error::Address(_) | Error::BadProto(_) => REP_ADDRESS_TYPE_NOT_SUPPORTED,
            Error::Unsupported(_) => REP_COMMAND_NOT_SUPPORTED,
            _ => REP_GENERAL_FAILURE,
        };
        let _ = reply(stream, rep).await;
    }
}

/// Write a fixed `0.0.0.0:0` bound address in the reply: clients don't
/// meaningfully validate it, and carrying the real locally-bound address
/// through would only couple this adapter to listener internals.
async fn reply(stream: &mut BoxedStream, rep: u8) -> Result<()> {
    stream
        .write_all(&[VERSION, rep, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

pub struct Socks5Egress {
    name: String,
    proxy_addr: String,
    auth: Option<Socks5Auth>,
}

impl Socks5Egress {
    pub fn new(name: impl Into<String>, proxy_addr: impl Into<String>, auth: Option<Socks5Auth>) -> Self {
        Self {
            name: name.into(),
            proxy_addr: proxy_addr.into(),
            auth,
        }
    }
}

#[async_trait]
impl EgressAdapter for Socks5Egress {
    async fn connect(&self, remote: &Endpoint) -> Result<BoxedStream> {
        let mut stream = tokio::net::TcpStream::connect(&self.proxy_addr)
            .await
            .map_err(|e| Error::conn_failure(format!("SOCKS5 proxy {}: {}", self.proxy_addr, e)))?;

        let method = if self.auth.is_some() { METHOD_USERPASS } else { METHOD_NONE };
        stream.write_all(&[VERSION, 1, method]).await?;
        let resp_version = stream.read_u8().await?;
        let resp_method = stream.read_u8().await?;
        if resp_version != VERSION || resp_method != method {
            return Err(Error::conn_failure("upstream SOCKS5 proxy rejected auth method"));
        }

        if method == METHOD_USERPASS {
            let auth = self.auth.as_ref().unwrap();
            let mut buf = vec![AUTH_VERSION, auth.username.len() as u8];
            buf.extend_from_slice(auth.username.as_bytes());
            buf.push(auth.password.len() as u8);
            buf.extend_from_slice(auth.password.as_bytes());
            stream.write_all(&buf).await?;
            let _ver = stream.read_u8().await?;
            let status = stream.read_u8().await?;
            if status != AUTH_SUCCESS {
                return Err(Error::unauthenticated("upstream SOCKS5 proxy rejected credentials"));
            }
        }

        stream.write_all(&[VERSION, CMD_CONNECT, 0x00]).await?;
        let mut endpoint_buf = bytes::BytesMut::new();
        remote.encode(&mut endpoint_buf)?;
        stream.write_all(&endpoint_buf).await?;

        let resp_version = stream.read_u8().await?;
        let rep = stream.read_u8().await?;
        let _rsv = stream.read_u8().await?;
        if resp_version != VERSION {
            return Err(Error::bad_proto("bad SOCKS5 reply version"));
        }
        // Consume and discard the bound address field.
        let _bound = Endpoint::read_from(&mut stream).await?;
        if rep != REP_SUCCESS {
            return Err(Error::conn_failure(format!("upstream SOCKS5 proxy returned REP=0x{:02x}", rep)));
        }
        Ok(Box::new(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_rfc1928() {
        assert_eq!(VERSION, 0x05);
        assert_eq!(CMD_CONNECT, 0x01);
        assert_eq!(METHOD_NO_ACCEPTABLE, 0xff);
    }
}
