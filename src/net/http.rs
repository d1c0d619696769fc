//! HTTP proxy adapter. Ingress accepts either `CONNECT host:port HTTP/1.1`
//! (tunnel mode) or a plain relay request with an absolute-URI
//! (`GET http://host/path HTTP/1.1`), consistent with RFC 7230 §5.3.2:
//! a request-target with an absolute URI always takes priority over any
//! `Host` header when both are present. Hop-by-hop headers are stripped
//! before the (possibly rewritten) request is replayed to the egress.

use crate::common::endpoint::Endpoint;
use crate::common::error::{Error, Result};
use crate::net::{BoxedStream, EgressAdapter, IngressAdapter};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[derive(Clone)]
pub struct HttpAuth {
    pub username: String,
    pub password: String,
}

pub struct HttpIngress {
    auth: Option<HttpAuth>,
}

impl HttpIngress {
    pub fn new(auth: Option<HttpAuth>) -> Self {
        Self { auth }
    }

    fn check_auth(&self, headers: &[httparse::Header]) -> Result<()> {
        let Some(expected) = &self.auth else {
            return Ok(());
        };
        let header = headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("proxy-authorization"))
            .ok_or_else(|| Error::bad_auth_method("missing Proxy-Authorization"))?;
        let value = std::str::from_utf8(header.value)
            .map_err(|_| Error::bad_proto("non-UTF8 Proxy-Authorization"))?;
        let encoded = value
            .strip_prefix("Basic ")
            .ok_or_else(|| Error::bad_auth_method("only Basic auth is supported"))?;
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|_| Error::bad_proto("malformed base64 credentials"))?;
        let decoded =
            String::from_utf8(decoded).map_err(|_| Error::bad_proto("non-UTF8 credentials"))?;
        let (user, pass) = decoded
            .split_once(':')
            .ok_or_else(|| Error::bad_proto("malformed credentials"))?;
        if user == expected.username && pass == expected.password {
            Ok(())
        } else {
            Err(Error::unauthenticated("bad HTTP proxy credentials"))
        }
    }
}

async fn read_request_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::bad_proto("client closed before sending a request"));
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            return Ok(buf);
        }
        if buf.len() > 64 * 1024 {
            return Err(Error::buffer_overflow("HTTP request head too large"));
        }
    }
}

pub fn parse_host_port(host_port: &str, default_port: u16) -> Result<Endpoint> {
    let (host, port) = match host_port.rsplit_once(':') {
        Some((h, p)) => (h, p.parse::<u16>().map_err(|_| Error::bad_proto("bad port"))?),
        None => (host_port, default_port),
    };
    if host.is_empty() {
        return Err(Error::misc("empty host"));
    }
    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse() {
        Ok(Endpoint::Ip(ip, port))
    } else {
        Ok(Endpoint::Domain(host.to_string(), port))
    }
}

#[async_trait]
impl IngressAdapter for HttpIngress {
    async fn handshake(&self, stream: &mut BoxedStream) -> Result<(Endpoint, Vec<u8>)> {
        let head = read_request_head(stream).await?;

        let mut headers_buf = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers_buf);
        let status = req
            .parse(&head)
            .map_err(|e| Error::bad_proto(format!("malformed HTTP request: {}", e)))?;
        if status.is_partial() {
            return Err(Error::bad_proto("incomplete HTTP request"));
        }

        self.check_auth(req.headers)?;

        let method = req.method.ok_or_else(|| Error::bad_proto("missing method"))?;
        let target = req.path.ok_or_else(|| Error::bad_proto("missing request target"))?;

        if method.eq_ignore_ascii_case("CONNECT") {
            let endpoint = parse_host_port(target, 443)?;
            return Ok((endpoint, Vec::new()));
        }

        // Relay mode: an absolute-URI target takes priority over Host.
        if let Some(rest) = target.strip_prefix("http://") {
            let (host_port, path) = rest.split_once('/').unwrap_or((rest, ""));
            let endpoint = parse_host_port(host_port, 80)?;
            // An Upgrade request (e.g. WebSocket) needs its Connection/Upgrade
            // headers relayed through untouched; forcing `close` on it would
            // break the upgrade.
            let has_upgrade = req.headers.iter().any(|h| h.name.eq_ignore_ascii_case("upgrade"));
            let mut rewritten = format!("{} /{} HTTP/1.1\r\n", method, path);
            let mut has_host = false;
            for h in req.headers.iter() {
                let keep_for_upgrade = has_upgrade
                    && (h.name.eq_ignore_ascii_case("connection") || h.name.eq_ignore_ascii_case("upgrade"));
                if is_hop_by_hop(h.name) && !keep_for_upgrade {
                    continue;
                }
                if h.name.eq_ignore_ascii_case("host") {
                    has_host = true;
                }
                rewritten.push_str(h.name);
                rewritten.push_str(": ");
                rewritten.push_str(std::str::from_utf8(h.value).unwrap_or(""));
                rewritten.push_str("\r\n");
            }
            if !has_host {
                rewritten.push_str(&format!("Host: {}\r\n", host_port));
            }
            if !has_upgrade {
                rewritten.push_str("Connection: close\r\n");
                rewritten.push_str("Proxy-Connection: close\r\n");
            }
            rewritten.push_str("\r\n");
            return Ok((endpoint, rewritten.into_bytes()));
        }

        Err(Error::bad_proto(
            "relay requests must use an absolute-URI target",
        ))
    }

    async fn confirm(&self, stream: &mut BoxedStream) -> Result<()> {
        // CONNECT is the only mode that needs an explicit confirmation;
        // relay mode's prelude already carried the rewritten request, and
        // the egress's own response is what the client sees.
        stream
            .write_all(b"HTTP/1.1 200 Connection Established\r\nConnection: close\r\nProxy-Connection: close\r\n\r\n")
            .await?;
        Ok(())
    }

    async fn report_failure(&self, stream: &mut BoxedStream, err: &Error) {
        let (status, text) = match err {
            Error::BadAuthMethod(_) => (407, "Proxy Authentication Required"),
            Error::Unauthenticated(_) => (407, "Proxy Authentication Required"),
            Error::ConnFailure(_) => (504, "Gateway Timeout"),
            Error::BadProto(_) | Error::Misc(_) => (400, "Bad Request"),
            _ => (500, "Internal Server Error"),
        };
        let extra = if status == 407 {
            "WWW-Authenticate: Basic realm=\"proxy\"\r\n"
        } else {
            ""
        };
        let _ = stream
            .write_all(
                format!(
                    "HTTP/1.1 {status} {text}\r\n{extra}Connection: close\r\n\r\n"
                )
                .as_bytes(),
            )
            .await;
    }
}

/// Originates connections by tunneling through an upstream HTTP proxy via
/// CONNECT.
pub struct HttpEgress {
    name: String,
    proxy_addr: String,
    auth: Option<HttpAuth>,
    tls: bool,
    sni: String,
    skip_cert_verify: bool,
}

impl HttpEgress {
    pub fn new(
        name: impl Into<String>,
        proxy_addr: impl Into<String>,
        auth: Option<HttpAuth>,
        tls: bool,
        sni: impl Into<String>,
        skip_cert_verify: bool,
    ) -> Self {
        Self {
            name: name.into(),
            proxy_addr: proxy_addr.into(),
            auth,
            tls,
            sni: sni.into(),
            skip_cert_verify,
        }
    }
}

#[async_trait]
impl EgressAdapter for HttpEgress {
    async fn connect(&self, remote: &Endpoint) -> Result<BoxedStream> {
        let tcp = tokio::net::TcpStream::connect(&self.proxy_addr)
            .await
            .map_err(|e| Error::conn_failure(format!("HTTP proxy {}: {}", self.proxy_addr, e)))?;

        let mut stream: BoxedStream = if self.tls {
            let cfg = crate::net::tls::client_config(self.skip_cert_verify);
            Box::new(crate::net::tls::connect_client(tcp, &self.sni, cfg).await?)
        } else {
            Box::new(tcp)
        };

        let mut req = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", remote, remote);
        if let Some(auth) = &self.auth {
            let token = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
            req.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
        }
        req.push_str("Proxy-Connection: keep-alive\r\n\r\n");
        stream.write_all(req.as_bytes()).await?;

        let head = read_request_head(&mut stream).await?;
        let mut headers_buf = [httparse::EMPTY_HEADER; 32];
        let mut resp = httparse::Response::new(&mut headers_buf);
        resp.parse(&head)
            .map_err(|e| Error::bad_proto(format!("malformed CONNECT response: {}", e)))?;
        match resp.code {
            Some(200) => Ok(stream),
            Some(code) => Err(Error::conn_failure(format!(
                "upstream HTTP proxy returned {}",
                code
            ))),
            None => Err(Error::bad_proto("incomplete CONNECT response")),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_with_default() {
        let ep = parse_host_port("example.com", 443).unwrap();
        assert_eq!(ep, Endpoint::Domain("example.com".into(), 443));
    }

    #[test]
    fn parses_host_port_with_explicit_port() {
        let ep = parse_host_port("example.com:8080", 443).unwrap();
        assert_eq!(ep, Endpoint::Domain("example.com".into(), 8080));
    }

    #[test]
    fn parses_ipv6_host() {
        let ep = parse_host_port("[::1]:8080", 443).unwrap();
        assert_eq!(ep, Endpoint::Ip("::1".parse().unwrap(), 8080));
    }

    #[test]
    fn hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("Proxy-Authorization"));
        assert!(!is_hop_by_hop("Host"));
    }
}
