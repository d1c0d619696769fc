//! Protocol adapters: one module per wire protocol, each providing an
//! ingress side (terminate the protocol, hand back the requested
//! destination) and/or an egress side (originate the protocol towards a
//! remote server).

pub mod direct;
pub mod http;
pub mod reject;
pub mod shadowsocks;
pub mod socks5;
pub mod tls;
pub mod trojan;
pub mod tunnel;
pub mod websocket;

use crate::common::error::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any half-duplex byte stream an adapter can terminate or originate:
/// a bare `TcpStream`, or one wrapped in TLS and/or WebSocket framing.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// An ingress protocol terminator: given an accepted client stream, read
/// whatever handshake that protocol requires, and return the stream
/// (ready to relay, having already confirmed success to the client once
/// the egress connects) plus the endpoint the client asked for.
#[async_trait]
pub trait IngressAdapter: Send + Sync {
    /// Parse the client's handshake up to (but not including) confirming
    /// success, returning the requested destination and any bytes that
    /// must be replayed to the egress stream before client traffic
    /// starts flowing (non-empty only for HTTP relay mode, where the
    /// rewritten request line/headers are themselves the first thing the
    /// upstream needs to see).
    async fn handshake(&self, stream: &mut BoxedStream) -> Result<(crate::common::Endpoint, Vec<u8>)>;

    /// Tell the client the connection to its destination succeeded.
    async fn confirm(&self, stream: &mut BoxedStream) -> Result<()>;

    /// Tell the client the connection failed, using whatever status
    /// encoding the protocol defines.
    async fn report_failure(&self, stream: &mut BoxedStream, err: &crate::common::Error);
}

/// An egress protocol originator: dial the remote server (directly, or
/// through a relay protocol) and return a stream ready to carry the
/// client's bytes to `remote`.
#[async_trait]
pub trait EgressAdapter: Send + Sync {
    async fn connect(&self, remote: &crate::common::Endpoint) -> Result<BoxedStream>;

    fn name(&self) -> &str;
}

/// Build the concrete egress adapter a `RouteVO`/`EgressVO` describes.
/// Constructed fresh per connection: egress adapters hold no state beyond
/// their static configuration, so there is no cost to not caching them.
pub fn build_egress(
    vo: &crate::config::EgressVO,
    resolver: std::sync::Arc<crate::dns::Resolver>,
) -> Result<Box<dyn EgressAdapter>> {
    use crate::config::EgressVO::*;
    use crate::crypto::method::CryptoMethod;
    use std::str::FromStr;

    Ok(match vo {
        Direct { name } => Box::new(direct::DirectEgress::new(name.clone(), resolver)),
        Reject { name, delay_ms } => match delay_ms {
            Some(ms) => Box::new(reject::RejectEgress::with_random_delay(
                name.clone(),
                std::time::Duration::from_millis(*ms),
            )),
            None => Box::new(reject::RejectEgress::new(name.clone())),
        },
        Http { name, server, auth, tls, sni, skip_cert_verify } => {
            let auth = auth.as_ref().map(|a| http::HttpAuth {
                username: a.username.clone(),
                password: a.password.clone(),
            });
            Box::new(http::HttpEgress::new(
                name.clone(),
                server.clone(),
                auth,
                *tls,
                sni.clone(),
                *skip_cert_verify,
            ))
        }
        Socks5 { name, server, auth } => {
            let auth = auth.as_ref().map(|a| socks5::Socks5Auth {
                username: a.username.clone(),
                password: a.password.clone(),
            });
            Box::new(socks5::Socks5Egress::new(name.clone(), server.clone(), auth))
        }
        Shadowsocks { name, server, method, password } => {
            let method = CryptoMethod::from_str(method)?;
            Box::new(shadowsocks::ShadowsocksEgress::new(name.clone(), server.clone(), method, password))
        }
        Trojan { name, server, password, sni, skip_cert_verify } => Box::new(trojan::TrojanEgress::new(
            name.clone(),
            server.clone(),
            password,
            sni.clone(),
            *skip_cert_verify,
        )),
    })
}

/// Build the ingress protocol adapter a listener should share across every
/// connection it accepts. TLS/WebSocket layering (Trojan, and optionally
/// others) is applied by the accept loop before `handshake` is called, not
/// here — this only builds the protocol-level state machine.
pub fn build_ingress(
    vo: &crate::config::IngressVO,
    replay_cache: std::sync::Arc<crate::replay::ReplayCache>,
) -> Result<std::sync::Arc<dyn IngressAdapter>> {
    use crate::config::IngressVO::*;
    use crate::crypto::method::CryptoMethod;
    use std::str::FromStr;

    Ok(match vo {
        Http { auth, .. } => {
            let auth = auth.as_ref().map(|a| http::HttpAuth {
                username: a.username.clone(),
                password: a.password.clone(),
            });
            std::sync::Arc::new(http::HttpIngress::new(auth))
        }
        Socks5 { auth, .. } => {
            let auth = auth.as_ref().map(|a| socks5::Socks5Auth {
                username: a.username.clone(),
                password: a.password.clone(),
            });
            std::sync::Arc::new(socks5::Socks5Ingress::new(auth))
        }
        Shadowsocks { method, password, .. } => {
            let method = CryptoMethod::from_str(method)?;
            std::sync::Arc::new(shadowsocks::ShadowsocksIngress::new(method, password, replay_cache))
        }
        Trojan { password, fallback, .. } => {
            let fallback = http::parse_host_port(fallback, 80)?;
            std::sync::Arc::new(trojan::TrojanIngress::new(password, fallback))
        }
        Tunnel { destinations, balance, .. } => {
            let strategy = match balance.as_str() {
                "random" => crate::balancer::Strategy::Random,
                "least-conn" => crate::balancer::Strategy::LeastConn,
                _ => crate::balancer::Strategy::RoundRobin,
            };
            let endpoints = destinations
                .iter()
                .map(|d| http::parse_host_port(d, 0))
                .collect::<Result<Vec<_>>>()?;
            let balancer = crate::balancer::Balancer::new(endpoints, strategy)?;
            std::sync::Arc::new(tunnel::TunnelIngress::new(balancer))
        }
    })
}
