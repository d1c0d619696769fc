//! pichi-rs - multi-protocol TCP proxy node
//!
//! Terminates HTTP CONNECT/relay, SOCKS5, Shadowsocks, Trojan and Tunnel
//! ingresses, and originates Direct, Reject, HTTP, SOCKS5, Shadowsocks
//! and Trojan egresses, with rule-based routing in between.
//!
//! # Architecture
//!
//! ```text
//! +----------+     +--------+     +---------+     +---------+
//! |  net/*   | --> | router | --> | managers| --> |  net/*  |
//! | ingress  |     |        |     |(egress) |     | egress  |
//! +----------+     +--------+     +---------+     +---------+
//!       \_______________ session.rs orchestrates ______________/
//! ```

pub mod balancer;
pub mod common;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod managers;
pub mod net;
pub mod replay;
pub mod router;
pub mod session;

pub use common::error::{Error, Result};
pub use config::Config;

use managers::{EgressManager, IngressManager};
use net::BoxedStream;
use router::{geoip::GeoIpReader, Router};
use session::SessionContext;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Owns every long-lived component: the route table, the egress/ingress
/// definitions, the resolver, the replay cache, and one accept-loop task
/// per configured ingress listener.
pub struct Node {
    router: Arc<Router>,
    ingresses: Arc<IngressManager>,
    egresses: Arc<EgressManager>,
    ctx: Arc<SessionContext>,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        info!("initializing node v{}", VERSION);

        let geo = Arc::new(match &config.geoip_database {
            Some(path) => GeoIpReader::open(path),
            None => GeoIpReader::empty(),
        });
        let router = Arc::new(Router::new(geo, config.route.default.clone()));
        for rule in &config.rules {
            router.set_rule(build_rule(rule)?);
        }
        let entries = config
            .route
            .entries
            .iter()
            .map(|e| (e.rules.clone(), e.egress.clone()))
            .collect();
        router.set_route(entries, config.route.default.clone());

        let egresses = Arc::new(EgressManager::new(router.clone()));
        for egress in &config.egresses {
            egresses.update(egress.clone());
        }

        let resolver = Arc::new(dns::Resolver::new(&config.dns).await?);
        let ctx = Arc::new(SessionContext { router: router.clone(), egresses: egresses.clone(), resolver });

        let ingresses = Arc::new(IngressManager::new());
        let replay_cache = Arc::new(replay::ReplayCache::new());

        let node = Node { router, ingresses, egresses, ctx };
        for ingress_vo in &config.ingresses {
            node.spawn_ingress(ingress_vo.clone(), replay_cache.clone()).await?;
        }

        Ok(node)
    }

    async fn spawn_ingress(&self, vo: config::IngressVO, replay_cache: Arc<replay::ReplayCache>) -> Result<()> {
        let listen_addr: SocketAddr = vo
            .listen()
            .parse()
            .map_err(|e| Error::config(format!("bad listen address {}: {}", vo.listen(), e)))?;
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| Error::config(format!("failed to bind {}: {}", listen_addr, e)))?;

        let adapter = net::build_ingress(&vo, replay_cache)?;
        let ingress_name = vo.name().to_string();
        let ingress_type = vo.type_name().to_string();
        let ctx = self.ctx.clone();

        info!(ingress = %ingress_name, kind = %ingress_type, addr = %listen_addr, "listening");

        let handle = tokio::spawn(async move {
            let mut counter: u64 = 0;
            loop {
                let (tcp, _peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(ingress = %ingress_name, error = %e, "accept failed");
                        continue;
                    }
                };
                counter = counter.wrapping_add(1);
                let stream: BoxedStream = Box::new(tcp);
                let adapter = adapter.clone();
                let ingress_name = ingress_name.clone();
                let ingress_type = ingress_type.clone();
                let ctx = ctx.clone();
                tokio::spawn(session::run_session(
                    stream,
                    listen_addr,
                    adapter,
                    ingress_name,
                    ingress_type,
                    ctx,
                    counter,
                ));
            }
        });

        self.ingresses.update(vo, handle);
        Ok(())
    }

    /// Block until a shutdown signal arrives. Accept loops already run as
    /// independent tasks owned by `IngressManager`; dropping the manager
    /// (which happens when `Node` drops) aborts them all.
    pub async fn run(&self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        Ok(())
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn ingresses(&self) -> &Arc<IngressManager> {
        &self.ingresses
    }

    pub fn egresses(&self) -> &Arc<EgressManager> {
        &self.egresses
    }
}

fn build_rule(vo: &config::RuleVO) -> Result<router::Rule> {
    let matchers = vo
        .matchers
        .iter()
        .map(build_matcher)
        .collect::<Result<Vec<_>>>()?;
    Ok(router::Rule { name: vo.name.clone(), matchers })
}

fn build_matcher(vo: &config::MatcherVO) -> Result<router::Matcher> {
    use config::MatcherVO::*;
    Ok(match vo {
        Domain { suffix } => router::Matcher::Domain(suffix.clone()),
        Cidr { network } => router::Matcher::Cidr(
            network
                .parse()
                .map_err(|e| Error::config(format!("bad CIDR {}: {}", network, e)))?,
        ),
        Country { iso_code } => router::Matcher::Country(iso_code.clone()),
        IngressName { name } => router::Matcher::IngressName(name.clone()),
        IngressType { type_name } => router::Matcher::IngressType(type_name.clone()),
        Regex { pattern } => router::Matcher::Regex(Arc::new(
            regex::Regex::new(pattern).map_err(|e| Error::config(format!("bad regex {}: {}", pattern, e)))?,
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
