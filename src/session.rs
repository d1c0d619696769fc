//! Session orchestrator: the per-connection lifecycle described in
//! §4.13 — construct ingress, read the remote endpoint, route, connect
//! the egress, confirm, then bridge both directions until either side is
//! done.

use crate::common::endpoint::Endpoint;
use crate::common::error::{Error, Result};
use crate::config::EgressVO;
use crate::dns::Resolver;
use crate::managers::EgressManager;
use crate::net::{self, BoxedStream, EgressAdapter, IngressAdapter};
use crate::router::Router;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{copy, AsyncWriteExt};
use tracing::{debug, info, warn};

const MAX_FRAME_SIZE: usize = 16 * 1024;

/// Upper bound on the anti-probing stall applied to a replayed IV, so a
/// prober can't distinguish "replayed" from "routed to a slow egress" by
/// timing alone.
const REPLAY_REJECT_MAX_DELAY: Duration = Duration::from_secs(3);

pub struct SessionContext {
    pub router: Arc<Router>,
    pub egresses: Arc<EgressManager>,
    pub resolver: Arc<Resolver>,
}

/// Run one accepted connection end to end. Never returns an error to the
/// caller: every failure is translated into a protocol-appropriate
/// `ingress.report_failure` and the connection is simply dropped.
pub async fn run_session(
    mut stream: BoxedStream,
    local_addr: SocketAddr,
    ingress: Arc<dyn IngressAdapter>,
    ingress_name: String,
    ingress_type: String,
    ctx: Arc<SessionContext>,
    conn_id: u64,
) {
    match run_session_inner(&mut stream, local_addr, &ingress, &ingress_name, &ingress_type, &ctx, conn_id).await
    {
        Ok(()) => {}
        Err(e) => {
            debug!(conn_id, error = %e, "session failed");
            ingress.report_failure(&mut stream, &e).await;
        }
    }
}

async fn run_session_inner(
    stream: &mut BoxedStream,
    local_addr: SocketAddr,
    ingress: &Arc<dyn IngressAdapter>,
    ingress_name: &str,
    ingress_type: &str,
    ctx: &SessionContext,
    conn_id: u64,
) -> Result<()> {
    let (remote, prelude) = match ingress.handshake(stream).await {
        Ok(pair) => pair,
        // Not a failure: a replayed IV is routed to the reject egress
        // with a random stall instead of being reported to the client,
        // so a prober can't tell "replayed" apart from a slow route.
        Err(Error::Replayed(reason)) => {
            warn!(conn_id, %reason, "replayed IV, stalling via reject");
            let reject = crate::net::reject::RejectEgress::with_random_delay("reject", REPLAY_REJECT_MAX_DELAY);
            let dummy = Endpoint::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 1);
            return bridge_via(stream, &reject, &dummy, &[], conn_id, "reject", "replay", None).await;
        }
        Err(e) => return Err(e),
    };

    let resolved = if ctx.router.needs_resolving() {
        resolve_for_routing(&ctx.resolver, &remote).await
    } else {
        Vec::new()
    };

    // Loop prevention: never let a client tunnel back into our own
    // listener, which would otherwise recurse until resources run out.
    if resolved.iter().any(|ip| SocketAddr::new(*ip, remote.port()) == local_addr) {
        warn!(conn_id, %remote, "self-connect detected, rejecting");
        let reject = crate::net::reject::RejectEgress::new("reject");
        return bridge_via(stream, &reject, &remote, &prelude, conn_id, "reject", "self-connect", None).await;
    }

    let egress_name = ctx.router.route(&remote, ingress_name, ingress_type, &resolved);
    let egress_vo = ctx
        .egresses
        .get(&egress_name)
        .ok_or_else(|| Error::semantic(format!("route selected unknown egress {}", egress_name)))?;

    let egress = net::build_egress(&egress_vo, ctx.resolver.clone())?;
    // A non-empty prelude means the handshake is itself an in-progress
    // relay (e.g. HTTP relay mode replaying a rewritten request) whose
    // response must reach the client untouched; the tunnel-mode success
    // acknowledgement would corrupt that stream, so only confirm when
    // there's no prelude to replay.
    let confirm = if prelude.is_empty() { Some(ingress.as_ref()) } else { None };
    bridge_via(stream, egress.as_ref(), &remote, &prelude, conn_id, &egress_name, "", confirm).await
}

async fn resolve_for_routing(resolver: &Resolver, remote: &Endpoint) -> Vec<std::net::IpAddr> {
    match remote {
        Endpoint::Ip(ip, _) => vec![*ip],
        Endpoint::Domain(host, _) => resolver.resolve_all(host).await.unwrap_or_default(),
    }
}

async fn bridge_via(
    client: &mut BoxedStream,
    egress: &(impl EgressAdapter + ?Sized),
    remote: &Endpoint,
    prelude: &[u8],
    conn_id: u64,
    egress_name: &str,
    rule: &str,
    confirm: Option<&dyn IngressAdapter>,
) -> Result<()> {
    let mut upstream = egress.connect(remote).await?;
    if !prelude.is_empty() {
        upstream.write_all(prelude).await?;
    }

    // Step 8 (§4.13): the client's success reply must go out before the
    // bridging loops start, or a client that waits for it (SOCKS5,
    // CONNECT) and the relay loops deadlock waiting on each other.
    if let Some(ingress) = confirm {
        ingress.confirm(client).await?;
    }

    let label = if rule.is_empty() { egress_name.to_string() } else { format!("{} ({})", egress_name, rule) };
    info!(conn_id, %remote, egress = %label, "routed");

    let (mut client_read, mut client_write) = tokio::io::split(&mut *client);
    let (mut up_read, mut up_write) = tokio::io::split(&mut upstream);

    let c2u = copy_capped(&mut client_read, &mut up_write);
    let u2c = copy_capped(&mut up_read, &mut client_write);

    tokio::select! {
        r = c2u => { let _ = r; }
        r = u2c => { let _ = r; }
    }
    Ok(())
}

async fn copy_capped<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<u64>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    // `tokio::io::copy` already buffers internally; MAX_FRAME_SIZE is
    // documentation of the bridge's per-direction working set, not a
    // literal read-size knob copy() exposes.
    let _ = MAX_FRAME_SIZE;
    match copy(reader, writer).await {
        Ok(n) => Ok(n),
        Err(e) if matches!(e.kind(), std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset) => {
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EgressVO;
    use crate::managers::EgressManager;
    use crate::router::geoip::GeoIpReader;
    use tokio::io::duplex;

    #[tokio::test]
    async fn bridges_client_to_direct_egress_over_reject() {
        let router = Arc::new(Router::new(Arc::new(GeoIpReader::empty()), "reject"));
        let egresses = Arc::new(EgressManager::new(router.clone()));
        egresses.update(EgressVO::Reject { name: "reject".into(), delay_ms: None });

        let resolver_config = crate::config::DnsConfig::default();
        let resolver = Arc::new(Resolver::new(&resolver_config).await.unwrap());
        let ctx = Arc::new(SessionContext { router, egresses, resolver });

        let (client, server) = duplex(1024);
        let mut boxed: BoxedStream = Box::new(server);
        let ingress: Arc<dyn IngressAdapter> =
            Arc::new(crate::net::tunnel::TunnelIngress::new(
                crate::balancer::Balancer::new(
                    vec![Endpoint::Domain("example.test".into(), 80)],
                    crate::balancer::Strategy::Random,
                )
                .unwrap(),
            ));

        drop(client);
        run_session_inner(
            &mut boxed,
            "127.0.0.1:1".parse().unwrap(),
            &ingress,
            "tunnel-in",
            "tunnel",
            &ctx,
            1,
        )
        .await
        .unwrap();
    }
}
