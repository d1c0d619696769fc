//! Tunnel ingress: a fixed-destination ingress with no wire handshake of
//! its own. It exists for port-forward-style configurations where the
//! listener's destination is known ahead of time rather than recovered
//! from a client handshake; destination selection across multiple
//! configured targets is delegated to a `Balancer`.

use crate::balancer::Balancer;
use crate::common::endpoint::Endpoint;
use crate::common::error::{Error, Result};
use crate::net::{BoxedStream, IngressAdapter};
use async_trait::async_trait;

pub struct TunnelIngress {
    destinations: Balancer<Endpoint>,
}

impl TunnelIngress {
    pub fn new(destinations: Balancer<Endpoint>) -> Self {
        Self { destinations }
    }
}

#[async_trait]
impl IngressAdapter for TunnelIngress {
    async fn handshake(&self, _stream: &mut BoxedStream) -> Result<(Endpoint, Vec<u8>)> {
        let (_idx, endpoint) = self.destinations.select();
        Ok((endpoint, Vec::new()))
    }

    async fn confirm(&self, _stream: &mut BoxedStream) -> Result<()> {
        // No handshake means nothing to confirm; the client is already
        // talking directly to what it thinks is the destination.
        Ok(())
    }

    async fn report_failure(&self, _stream: &mut BoxedStream, _err: &Error) {
        // Nothing to report over a raw pass-through connection.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::Strategy;

    #[tokio::test]
    async fn handshake_returns_balanced_destination() {
        let balancer = Balancer::new(
            vec![Endpoint::Domain("a.test".into(), 80), Endpoint::Domain("b.test".into(), 80)],
            Strategy::RoundRobin,
        )
        .unwrap();
        let ingress = TunnelIngress::new(balancer);
        let mut stream: BoxedStream = Box::new(tokio::io::empty());

        let (first, prelude) = ingress.handshake(&mut stream).await.unwrap();
        assert_eq!(first, Endpoint::Domain("a.test".into(), 80));
        assert!(prelude.is_empty());

        let (second, _) = ingress.handshake(&mut stream).await.unwrap();
        assert_eq!(second, Endpoint::Domain("b.test".into(), 80));
    }
}
