//! Direct egress: dial the requested endpoint as-is, no relay protocol.

use crate::common::endpoint::Endpoint;
use crate::common::error::{Error, Result};
use crate::dns::Resolver;
use crate::net::{BoxedStream, EgressAdapter};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

pub struct DirectEgress {
    name: String,
    resolver: Arc<Resolver>,
}

impl DirectEgress {
    pub fn new(name: impl Into<String>, resolver: Arc<Resolver>) -> Self {
        Self {
            name: name.into(),
            resolver,
        }
    }
}

#[async_trait]
impl EgressAdapter for DirectEgress {
    async fn connect(&self, remote: &Endpoint) -> Result<BoxedStream> {
        let addr: SocketAddr = match remote {
            Endpoint::Ip(ip, port) => SocketAddr::new(*ip, *port),
            Endpoint::Domain(host, port) => {
                let ip = self.resolver.resolve(host).await?;
                SocketAddr::new(ip, *port)
            }
        };
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::conn_failure(format!("direct connect to {}: {}", addr, e)))?;
        Ok(Box::new(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
