//! Reject egress: the pseudo-destination routed traffic lands on when a
//! rule says to drop it. `delay` mirrors the session orchestrator's
//! anti-probing behavior of stalling replayed/self-connect traffic
//! instead of resetting it instantly.

use crate::common::endpoint::Endpoint;
use crate::common::error::Result;
use crate::net::{BoxedStream, EgressAdapter};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub struct RejectEgress {
    name: String,
    delay: Option<Duration>,
}

impl RejectEgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
        }
    }

    pub fn with_random_delay(name: impl Into<String>, max: Duration) -> Self {
        let millis = rand::random::<u64>() % max.as_millis().max(1) as u64;
        Self {
            name: name.into(),
            delay: Some(Duration::from_millis(millis)),
        }
    }
}

#[async_trait]
impl EgressAdapter for RejectEgress {
    async fn connect(&self, _remote: &Endpoint) -> Result<BoxedStream> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::new(BlackHole))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A stream that immediately reports EOF on read and silently discards
/// writes; the session bridge sees this as a connection that opened and
/// closed instantly.
struct BlackHole;

impl AsyncRead for BlackHole {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for BlackHole {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

