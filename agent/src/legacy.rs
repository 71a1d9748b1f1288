//! Legacy datagram fallback to a fixed aggregator address.
//!
//! Every payload is sealed with the shared secret before it leaves the host.
//! There is no retry and no queue; a failed send only refreshes the resolved
//! address, and at most once every five seconds.

use downpour_stream::datagram;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

const RESOLVE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("destination {0} did not resolve")]
    Unresolved(String),
    #[error("datagram send: {0}")]
    Io(#[from] std::io::Error),
}

struct Resolved {
    addr: Option<SocketAddr>,
    at: Instant,
}

pub struct LegacyPool {
    sockets: Vec<UdpSocket>,
    next: AtomicUsize,
    destination: String,
    secret: Vec<u8>,
    resolved: Mutex<Resolved>,
}

impl LegacyPool {
    pub async fn new(
        destination: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        size: usize,
    ) -> std::io::Result<Self> {
        let mut sockets = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            sockets.push(UdpSocket::bind("0.0.0.0:0").await?);
        }
        let destination = destination.into();
        let addr = resolve(&destination).await;
        Ok(Self {
            sockets,
            next: AtomicUsize::new(0),
            destination,
            secret: secret.into(),
            resolved: Mutex::new(Resolved {
                addr,
                at: Instant::now(),
            }),
        })
    }

    pub async fn write(&self, payload: &[u8]) -> Result<(), LegacyError> {
        let addr = {
            let resolved = self.resolved.lock().await;
            resolved.addr
        };
        let Some(addr) = addr else {
            self.maybe_re_resolve().await;
            return Err(LegacyError::Unresolved(self.destination.clone()));
        };

        let frame = datagram::seal(&self.secret, payload);
        let socket =
            &self.sockets[self.next.fetch_add(1, Ordering::Relaxed) % self.sockets.len()];
        match socket.send_to(&frame, addr).await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.maybe_re_resolve().await;
                Err(err.into())
            }
        }
    }

    async fn maybe_re_resolve(&self) {
        {
            let mut resolved = self.resolved.lock().await;
            if resolved.at.elapsed() < RESOLVE_INTERVAL {
                return;
            }
            resolved.at = Instant::now();
        }
        // Resolve outside the lock; writers keep using the old address.
        if let Some(addr) = resolve(&self.destination).await {
            self.resolved.lock().await.addr = Some(addr);
        }
    }
}

async fn resolve(destination: &str) -> Option<SocketAddr> {
    match tokio::net::lookup_host(destination).await {
        Ok(mut addrs) => addrs.next(),
        Err(err) => {
            warn!(%destination, error = %err, "failed to resolve legacy destination");
            None
        }
    }
}
