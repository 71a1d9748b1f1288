//! Streaming connection pool to the aggregator tier.
//!
//! Each slot is owned by one manager task running the state machine
//! `Disconnected -> Connecting -> Connected -> Disconnected`. Writers hand
//! frames to a manager through a small channel and never wait for a
//! reconnect: when no slot is connected the write fails fast and the caller
//! may take the legacy path.

use bytes::Bytes;
use downpour_discovery::finder::Snapshot;
use downpour_stream::Connector;
use futures::SinkExt;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Frames a slow connection may hold before writes skip past it.
const CONN_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no streaming connection available")]
    Unavailable,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub size: usize,
    /// Local zone; same-zone aggregators are preferred.
    pub zone: String,
    /// Fixed target used only while discovery is empty.
    pub static_target: Option<String>,
    pub dial_timeout: Duration,
    pub backoff: Duration,
    pub backoff_jitter: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 5,
            zone: String::new(),
            static_target: None,
            dial_timeout: Duration::from_secs(5),
            backoff: Duration::from_secs(10),
            backoff_jitter: Duration::from_secs(1),
        }
    }
}

struct Conn {
    frames: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
}

pub struct Pool {
    conns: Vec<Conn>,
    next: AtomicUsize,
}

impl Pool {
    pub fn start(
        connector: Connector,
        snapshots: watch::Receiver<Snapshot>,
        config: PoolConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let conns = (0..config.size.max(1))
            .map(|slot| {
                let (tx, rx) = mpsc::channel(CONN_BUFFER);
                let connected = Arc::new(AtomicBool::new(false));
                tokio::spawn(manage(
                    slot,
                    connector.clone(),
                    snapshots.clone(),
                    config.clone(),
                    rx,
                    connected.clone(),
                    shutdown.clone(),
                ));
                Conn {
                    frames: tx,
                    connected,
                }
            })
            .collect();
        Self {
            conns,
            next: AtomicUsize::new(0),
        }
    }

    /// Hands the frame to a connected slot, round-robin. Never blocks; fails
    /// fast when every slot is disconnected or saturated.
    pub fn write(&self, frame: Bytes) -> Result<(), PoolError> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.conns.len() {
            let conn = &self.conns[(start + offset) % self.conns.len()];
            if !conn.connected.load(Ordering::Acquire) {
                continue;
            }
            if conn.frames.try_send(frame.clone()).is_ok() {
                return Ok(());
            }
        }
        Err(PoolError::Unavailable)
    }
}

async fn manage(
    slot: usize,
    connector: Connector,
    snapshots: watch::Receiver<Snapshot>,
    config: PoolConfig,
    mut frames: mpsc::Receiver<Bytes>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        let target = {
            let snapshot = snapshots.borrow().clone();
            select_target(&snapshot, &config)
        };
        if let Some(addr) = target {
            match connector.dial(&addr, config.dial_timeout).await {
                Ok(mut stream) => {
                    debug!(slot, %addr, "connected to aggregator");
                    connected.store(true, Ordering::Release);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                connected.store(false, Ordering::Release);
                                return;
                            }
                            frame = frames.recv() => {
                                let Some(frame) = frame else {
                                    connected.store(false, Ordering::Release);
                                    return;
                                };
                                if let Err(err) = stream.send(frame).await {
                                    warn!(slot, %addr, error = %err, "stream write failed; reconnecting");
                                    break;
                                }
                            }
                        }
                    }
                    connected.store(false, Ordering::Release);
                }
                Err(err) => {
                    debug!(slot, %addr, error = %err, "dial failed");
                }
            }
        }

        let wait = config.backoff + jitter(config.backoff_jitter);
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max.as_millis() as u64))
}

/// Picks a dial target, preferring the local zone and falling back to the
/// static destination while discovery is empty.
fn select_target(snapshot: &Snapshot, config: &PoolConfig) -> Option<String> {
    let same_zone: Vec<_> = snapshot
        .values()
        .filter(|endpoint| !config.zone.is_empty() && endpoint.zone == config.zone)
        .collect();
    let candidates = if same_zone.is_empty() {
        snapshot.values().collect()
    } else {
        same_zone
    };
    if candidates.is_empty() {
        return config
            .static_target
            .clone()
            .filter(|target| !target.is_empty());
    }
    let pick = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates[pick].stream_addr())
}
