//! The forwarder pipeline.
//!
//! `listener -> unmarshal -> aggregate -> tag -> marshal -> egress`, one task
//! per stage, bounded channels in between. A full channel drops the envelope
//! and bumps a counter; backpressure is observed, never propagated back to
//! the socket.

pub mod aggregate;
pub mod listener;
pub mod tag;

use crate::egress;
use crate::legacy::LegacyPool;
use crate::metrics::AgentMetrics;
use crate::pool::Pool;
use aggregate::Aggregator;
use bytes::Bytes;
use downpour_types::{codec, v1};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const CHANNEL_CAPACITY: usize = 10_000;

/// Pending http starts the aggregation table holds before evicting.
pub const AGGREGATE_CAPACITY: usize = 1024;
/// How long an unpaired start may wait for its stop.
pub const AGGREGATE_TTL: Duration = Duration::from_secs(60);

pub fn start(
    socket: UdpSocket,
    tagger: tag::Tagger,
    pool: Pool,
    legacy: LegacyPool,
    metrics: AgentMetrics,
    shutdown: CancellationToken,
) {
    let (raw_tx, raw_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (decoded_tx, decoded_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (aggregated_tx, aggregated_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (tagged_tx, tagged_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (framed_tx, framed_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(listener::run(
        socket,
        raw_tx,
        metrics.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(run_unmarshal(
        raw_rx,
        decoded_tx,
        metrics.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(run_aggregate(
        decoded_rx,
        aggregated_tx,
        Aggregator::new(
            AGGREGATE_CAPACITY,
            AGGREGATE_TTL,
            metrics.unmatched_stops.clone(),
            metrics.evicted_starts.clone(),
        ),
        metrics.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(run_tag(
        aggregated_rx,
        tagged_tx,
        tagger,
        metrics.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(run_marshal(
        tagged_rx,
        framed_tx,
        metrics.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(egress::run(framed_rx, pool, legacy, metrics, shutdown));
}

async fn run_unmarshal(
    mut rx: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<v1::Envelope>,
    metrics: AgentMetrics,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            raw = rx.recv() => {
                let Some(raw) = raw else { return };
                match codec::unmarshal(&raw) {
                    Ok(envelope) => {
                        if tx.try_send(envelope).is_err() {
                            metrics.drop_for("unmarshal");
                        }
                    }
                    Err(_) => {
                        metrics.unmarshal_errors.inc();
                    }
                };
            }
        }
    }
}

async fn run_aggregate(
    mut rx: mpsc::Receiver<v1::Envelope>,
    tx: mpsc::Sender<v1::Envelope>,
    mut aggregator: Aggregator,
    metrics: AgentMetrics,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { return };
                if let Some(out) = aggregator.apply(envelope) {
                    if tx.try_send(out).is_err() {
                        metrics.drop_for("aggregate");
                    }
                }
            }
        }
    }
}

async fn run_tag(
    mut rx: mpsc::Receiver<v1::Envelope>,
    tx: mpsc::Sender<v1::Envelope>,
    tagger: tag::Tagger,
    metrics: AgentMetrics,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            envelope = rx.recv() => {
                let Some(mut envelope) = envelope else { return };
                tagger.apply(&mut envelope);
                if tx.try_send(envelope).is_err() {
                    metrics.drop_for("tag");
                }
            }
        }
    }
}

async fn run_marshal(
    mut rx: mpsc::Receiver<v1::Envelope>,
    tx: mpsc::Sender<Bytes>,
    metrics: AgentMetrics,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { return };
                match codec::marshal(&envelope) {
                    Ok(bytes) => {
                        if tx.try_send(Bytes::from(bytes)).is_err() {
                            metrics.drop_for("marshal");
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to marshal envelope"),
                }
            }
        }
    }
}
