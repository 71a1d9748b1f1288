//! Per-subscriber fan-in across every discovered aggregator.
//!
//! The finder snapshot is read once at subscribe time; aggregators that show
//! up later are not joined, operators reconnect periodically. Each upstream
//! runs in its own task behind a small buffer so a slow upstream never delays
//! the others, and a slow subscriber costs drops, not backpressure.

use crate::metrics::RouterMetrics;
use bytes::Bytes;
use downpour_discovery::finder::Snapshot;
use downpour_discovery::Endpoint;
use downpour_stream::{Connector, SubscribeRequest};
use futures::stream::SelectAll;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Envelopes a single upstream may buffer ahead of the subscriber.
const UPSTREAM_BUFFER: usize = 4;

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("no aggregators discovered")]
    NoAggregators,
}

#[derive(Clone)]
pub struct FanIn {
    connector: Connector,
    snapshots: watch::Receiver<Snapshot>,
    dial_timeout: Duration,
    metrics: RouterMetrics,
}

/// One subscriber's merged stream. Dropping it cancels every upstream.
pub struct Session {
    subscriber_id: String,
    streams: SelectAll<ReceiverStream<Bytes>>,
    cancel: CancellationToken,
    opened_at: tokio::time::Instant,
}

impl Session {
    /// Next envelope in arrival order across upstreams; `None` once every
    /// upstream has closed.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.streams.next().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!(
            subscriber = %self.subscriber_id,
            lasted_ms = self.opened_at.elapsed().as_millis() as u64,
            "session closed"
        );
    }
}

impl FanIn {
    pub fn new(
        connector: Connector,
        snapshots: watch::Receiver<Snapshot>,
        dial_timeout: Duration,
        metrics: RouterMetrics,
    ) -> Self {
        Self {
            connector,
            snapshots,
            dial_timeout,
            metrics,
        }
    }

    pub fn subscribe(
        &self,
        subscriber_id: &str,
        app_id: Option<String>,
    ) -> Result<Session, SubscribeError> {
        let snapshot = self.snapshots.borrow().clone();
        if snapshot.is_empty() {
            return Err(SubscribeError::NoAggregators);
        }

        let request = SubscribeRequest {
            subscriber_id: subscriber_id.to_string(),
            app_id,
        };
        let cancel = CancellationToken::new();
        let mut streams = SelectAll::new();
        for endpoint in snapshot.values() {
            let (tx, rx) = mpsc::channel(UPSTREAM_BUFFER);
            streams.push(ReceiverStream::new(rx));
            tokio::spawn(run_upstream(
                endpoint.clone(),
                self.connector.clone(),
                self.dial_timeout,
                request.clone(),
                tx,
                self.metrics.clone(),
                cancel.clone(),
            ));
        }
        self.metrics.subscriptions.inc();
        debug!(subscriber = subscriber_id, upstreams = snapshot.len(), "session opened");
        Ok(Session {
            subscriber_id: subscriber_id.to_string(),
            streams,
            cancel,
            opened_at: tokio::time::Instant::now(),
        })
    }
}

/// `Dialing -> Streaming -> Closed`; `Closed` is terminal and counted exactly
/// once, whichever state it was reached from.
async fn run_upstream(
    endpoint: Endpoint,
    connector: Connector,
    dial_timeout: Duration,
    request: SubscribeRequest,
    tx: mpsc::Sender<Bytes>,
    metrics: RouterMetrics,
    cancel: CancellationToken,
) {
    let addr = endpoint.stream_addr();

    // Dialing
    let mut stream = tokio::select! {
        _ = cancel.cancelled() => {
            metrics.upstreams_closed.inc();
            return;
        }
        dialed = connector.dial(&addr, dial_timeout) => match dialed {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%addr, error = %err, "upstream dial failed; absent from fan-in");
                metrics.dial_failures.inc();
                metrics.upstreams_closed.inc();
                return;
            }
        }
    };
    if stream.send(Bytes::from(request.encode())).await.is_err() {
        metrics.upstreams_closed.inc();
        return;
    }
    metrics.upstreams_opened.inc();

    // Streaming
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => {
                match frame {
                    Some(Ok(frame)) => match tx.try_send(frame.freeze()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            metrics.slow_consumer_drops.inc();
                        }
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Some(Err(err)) => {
                        warn!(%addr, error = %err, "upstream stream error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Closed
    metrics.upstreams_closed.inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Serves one envelope every `period` to any subscriber until the
    /// connection drops.
    async fn fake_aggregator(period: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let mut stream = downpour_stream::framed(socket);
                    let Some(Ok(subscribe)) = stream.next().await else { return };
                    assert!(SubscribeRequest::decode(&subscribe).is_some());
                    let mut ticker = tokio::time::interval(period);
                    loop {
                        ticker.tick().await;
                        if stream.send(Bytes::from_static(b"envelope")).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    fn snapshot_of(addrs: &[String]) -> Snapshot {
        Arc::new(
            addrs
                .iter()
                .enumerate()
                .map(|(i, addr)| {
                    let (host, port) = addr.rsplit_once(':').unwrap();
                    let endpoint = Endpoint {
                        id: format!("doppler-{i}"),
                        host: host.to_string(),
                        ws_port: 0,
                        grpc_port: port.parse().unwrap(),
                        zone: "z1".to_string(),
                        protocols: vec![],
                    };
                    (endpoint.id.clone(), endpoint)
                })
                .collect::<HashMap<_, _>>(),
        )
    }

    fn fanin(snapshot: Snapshot, metrics: RouterMetrics) -> FanIn {
        // The receiver keeps serving the last value once the sender is gone.
        let (_, rx) = watch::channel(snapshot);
        FanIn::new(Connector::Plain, rx, Duration::from_secs(5), metrics)
    }

    #[tokio::test]
    async fn merges_envelopes_from_every_aggregator() {
        let a = fake_aggregator(Duration::from_millis(20)).await;
        let b = fake_aggregator(Duration::from_millis(20)).await;
        let fanin = fanin(snapshot_of(&[a, b]), RouterMetrics::default());

        let mut session = fanin.subscribe("operator", None).unwrap();
        for _ in 0..4 {
            let frame = tokio::time::timeout(Duration::from_secs(5), session.next())
                .await
                .expect("envelope")
                .unwrap();
            assert_eq!(frame.as_ref(), b"envelope");
        }
    }

    #[tokio::test]
    async fn subscribing_with_no_aggregators_fails() {
        let fanin = fanin(Snapshot::default(), RouterMetrics::default());
        assert!(matches!(
            fanin.subscribe("operator", None),
            Err(SubscribeError::NoAggregators)
        ));
    }

    #[tokio::test]
    async fn disconnecting_closes_every_upstream_within_a_second() {
        let a = fake_aggregator(Duration::from_millis(100)).await;
        let b = fake_aggregator(Duration::from_millis(100)).await;
        let metrics = RouterMetrics::default();
        let fanin = fanin(snapshot_of(&[a, b]), metrics.clone());

        let mut session = fanin.subscribe("operator", None).unwrap();
        let consume = tokio::time::timeout(Duration::from_millis(250), async {
            loop {
                session.next().await;
            }
        });
        let _ = consume.await;
        drop(session);

        tokio::time::timeout(Duration::from_secs(1), async {
            while metrics.upstreams_closed.get() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("all upstreams closed within a second");
    }

    #[tokio::test]
    async fn a_dead_aggregator_is_simply_absent() {
        let live = fake_aggregator(Duration::from_millis(20)).await;
        // Reserve an address nothing listens on.
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap().to_string();
            drop(listener);
            addr
        };
        let metrics = RouterMetrics::default();
        let fanin = fanin(snapshot_of(&[live, dead]), metrics.clone());

        let mut session = fanin.subscribe("operator", None).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), session.next())
            .await
            .expect("the live upstream still streams")
            .unwrap();
        assert_eq!(frame.as_ref(), b"envelope");
    }
}
