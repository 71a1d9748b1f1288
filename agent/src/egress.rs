//! Combined egress: streaming pool first, legacy datagrams last.

use crate::legacy::LegacyPool;
use crate::metrics::AgentMetrics;
use crate::pool::Pool;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn run(
    mut frames: mpsc::Receiver<Bytes>,
    pool: Pool,
    legacy: LegacyPool,
    metrics: AgentMetrics,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = frames.recv() => {
                let Some(frame) = frame else { return };
                if pool.write(frame.clone()).is_ok() {
                    metrics.sent_streaming.inc();
                    continue;
                }
                match legacy.write(&frame).await {
                    Ok(()) => {
                        metrics.sent_datagram.inc();
                    }
                    Err(err) => {
                        metrics.egress_dropped.inc();
                        debug!(error = %err, "envelope dropped; both egress paths failed");
                    }
                }
            }
        }
    }
}
