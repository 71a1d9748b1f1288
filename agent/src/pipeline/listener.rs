use crate::metrics::AgentMetrics;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_527;

pub async fn run(
    socket: UdpSocket,
    tx: mpsc::Sender<Vec<u8>>,
    metrics: AgentMetrics,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, _)) => {
                        metrics.received.inc();
                        if tx.try_send(buf[..len].to_vec()).is_err() {
                            metrics.drop_for("listener");
                        }
                    }
                    Err(err) => warn!(error = %err, "udp read failed"),
                }
            }
        }
    }
}
