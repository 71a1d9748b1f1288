//! Poll metrics ride the ordinary ingestion path: v1 envelopes over UDP to
//! the local agent, which tags them like any other emission.

use downpour_types::{codec, v1};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tracing::debug;

pub const ORIGIN: &str = "syslog_drain_binder";

pub struct MetricEmitter {
    socket: UdpSocket,
    target: String,
}

impl MetricEmitter {
    pub async fn new(target: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind("0.0.0.0:0").await?,
            target: target.into(),
        })
    }

    pub async fn emit_counter(&self, name: &str, delta: u64) {
        self.emit(v1::Event::CounterEvent(v1::CounterEvent {
            name: name.to_string(),
            delta,
            total: 0,
        }))
        .await;
    }

    pub async fn emit_value(&self, name: &str, value: f64, unit: &str) {
        self.emit(v1::Event::ValueMetric(v1::ValueMetric {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
        }))
        .await;
    }

    async fn emit(&self, event: v1::Event) {
        let envelope = v1::Envelope {
            origin: ORIGIN.to_string(),
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            timestamp: now_nanos(),
            event,
        };
        let Ok(payload) = codec::marshal(&envelope) else {
            return;
        };
        // Metrics are best-effort; the agent may simply not be there.
        if let Err(err) = self.socket.send_to(&payload, &self.target).await {
            debug!(error = %err, target = %self.target, "metric emission failed");
        }
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or_default()
}
