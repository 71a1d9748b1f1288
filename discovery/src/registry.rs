//! TTL-heartbeat self-announcement.
//!
//! An announcer writes its record under two prefixes (the structured one and
//! the legacy flat one), refreshes both atomically each interval with
//! TTL = 3 x interval, and deletes both on graceful release. A refresh
//! failure is retried once immediately; a second failure is logged and the
//! announcer waits for the next tick, so a transient store blip never drops
//! the record on our side.

use crate::endpoint::Endpoint;
use crate::store::{Entry, Store, StoreError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const META_ROOT: &str = "/meta";
pub const HEALTH_ROOT: &str = "/healthstatus";

#[derive(Clone, Debug)]
pub struct AnnounceConfig {
    /// Component name, e.g. `doppler`.
    pub component: String,
    pub interval: Duration,
    pub endpoint: Endpoint,
    /// Instance index within the job, last path segment of both keys.
    pub index: String,
}

impl AnnounceConfig {
    fn meta_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            META_ROOT, self.component, self.endpoint.zone, self.endpoint.id, self.index
        )
    }

    fn health_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            HEALTH_ROOT, self.component, self.endpoint.zone, self.endpoint.id, self.index
        )
    }

    fn ttl(&self) -> Duration {
        self.interval * 3
    }
}

/// Handle to a running announcement; dropping it abandons the key to its TTL,
/// [Announcer::release] deletes it eagerly.
pub struct Announcer {
    release: mpsc::Sender<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Announcer {
    /// Deletes both keys and stops the heartbeat, resolving once the store
    /// acknowledged the deletion attempt.
    pub async fn release(self) {
        let (ack, done) = oneshot::channel();
        if self.release.send(ack).await.is_ok() {
            let _ = done.await;
        }
        self.handle.abort();
    }
}

pub fn announce(store: Arc<dyn Store>, config: AnnounceConfig) -> Announcer {
    let (release_tx, release_rx) = mpsc::channel(1);
    let handle = tokio::spawn(run(store, config, release_rx));
    Announcer {
        release: release_tx,
        handle,
    }
}

async fn run(
    store: Arc<dyn Store>,
    config: AnnounceConfig,
    mut release: mpsc::Receiver<oneshot::Sender<()>>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = refresh(store.as_ref(), &config).await {
                    warn!(error = %err, key = %config.meta_key(), "announcement refresh failed; retrying once");
                    if let Err(err) = refresh(store.as_ref(), &config).await {
                        warn!(error = %err, key = %config.meta_key(), "announcement refresh retry failed; waiting for next tick");
                    }
                }
            }
            ack = release.recv() => {
                let Some(ack) = ack else { return };
                if let Err(err) = store.delete(&config.meta_key()).await {
                    warn!(error = %err, "failed to release structured announcement");
                }
                if let Err(err) = store.delete(&config.health_key()).await {
                    warn!(error = %err, "failed to release legacy announcement");
                }
                debug!(id = %config.endpoint.id, "announcement released");
                let _ = ack.send(());
                return;
            }
        }
    }
}

async fn refresh(store: &dyn Store, config: &AnnounceConfig) -> Result<(), StoreError> {
    let record = serde_json::to_vec(&config.endpoint)
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
    store
        .put_many(vec![
            Entry {
                key: config.meta_key(),
                value: Bytes::from(record),
                ttl: Some(config.ttl()),
            },
            Entry {
                key: config.health_key(),
                value: Bytes::from(config.endpoint.ws_url()),
                ttl: Some(config.ttl()),
            },
        ])
        .await
}
