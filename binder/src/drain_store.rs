//! Publication of tenant drains into the registry.
//!
//! Key: `/loggregator/services/<appId>/<sha1-hex(url)>`, value: the url
//! itself, TTL from config. Two updates for the same (app, url) write the
//! same bytes to the same key, so publication is idempotent and the TTL does
//! the forgetting.

use crate::poller::AppDrains;
use bytes::Bytes;
use downpour_discovery::{Entry, Store, StoreError};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DRAIN_ROOT: &str = "/loggregator/services";

pub struct DrainStore {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl DrainStore {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn update(&self, drains: &AppDrains) -> Result<(), StoreError> {
        for (app_id, urls) in drains {
            self.update_app(app_id, urls).await?;
        }
        Ok(())
    }

    async fn update_app(&self, app_id: &str, urls: &[String]) -> Result<(), StoreError> {
        let mut entries = Vec::new();
        for url in urls {
            if url.trim().is_empty() {
                warn!(app_id, "skipping blank drain url");
                continue;
            }
            debug!(app_id, url, "publishing drain");
            entries.push(Entry {
                key: drain_key(app_id, url),
                value: Bytes::from(url.clone()),
                ttl: Some(self.ttl),
            });
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.store.put_many(entries).await
    }
}

pub fn drain_key(app_id: &str, url: &str) -> String {
    let digest = Sha1::digest(url.as_bytes());
    format!("{DRAIN_ROOT}/{app_id}/{}", hex::encode(digest))
}
