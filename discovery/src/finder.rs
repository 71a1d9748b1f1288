//! Live view of the discovered aggregator tier.
//!
//! The finder owns the endpoint map and publishes immutable snapshots through
//! a single-slot broadcast: readers always observe the latest snapshot and
//! may skip intermediate ones. While the store is unreachable the last
//! snapshot stays served; reconnection triggers a full list to reconcile.

use crate::endpoint::Endpoint;
use crate::store::{Node, Store, WatchEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub type Snapshot = Arc<HashMap<String, Endpoint>>;

pub struct Finder {
    snapshots: watch::Receiver<Snapshot>,
    handle: JoinHandle<()>,
}

impl Finder {
    /// Starts watching the structured prefix, e.g. `/meta/doppler`.
    pub fn start(store: Arc<dyn Store>, prefix: impl Into<String>) -> Self {
        let (tx, rx) = watch::channel(Snapshot::default());
        let handle = tokio::spawn(run(store, prefix.into(), tx));
        Self {
            snapshots: rx,
            handle,
        }
    }

    /// Latest snapshot, without waiting for a change.
    pub fn latest(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Subscription that always yields the most recent snapshot.
    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }
}

impl Drop for Finder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct View {
    endpoints: HashMap<String, Endpoint>,
    /// Store key -> endpoint id, so deletes can be applied by key.
    keys: HashMap<String, String>,
}

impl View {
    fn new() -> Self {
        Self {
            endpoints: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    fn apply_put(&mut self, node: &Node) {
        match serde_json::from_slice::<Endpoint>(&node.value) {
            Ok(endpoint) => {
                self.keys.insert(node.key.clone(), endpoint.id.clone());
                self.endpoints.insert(endpoint.id.clone(), endpoint);
            }
            Err(err) => {
                warn!(key = %node.key, error = %err, "ignoring unparsable endpoint record");
            }
        }
    }

    fn apply_delete(&mut self, key: &str) {
        if let Some(id) = self.keys.remove(key) {
            self.endpoints.remove(&id);
        }
    }

    fn rebuild(&mut self, nodes: Vec<Node>) {
        self.endpoints.clear();
        self.keys.clear();
        for node in &nodes {
            self.apply_put(node);
        }
    }

    fn snapshot(&self) -> Snapshot {
        Arc::new(self.endpoints.clone())
    }
}

async fn run(store: Arc<dyn Store>, prefix: String, tx: watch::Sender<Snapshot>) {
    let mut view = View::new();
    loop {
        let mut events = match store.watch(&prefix).await {
            Ok(events) => events,
            Err(err) => {
                warn!(%prefix, error = %err, "endpoint watch failed; retaining current snapshot");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        reconcile(store.as_ref(), &prefix, &mut view, &tx).await;

        while let Some(event) = events.recv().await {
            match event {
                WatchEvent::Put(node) => {
                    view.apply_put(&node);
                    let _ = tx.send(view.snapshot());
                }
                WatchEvent::Delete(key) => {
                    view.apply_delete(&key);
                    let _ = tx.send(view.snapshot());
                }
                WatchEvent::Resync => {
                    reconcile(store.as_ref(), &prefix, &mut view, &tx).await;
                }
            }
        }

        debug!(%prefix, "endpoint watch ended; retaining current snapshot");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn reconcile(
    store: &dyn Store,
    prefix: &str,
    view: &mut View,
    tx: &watch::Sender<Snapshot>,
) {
    match store.list(prefix).await {
        Ok(nodes) => {
            view.rebuild(nodes);
            let _ = tx.send(view.snapshot());
        }
        Err(err) => {
            warn!(%prefix, error = %err, "endpoint list failed; retaining current snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{announce, AnnounceConfig, META_ROOT};
    use crate::store::MemoryStore;
    use bytes::Bytes;

    fn endpoint(id: &str, zone: &str) -> Endpoint {
        Endpoint {
            id: id.to_string(),
            host: "10.0.0.1".to_string(),
            ws_port: 8081,
            grpc_port: 8082,
            zone: zone.to_string(),
            protocols: vec!["ws".to_string()],
        }
    }

    async fn wait_for<F: Fn(&Snapshot) -> bool>(
        snapshots: &mut watch::Receiver<Snapshot>,
        predicate: F,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if predicate(&snapshots.borrow_and_update()) {
                    return;
                }
                snapshots.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot condition");
    }

    #[tokio::test]
    async fn discovers_existing_and_new_announcements() {
        let store = Arc::new(MemoryStore::new());
        let seeded = endpoint("doppler-0", "z1");
        store
            .put(
                "/meta/doppler/z1/doppler-0/0",
                Bytes::from(serde_json::to_vec(&seeded).unwrap()),
                None,
            )
            .await
            .unwrap();

        let finder = Finder::start(store.clone(), "/meta/doppler");
        let mut snapshots = finder.snapshots();
        wait_for(&mut snapshots, |snap| snap.len() == 1).await;
        assert_eq!(finder.latest().get("doppler-0"), Some(&seeded));

        let _announcer = announce(
            store.clone(),
            AnnounceConfig {
                component: "doppler".to_string(),
                interval: Duration::from_secs(1),
                endpoint: endpoint("doppler-1", "z2"),
                index: "0".to_string(),
            },
        );
        wait_for(&mut snapshots, |snap| snap.len() == 2).await;
        assert!(finder.latest().contains_key("doppler-1"));
    }

    #[tokio::test]
    async fn removes_deleted_announcements() {
        let store = Arc::new(MemoryStore::new());
        let key = format!("{META_ROOT}/doppler/z1/doppler-0/0");
        store
            .put(
                &key,
                Bytes::from(serde_json::to_vec(&endpoint("doppler-0", "z1")).unwrap()),
                None,
            )
            .await
            .unwrap();

        let finder = Finder::start(store.clone(), "/meta/doppler");
        let mut snapshots = finder.snapshots();
        wait_for(&mut snapshots, |snap| snap.len() == 1).await;

        store.delete(&key).await.unwrap();
        wait_for(&mut snapshots, |snap| snap.is_empty()).await;
    }

    #[tokio::test]
    async fn ignores_garbage_records() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("/meta/doppler/z1/bad/0", Bytes::from_static(b"not json"), None)
            .await
            .unwrap();

        let finder = Finder::start(store.clone(), "/meta/doppler");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(finder.latest().is_empty());
    }
}
