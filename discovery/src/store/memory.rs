use super::{Entry, Node, Store, StoreError, WatchEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const WATCH_BUFFER: usize = 256;

/// In-process [Store] with real TTL and watch semantics.
///
/// Expiry is evaluated lazily on read, against the tokio clock, so tests can
/// drive it with a paused runtime.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Stored>,
    watchers: Vec<Watcher>,
    index: u64,
    failures: usize,
}

struct Stored {
    value: Bytes,
    expires_at: Option<Instant>,
    modified_index: u64,
}

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<WatchEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` write operations fail with [StoreError::Unavailable].
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.lock().unwrap().failures = n;
    }
}

impl Inner {
    fn live(&mut self, key: &str) -> Option<&Stored> {
        if let Some(stored) = self.entries.get(key) {
            if let Some(expires_at) = stored.expires_at {
                if expires_at <= Instant::now() {
                    self.entries.remove(key);
                    return None;
                }
            }
        }
        self.entries.get(key)
    }

    fn node(key: &str, stored: &Stored) -> Node {
        Node {
            key: key.to_string(),
            value: stored.value.clone(),
            ttl: stored
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now())),
            modified_index: stored.modified_index,
        }
    }

    fn write(&mut self, key: &str, value: Bytes, ttl: Option<Duration>) -> Node {
        self.index += 1;
        let stored = Stored {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
            modified_index: self.index,
        };
        let node = Self::node(key, &stored);
        self.entries.insert(key.to_string(), stored);
        self.notify(key, WatchEvent::Put(node.clone()));
        node
    }

    fn consume_failure(&mut self) -> Result<(), StoreError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn notify(&mut self, key: &str, event: WatchEvent) {
        self.watchers.retain(|watcher| {
            if !key.starts_with(&watcher.prefix) {
                return !watcher.tx.is_closed();
            }
            watcher.tx.try_send(event.clone()).is_ok() || !watcher.tx.is_closed()
        });
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.consume_failure()?;
        inner.write(key, value, ttl);
        Ok(())
    }

    async fn put_many(&self, entries: Vec<Entry>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.consume_failure()?;
        for entry in entries {
            inner.write(&entry.key, entry.value, entry.ttl);
        }
        Ok(())
    }

    async fn create(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.consume_failure()?;
        if inner.live(key).is_some() {
            return Err(StoreError::KeyExists);
        }
        inner.write(key, value, Some(ttl));
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &[u8],
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.consume_failure()?;
        match inner.live(key).map(|stored| stored.value.clone()) {
            Some(current) if current.as_ref() == expect => {
                inner.write(key, value, Some(ttl));
                Ok(())
            }
            Some(_) => Err(StoreError::CompareFailed),
            None => Err(StoreError::NotFound),
        }
    }

    async fn compare_and_delete(&self, key: &str, expect: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.consume_failure()?;
        match inner.live(key).map(|stored| stored.value.clone()) {
            Some(current) if current.as_ref() == expect => {
                inner.entries.remove(key);
                inner.notify(key, WatchEvent::Delete(key.to_string()));
                Ok(())
            }
            Some(_) => Err(StoreError::CompareFailed),
            None => Err(StoreError::NotFound),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Node>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.live(key).map(|stored| Inner::node(key, stored)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Node>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        let mut nodes = Vec::new();
        for key in keys {
            if let Some(stored) = inner.live(&key) {
                nodes.push(Inner::node(&key, stored));
            }
        }
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(nodes)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.consume_failure()?;
        if inner.entries.remove(key).is_none() {
            return Err(StoreError::NotFound);
        }
        inner.notify(key, WatchEvent::Delete(key.to_string()));
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StoreError> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.inner.lock().unwrap().watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}
