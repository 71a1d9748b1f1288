//! The consistent key/value store the control plane lives in.
//!
//! The store itself is an external collaborator; everything in this crate
//! talks to it through [Store]. [EtcdStore] adapts a real etcd cluster,
//! [MemoryStore] is the in-process stand-in tests drive.

mod etcd;
mod memory;

pub use etcd::{EtcdOptions, EtcdStore, EtcdTlsOptions};
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key already exists")]
    KeyExists,
    #[error("key not found")]
    NotFound,
    #[error("comparison failed")]
    CompareFailed,
    #[error("store deadline exceeded")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A key as read back from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub key: String,
    pub value: Bytes,
    /// Remaining time to live, if the key carries one.
    pub ttl: Option<Duration>,
    /// Monotonically increasing per-key write counter.
    pub modified_index: u64,
}

/// A key to be written, possibly with a time to live.
#[derive(Clone, Debug)]
pub struct Entry {
    pub key: String,
    pub value: Bytes,
    pub ttl: Option<Duration>,
}

#[derive(Clone, Debug)]
pub enum WatchEvent {
    Put(Node),
    Delete(String),
    /// The watch lost its place; consumers must re-list to reconcile.
    Resync,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Writes a batch of keys atomically.
    async fn put_many(&self, entries: Vec<Entry>) -> Result<(), StoreError>;

    /// Writes the key only if it does not exist yet.
    async fn create(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    /// Replaces the key only while its current value equals `expect`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &[u8],
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Deletes the key only while its current value equals `expect`.
    async fn compare_and_delete(&self, key: &str, expect: &[u8]) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Node>, StoreError>;

    async fn list(&self, prefix: &str) -> Result<Vec<Node>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Streams changes under a prefix until the receiver is dropped.
    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StoreError>;
}
