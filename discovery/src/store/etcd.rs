use super::{Entry, Node, Store, StoreError, WatchEvent};
use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{
    Certificate, Client, Compare, CompareOp, ConnectOptions, EventType, GetOptions, Identity,
    PutOptions, TlsOptions, Txn, TxnOp, WatchOptions,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

/// Ceiling on any single store round trip.
const STORE_DEADLINE: Duration = Duration::from_secs(60);
const WATCH_BUFFER: usize = 256;
const WATCH_RETRY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct EtcdOptions {
    pub urls: Vec<String>,
    pub tls: Option<EtcdTlsOptions>,
    pub max_concurrent_requests: usize,
}

#[derive(Clone, Debug)]
pub struct EtcdTlsOptions {
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: String,
}

/// [Store] adapter over an etcd cluster.
///
/// TTLs map to leases, conditional writes to single-op transactions. Client
/// concurrency is bounded the way the original deployment bounded its store
/// worker pool.
pub struct EtcdStore {
    client: Client,
    permits: Arc<Semaphore>,
}

impl EtcdStore {
    pub async fn connect(options: EtcdOptions) -> Result<Self, StoreError> {
        let mut connect = ConnectOptions::new();
        if let Some(tls) = &options.tls {
            let ca = tokio::fs::read(&tls.ca_file)
                .await
                .map_err(|e| StoreError::Unavailable(format!("read ca: {e}")))?;
            let cert = tokio::fs::read(&tls.cert_file)
                .await
                .map_err(|e| StoreError::Unavailable(format!("read cert: {e}")))?;
            let key = tokio::fs::read(&tls.key_file)
                .await
                .map_err(|e| StoreError::Unavailable(format!("read key: {e}")))?;
            connect = connect.with_tls(
                TlsOptions::new()
                    .ca_certificate(Certificate::from_pem(ca))
                    .identity(Identity::from_pem(cert, key)),
            );
        }
        let client = Client::connect(&options.urls, Some(connect))
            .await
            .map_err(unavailable)?;
        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(options.max_concurrent_requests.max(1))),
        })
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, etcd_client::Error>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("store closed".to_string()))?;
        match tokio::time::timeout(STORE_DEADLINE, call).await {
            Ok(result) => result.map_err(unavailable),
            Err(_) => Err(StoreError::Timeout),
        }
    }

    async fn lease_for(client: &mut Client, ttl: Duration) -> Result<i64, etcd_client::Error> {
        let lease = client.lease_grant(ttl.as_secs().max(1) as i64, None).await?;
        Ok(lease.id())
    }

    async fn put_options(
        client: &mut Client,
        ttl: Option<Duration>,
    ) -> Result<Option<PutOptions>, etcd_client::Error> {
        match ttl {
            Some(ttl) => {
                let lease = Self::lease_for(client, ttl).await?;
                Ok(Some(PutOptions::new().with_lease(lease)))
            }
            None => Ok(None),
        }
    }
}

fn unavailable(err: etcd_client::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl Store for EtcdStore {
    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let key = key.to_string();
        self.bounded(async move {
            let options = Self::put_options(&mut client, ttl).await?;
            client.put(key, value.to_vec(), options).await?;
            Ok(())
        })
        .await
    }

    async fn put_many(&self, entries: Vec<Entry>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut client = self.client.clone();
        self.bounded(async move {
            let mut ops = Vec::with_capacity(entries.len());
            for entry in entries {
                let options = Self::put_options(&mut client, entry.ttl).await?;
                ops.push(TxnOp::put(entry.key, entry.value.to_vec(), options));
            }
            client.txn(Txn::new().and_then(ops)).await?;
            Ok(())
        })
        .await
    }

    async fn create(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let key = key.to_string();
        let response = self
            .bounded(async move {
                let options = Self::put_options(&mut client, Some(ttl)).await?;
                let txn = Txn::new()
                    .when(vec![Compare::create_revision(
                        key.as_str(),
                        CompareOp::Equal,
                        0,
                    )])
                    .and_then(vec![TxnOp::put(key.as_str(), value.to_vec(), options)]);
                client.txn(txn).await
            })
            .await?;
        if response.succeeded() {
            Ok(())
        } else {
            Err(StoreError::KeyExists)
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &[u8],
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let key = key.to_string();
        let expect = expect.to_vec();
        let response = self
            .bounded(async move {
                let options = Self::put_options(&mut client, Some(ttl)).await?;
                let txn = Txn::new()
                    .when(vec![Compare::value(key.as_str(), CompareOp::Equal, expect)])
                    .and_then(vec![TxnOp::put(key.as_str(), value.to_vec(), options)]);
                client.txn(txn).await
            })
            .await?;
        if response.succeeded() {
            Ok(())
        } else {
            Err(StoreError::CompareFailed)
        }
    }

    async fn compare_and_delete(&self, key: &str, expect: &[u8]) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let key = key.to_string();
        let expect = expect.to_vec();
        let response = self
            .bounded(async move {
                let txn = Txn::new()
                    .when(vec![Compare::value(key.as_str(), CompareOp::Equal, expect)])
                    .and_then(vec![TxnOp::delete(key.as_str(), None)]);
                client.txn(txn).await
            })
            .await?;
        if response.succeeded() {
            Ok(())
        } else {
            Err(StoreError::CompareFailed)
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Node>, StoreError> {
        let mut client = self.client.clone();
        let key = key.to_string();
        self.bounded(async move {
            let response = client.get(key, None).await?;
            let Some(kv) = response.kvs().first() else {
                return Ok(None);
            };
            let ttl = if kv.lease() != 0 {
                let lease = client.lease_time_to_live(kv.lease(), None).await?;
                (lease.ttl() > 0).then(|| Duration::from_secs(lease.ttl() as u64))
            } else {
                None
            };
            Ok(Some(Node {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: Bytes::copy_from_slice(kv.value()),
                ttl,
                modified_index: kv.mod_revision() as u64,
            }))
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Node>, StoreError> {
        let mut client = self.client.clone();
        let prefix = prefix.to_string();
        self.bounded(async move {
            let response = client
                .get(prefix, Some(GetOptions::new().with_prefix()))
                .await?;
            Ok(response
                .kvs()
                .iter()
                .map(|kv| Node {
                    key: String::from_utf8_lossy(kv.key()).into_owned(),
                    value: Bytes::copy_from_slice(kv.value()),
                    ttl: None,
                    modified_index: kv.mod_revision() as u64,
                })
                .collect())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let key = key.to_string();
        self.bounded(async move {
            client.delete(key, None).await?;
            Ok(())
        })
        .await
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StoreError> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let client = self.client.clone();
        let prefix = prefix.to_string();
        tokio::spawn(watch_loop(client, prefix, tx));
        Ok(rx)
    }
}

/// Keeps a prefix watch alive across stream failures. Every re-establishment
/// is preceded by a [WatchEvent::Resync] so consumers re-list.
async fn watch_loop(mut client: Client, prefix: String, tx: mpsc::Sender<WatchEvent>) {
    let mut first = true;
    while !tx.is_closed() {
        if !first && tx.send(WatchEvent::Resync).await.is_err() {
            return;
        }
        first = false;

        let stream = client
            .watch(prefix.as_str(), Some(WatchOptions::new().with_prefix()))
            .await;
        let (_watcher, mut stream) = match stream {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%prefix, error = %err, "store watch failed; retrying");
                tokio::time::sleep(WATCH_RETRY).await;
                continue;
            }
        };

        loop {
            match stream.message().await {
                Ok(Some(response)) => {
                    for event in response.events() {
                        let Some(kv) = event.kv() else { continue };
                        let key = String::from_utf8_lossy(kv.key()).into_owned();
                        let out = if event.event_type() == EventType::Delete {
                            WatchEvent::Delete(key)
                        } else {
                            WatchEvent::Put(Node {
                                key,
                                value: Bytes::copy_from_slice(kv.value()),
                                ttl: None,
                                modified_index: kv.mod_revision() as u64,
                            })
                        };
                        if tx.send(out).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%prefix, error = %err, "store watch interrupted; retrying");
                    break;
                }
            }
        }
        tokio::time::sleep(WATCH_RETRY).await;
    }
}
