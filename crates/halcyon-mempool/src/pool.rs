use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use halcyon_app::{CheckTxKind, ClientError, RequestCheckTx, ResponseCheckTx, ResponseDeliverTx};
use halcyon_core::{tx_hash, Hash, Tx};
use halcyon_proxy::AppConnMempool;
use halcyon_state::{Mempool, MempoolLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::cache::TxCache;

/// Configuration for the mempool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the pool
    pub size: usize,
    /// Maximum total bytes of all pooled transactions
    pub max_txs_bytes: usize,
    /// Largest single transaction accepted
    pub max_tx_bytes: usize,
    /// Hashes remembered to reject resubmissions
    pub cache_size: usize,
    /// Re-run CheckTx on the remaining transactions after each block
    pub recheck: bool,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            size: 5_000,
            max_txs_bytes: 1024 * 1024 * 1024,
            max_tx_bytes: 1024 * 1024,
            cache_size: 10_000,
            recheck: true,
        }
    }
}

/// Mempool errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MempoolError {
    #[error("Transaction already exists in cache")]
    AlreadyExists,

    #[error("Mempool is full: {count} txs, {bytes} bytes")]
    PoolFull { count: usize, bytes: usize },

    #[error("Transaction too large: {size} bytes, max {max}")]
    TxTooLarge { size: usize, max: usize },

    #[error("Mempool connection error: {0}")]
    Proxy(#[from] ClientError),
}

#[derive(Debug, Clone)]
struct PoolEntry {
    tx: Tx,
    hash: Hash,
    gas_wanted: i64,
}

struct PoolInner {
    entries: VecDeque<PoolEntry>,
    by_hash: HashMap<Hash, usize>,
    bytes: usize,
    cache: TxCache,
}

impl PoolInner {
    fn insert(&mut self, entry: PoolEntry) {
        self.bytes += entry.tx.len();
        *self.by_hash.entry(entry.hash).or_default() += 1;
        self.entries.push_back(entry);
    }

    fn remove_where(&mut self, mut drop: impl FnMut(&PoolEntry) -> bool) -> usize {
        let before = self.entries.len();
        let mut kept = VecDeque::with_capacity(before);
        for entry in std::mem::take(&mut self.entries) {
            if drop(&entry) {
                self.bytes -= entry.tx.len();
                if let Some(n) = self.by_hash.get_mut(&entry.hash) {
                    *n -= 1;
                    if *n == 0 {
                        self.by_hash.remove(&entry.hash);
                    }
                }
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        before - self.entries.len()
    }
}

/// Transactions in arrival order, admitted through CheckTx.
pub struct FifoMempool {
    config: MempoolConfig,
    proxy: AppConnMempool,
    /// Held by block execution around Commit and by CheckTx.
    update_lock: Arc<Mutex<()>>,
    inner: RwLock<PoolInner>,
}

impl FifoMempool {
    pub fn new(config: MempoolConfig, proxy: AppConnMempool) -> Self {
        let cache = TxCache::new(config.cache_size);
        FifoMempool {
            config,
            proxy,
            update_lock: Arc::new(Mutex::new(())),
            inner: RwLock::new(PoolInner {
                entries: VecDeque::new(),
                by_hash: HashMap::new(),
                bytes: 0,
                cache,
            }),
        }
    }

    /// Ask the application to validate `tx` and pool it if accepted. The
    /// application's verdict comes back either way; errors are reserved for
    /// transactions that never reached it and for connection failures.
    pub async fn check_tx(&self, tx: Tx) -> Result<ResponseCheckTx, MempoolError> {
        if tx.len() > self.config.max_tx_bytes {
            return Err(MempoolError::TxTooLarge {
                size: tx.len(),
                max: self.config.max_tx_bytes,
            });
        }

        let _update = self.update_lock.lock().await;
        let hash = tx_hash(&tx);
        {
            let mut inner = self.inner.write().await;
            if inner.entries.len() >= self.config.size
                || inner.bytes + tx.len() > self.config.max_txs_bytes
            {
                return Err(MempoolError::PoolFull {
                    count: inner.entries.len(),
                    bytes: inner.bytes,
                });
            }
            if !inner.cache.push(hash) {
                return Err(MempoolError::AlreadyExists);
            }
        }

        let res = match self
            .proxy
            .check_tx(RequestCheckTx {
                tx: tx.clone(),
                kind: CheckTxKind::New,
            })
            .await
        {
            Ok(res) => res,
            Err(e) => {
                self.inner.write().await.cache.remove(&hash);
                return Err(e.into());
            }
        };

        let mut inner = self.inner.write().await;
        if res.is_ok() {
            inner.insert(PoolEntry {
                tx,
                hash,
                gas_wanted: res.gas_wanted,
            });
            debug!(tx = %hash.short(), size = inner.entries.len(), "added tx");
        } else {
            // Let a rejected tx be submitted again once it may be valid.
            inner.cache.remove(&hash);
            debug!(tx = %hash.short(), code = res.code, log = %res.log, "rejected tx");
        }
        Ok(res)
    }

    pub async fn contains(&self, tx: &[u8]) -> bool {
        self.inner.read().await.by_hash.contains_key(&tx_hash(tx))
    }

    pub async fn txs_bytes(&self) -> usize {
        self.inner.read().await.bytes
    }

    /// Drop every pooled transaction and forget the cache.
    pub async fn flush(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.by_hash.clear();
        inner.bytes = 0;
        inner.cache.reset();
    }

    async fn recheck(&self) -> Result<(), ClientError> {
        let pending: Vec<PoolEntry> = self.inner.read().await.entries.iter().cloned().collect();
        if pending.is_empty() {
            return Ok(());
        }

        let mut rejected = Vec::new();
        for entry in &pending {
            let res = self
                .proxy
                .check_tx(RequestCheckTx {
                    tx: entry.tx.clone(),
                    kind: CheckTxKind::Recheck,
                })
                .await?;
            if !res.is_ok() {
                rejected.push(entry.hash);
            }
        }

        if !rejected.is_empty() {
            let mut inner = self.inner.write().await;
            let removed = inner.remove_where(|e| rejected.contains(&e.hash));
            for hash in &rejected {
                inner.cache.remove(hash);
            }
            info!(removed, remaining = inner.entries.len(), "recheck dropped txs");
        }
        Ok(())
    }
}

#[async_trait]
impl Mempool for FifoMempool {
    async fn lock(&self) -> MempoolLock {
        self.update_lock.clone().lock_owned().await
    }

    async fn flush_app_conn(&self) -> Result<(), ClientError> {
        self.proxy.flush().await
    }

    async fn update(
        &self,
        height: u64,
        txs: &[Tx],
        results: &[ResponseDeliverTx],
    ) -> Result<(), ClientError> {
        {
            let mut inner = self.inner.write().await;

            let mut committed = Vec::with_capacity(txs.len());
            for (tx, res) in txs.iter().zip(results.iter()) {
                let hash = tx_hash(tx);
                if res.is_ok() {
                    // Committed: keep rejecting it from now on.
                    inner.cache.push(hash);
                } else {
                    inner.cache.remove(&hash);
                }
                committed.push(hash);
            }
            let removed = inner.remove_where(|e| committed.contains(&e.hash));
            debug!(height, removed, remaining = inner.entries.len(), "mempool update");
        }

        if self.config.recheck {
            self.recheck().await?;
        }
        Ok(())
    }

    async fn reap_max_bytes_max_gas(&self, max_bytes: i64, max_gas: i64) -> Vec<Tx> {
        let inner = self.inner.read().await;
        let mut total_bytes = 0i64;
        let mut total_gas = 0i64;
        let mut txs = Vec::new();
        for entry in &inner.entries {
            let size = entry.tx.len() as i64;
            if max_bytes >= 0 && total_bytes + size > max_bytes {
                break;
            }
            if max_gas >= 0 && total_gas + entry.gas_wanted > max_gas {
                break;
            }
            total_bytes += size;
            total_gas += entry.gas_wanted;
            txs.push(entry.tx.clone());
        }
        txs
    }

    async fn size(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}
