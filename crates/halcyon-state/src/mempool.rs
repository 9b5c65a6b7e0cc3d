use async_trait::async_trait;
use halcyon_app::{ClientError, ResponseDeliverTx};
use halcyon_core::Tx;
use tokio::sync::OwnedMutexGuard;

/// Held while a block is committed to the application; no transaction can
/// be checked against half-updated application state.
pub type MempoolLock = OwnedMutexGuard<()>;

/// What consensus and block execution need from the transaction pool.
#[async_trait]
pub trait Mempool: Send + Sync {
    /// Block admission of new transactions until the guard is dropped.
    async fn lock(&self) -> MempoolLock;

    /// Wait for outstanding CheckTx calls on the mempool connection.
    async fn flush_app_conn(&self) -> Result<(), ClientError>;

    /// Drop `txs` committed at `height`; re-check what is left against the
    /// new application state. Called with the lock held.
    async fn update(
        &self,
        height: u64,
        txs: &[Tx],
        results: &[ResponseDeliverTx],
    ) -> Result<(), ClientError>;

    /// Transactions in arrival order, bounded by total bytes and gas. A
    /// negative bound means unlimited.
    async fn reap_max_bytes_max_gas(&self, max_bytes: i64, max_gas: i64) -> Vec<Tx>;

    async fn size(&self) -> usize;
}

/// A mempool that never holds anything. Used during replay and by nodes
/// that only follow the chain.
#[derive(Default)]
pub struct NopMempool {
    lock: std::sync::Arc<tokio::sync::Mutex<()>>,
}

impl NopMempool {
    pub fn new() -> Self {
        NopMempool::default()
    }
}

#[async_trait]
impl Mempool for NopMempool {
    async fn lock(&self) -> MempoolLock {
        self.lock.clone().lock_owned().await
    }

    async fn flush_app_conn(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn update(
        &self,
        _height: u64,
        _txs: &[Tx],
        _results: &[ResponseDeliverTx],
    ) -> Result<(), ClientError> {
        Ok(())
    }

    async fn reap_max_bytes_max_gas(&self, _max_bytes: i64, _max_gas: i64) -> Vec<Tx> {
        Vec::new()
    }

    async fn size(&self) -> usize {
        0
    }
}
