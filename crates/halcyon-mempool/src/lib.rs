//! Halcyon Mempool - Transaction pool
//!
//! A FIFO pool that admits transactions through the application's CheckTx on
//! the mempool connection, hands them to proposers in arrival order and
//! re-checks what is left after every committed block.

pub mod cache;
pub mod pool;

pub use cache::TxCache;
pub use pool::{FifoMempool, MempoolConfig, MempoolError};
