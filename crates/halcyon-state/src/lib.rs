//! Halcyon State - durable consensus state and block execution
//!
//! This crate holds what survives a restart (the consensus `State`, its
//! per-height history and the decided blocks) and the `BlockExecutor` that
//! turns a decided block into the next state by running it through the
//! application. The mempool and evidence pool are consumed through traits.

pub mod block_store;
pub mod error;
pub mod events;
pub mod evidence;
pub mod execution;
pub mod mempool;
pub mod results;
pub mod state;
pub mod storage;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_util;

pub use block_store::{BlockStore, BlockStoreState};
pub use error::{ExecError, StateError, ValidationError};
pub use events::{Event, EventBus, RoundStateEvent};
pub use evidence::{EvidencePool, MemoryEvidencePool, NopEvidencePool};
pub use execution::{
    exec_block_on_proxy_app, exec_commit_block, update_state, validate_validator_updates,
    BlockExecutor,
};
pub use mempool::{Mempool, MempoolLock, NopMempool};
pub use results::{AbciResults, DeterministicResult};
pub use state::{make_genesis_state, median_time, State};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{AbciResponses, StateStore, VAL_SET_CHECKPOINT_INTERVAL};
