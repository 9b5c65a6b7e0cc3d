use halcyon_core::{Block, Commit};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StateError;
use crate::storage::{load, stage, Storage};

const BLOCK_STORE_STATE_KEY: &str = "block_store_state";

fn block_key(height: u64) -> String {
    format!("block:{}", height)
}

fn commit_key(height: u64) -> String {
    format!("commit:{}", height)
}

fn seen_commit_key(height: u64) -> String {
    format!("seen_commit:{}", height)
}

/// Range of heights currently held by the store. Both are 0 when empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockStoreState {
    pub base: u64,
    pub height: u64,
}

/// Stores decided blocks with two commits per height: the canonical one,
/// carried as `last_commit` by the next block, and the one this node saw
/// when it decided the block.
pub struct BlockStore<S: Storage> {
    storage: S,
    range: BlockStoreState,
}

impl<S: Storage> BlockStore<S> {
    pub fn new(storage: S) -> Result<Self, StateError> {
        let range = load(&storage, BLOCK_STORE_STATE_KEY)?.unwrap_or_default();
        Ok(BlockStore { storage, range })
    }

    /// Lowest height still stored
    pub fn base(&self) -> u64 {
        self.range.base
    }

    /// Highest height stored
    pub fn height(&self) -> u64 {
        self.range.height
    }

    pub fn size(&self) -> u64 {
        if self.range.height == 0 {
            0
        } else {
            self.range.height - self.range.base + 1
        }
    }

    pub fn load_block(&self, height: u64) -> Result<Option<Block>, StateError> {
        load(&self.storage, &block_key(height))
    }

    /// The canonical commit for `height`, available once `height + 1` is
    /// stored.
    pub fn load_block_commit(&self, height: u64) -> Result<Option<Commit>, StateError> {
        load(&self.storage, &commit_key(height))
    }

    pub fn load_seen_commit(&self, height: u64) -> Result<Option<Commit>, StateError> {
        load(&self.storage, &seen_commit_key(height))
    }

    /// Store a decided block with the commit that decided it. Heights must
    /// be contiguous; the first saved block may start anywhere.
    pub fn save_block(&mut self, block: &Block, seen_commit: &Commit) -> Result<(), StateError> {
        let height = block.height();
        if self.range.height > 0 && height != self.range.height + 1 {
            return Err(StateError::NonContiguousBlock {
                expected: self.range.height + 1,
                got: height,
            });
        }

        let mut range = self.range;
        if range.base == 0 {
            range.base = height;
        }
        range.height = height;

        let staged = stage(&mut self.storage, &block_key(height), block)
            .and_then(|_| {
                if block.last_commit.is_empty() {
                    Ok(())
                } else {
                    stage(&mut self.storage, &commit_key(height - 1), &block.last_commit)
                }
            })
            .and_then(|_| stage(&mut self.storage, &seen_commit_key(height), seen_commit))
            .and_then(|_| stage(&mut self.storage, BLOCK_STORE_STATE_KEY, &range));
        if let Err(e) = staged {
            self.storage.rollback();
            return Err(e);
        }
        if let Err(e) = self.storage.commit() {
            self.storage.rollback();
            return Err(e);
        }
        self.range = range;
        Ok(())
    }

    /// Remove every block below `retain_height`. Returns how many were
    /// removed.
    pub fn prune_blocks(&mut self, retain_height: u64) -> Result<u64, StateError> {
        if retain_height == 0 || retain_height <= self.range.base {
            return Ok(0);
        }
        if retain_height > self.range.height {
            return Err(StateError::PruneBeyondHeight {
                retain_height,
                height: self.range.height,
            });
        }

        for height in self.range.base..retain_height {
            self.storage.delete(block_key(height).as_bytes());
            self.storage.delete(commit_key(height).as_bytes());
            self.storage.delete(seen_commit_key(height).as_bytes());
        }
        let range = BlockStoreState {
            base: retain_height,
            height: self.range.height,
        };
        if let Err(e) = stage(&mut self.storage, BLOCK_STORE_STATE_KEY, &range) {
            self.storage.rollback();
            return Err(e);
        }
        if let Err(e) = self.storage.commit() {
            self.storage.rollback();
            return Err(e);
        }

        let pruned = retain_height - self.range.base;
        self.range = range;
        debug!(pruned, base = retain_height, "pruned blocks");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::make_genesis_state;
    use crate::storage::MemoryStorage;
    use crate::test_util::{commit_for, genesis_doc, keys};

    #[test]
    fn test_save_and_load_chain() {
        let keys = keys(4);
        let state = make_genesis_state(&genesis_doc(&keys, 10)).unwrap();
        let proposer = *state.validators.get_proposer().unwrap().address();
        let mut store = BlockStore::new(MemoryStorage::new()).unwrap();
        assert_eq!(store.size(), 0);

        let b1 = state.make_block(1, vec![], Commit::empty(), vec![], proposer);
        let c1 = commit_for(&state, &keys, &b1, 0);
        store.save_block(&b1, &c1).unwrap();

        let mut b2 = state.make_block(2, vec![], c1.clone(), vec![], proposer);
        b2.header.last_block_id = b1.block_id();
        let c2 = commit_for(&state, &keys, &b2, 0);
        store.save_block(&b2, &c2).unwrap();

        assert_eq!((store.base(), store.height(), store.size()), (1, 2, 2));
        assert_eq!(store.load_block(1).unwrap(), Some(b1));
        assert_eq!(store.load_block_commit(1).unwrap(), Some(c1));
        assert_eq!(store.load_seen_commit(2).unwrap(), Some(c2));
        assert_eq!(store.load_block_commit(2).unwrap(), None);
    }

    #[test]
    fn test_rejects_gaps() {
        let keys = keys(4);
        let state = make_genesis_state(&genesis_doc(&keys, 10)).unwrap();
        let proposer = *state.validators.get_proposer().unwrap().address();
        let mut store = BlockStore::new(MemoryStorage::new()).unwrap();

        let b1 = state.make_block(1, vec![], Commit::empty(), vec![], proposer);
        store.save_block(&b1, &commit_for(&state, &keys, &b1, 0)).unwrap();

        let b3 = state.make_block(3, vec![], Commit::empty(), vec![], proposer);
        let err = store.save_block(&b3, &Commit::empty()).unwrap_err();
        assert!(matches!(err, StateError::NonContiguousBlock { expected: 2, got: 3 }));
        assert_eq!(store.height(), 1);
    }

    #[test]
    fn test_prune_blocks() {
        let keys = keys(4);
        let state = make_genesis_state(&genesis_doc(&keys, 10)).unwrap();
        let proposer = *state.validators.get_proposer().unwrap().address();
        let mut store = BlockStore::new(MemoryStorage::new()).unwrap();
        for height in 1..=5 {
            let block = state.make_block(height, vec![], Commit::empty(), vec![], proposer);
            store.save_block(&block, &Commit::empty()).unwrap();
        }

        assert_eq!(store.prune_blocks(3).unwrap(), 2);
        assert_eq!(store.base(), 3);
        assert_eq!(store.load_block(2).unwrap(), None);
        assert!(store.load_block(3).unwrap().is_some());
        assert_eq!(store.prune_blocks(2).unwrap(), 0);
        assert!(store.prune_blocks(9).is_err());
    }
}
