use halcyon_app::ResponseDeliverTx;
use halcyon_core::serialize::CanonicalEncoder;
use halcyon_core::{hash_from_byte_slices, proofs_from_byte_slices, Hash, MerkleProof};

/// The part of a DeliverTx response that every node must agree on. Logs,
/// info and events are left out: they may differ between app builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterministicResult {
    pub code: u32,
    pub data: Vec<u8>,
    pub gas_wanted: i64,
    pub gas_used: i64,
}

impl DeterministicResult {
    pub fn bytes(&self) -> Vec<u8> {
        CanonicalEncoder::new()
            .u32(self.code)
            .bytes(&self.data)
            .i64(self.gas_wanted)
            .i64(self.gas_used)
            .finish()
    }
}

impl From<&ResponseDeliverTx> for DeterministicResult {
    fn from(res: &ResponseDeliverTx) -> Self {
        DeterministicResult {
            code: res.code,
            data: res.data.clone(),
            gas_wanted: res.gas_wanted,
            gas_used: res.gas_used,
        }
    }
}

/// Results of one block's transactions, hashed into the next header's
/// `last_results_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AbciResults(Vec<DeterministicResult>);

impl AbciResults {
    pub fn new(responses: &[ResponseDeliverTx]) -> Self {
        AbciResults(responses.iter().map(DeterministicResult::from).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeterministicResult> {
        self.0.get(index)
    }

    fn leaves(&self) -> Vec<Vec<u8>> {
        self.0.iter().map(DeterministicResult::bytes).collect()
    }

    pub fn hash(&self) -> Hash {
        hash_from_byte_slices(&self.leaves())
    }

    /// Inclusion proof of result `index` against `hash()`.
    pub fn prove_result(&self, index: usize) -> Option<MerkleProof> {
        let (_, mut proofs) = proofs_from_byte_slices(&self.leaves());
        if index < proofs.len() {
            Some(proofs.swap_remove(index))
        } else {
            None
        }
    }
}
