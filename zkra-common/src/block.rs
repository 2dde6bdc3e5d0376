//! Confirmed rollup blocks.

use crate::merkle::Leaf;
use crate::rollup::RollupProofData;

/// A rollup confirmed on chain, decoded from a `processRollup` transaction.
///
/// Emitted by the blockchain adapter, consumed by the state serializer.
#[derive(Clone, Debug)]
pub struct Block {
    pub block_num: u64,
    /// Unix seconds of the containing chain block.
    pub created: u64,
    pub tx_hash: [u8; 32],
    pub rollup_id: u64,
    pub rollup_size: usize,
    pub data_start_index: u64,
    /// Leaf span reserved for this rollup (`rollup_size * 2`).
    pub num_data_entries: usize,
    /// Note commitments to insert, in order from `data_start_index`.
    pub data_entries: Vec<Leaf>,
    /// Nullifiers to mark spent.
    pub nullifiers: Vec<u128>,
    pub rollup_proof_data: Vec<u8>,
    pub viewing_keys_data: Vec<u8>,
}

impl Block {
    /// Assemble a block from decoded rollup proof data and its chain
    /// context.
    pub fn from_rollup_proof(
        proof: RollupProofData,
        proof_bytes: Vec<u8>,
        viewing_keys_data: Vec<u8>,
        block_num: u64,
        created: u64,
        tx_hash: [u8; 32],
    ) -> Self {
        Self {
            block_num,
            created,
            tx_hash,
            rollup_id: proof.rollup_id,
            rollup_size: proof.rollup_size,
            data_start_index: proof.data_start_index,
            num_data_entries: proof.num_data_entries,
            data_entries: proof.data_entries,
            nullifiers: proof.nullifiers,
            rollup_proof_data: proof_bytes,
            viewing_keys_data,
        }
    }
}
