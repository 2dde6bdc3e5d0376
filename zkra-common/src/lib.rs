//! Shared data model for the zkra rollup aggregation server.
//!
//! Everything that crosses a crate boundary lives here: the Merkle tree
//! primitives (hashes, leaves, hash paths), the join-split proof wire
//! layout, the rollup witness handed to the proof generator, and the
//! confirmed block type emitted by the chain adapter.

pub mod block;
pub mod merkle;
pub mod proof;
pub mod rollup;
pub mod tx;

pub use block::Block;
pub use merkle::{
    is_zero_leaf, non_empty_leaf, root_tree_key, HashPath, Leaf, TreeHash, LEAF_SIZE, ZERO_LEAF,
};
pub use proof::{
    JoinSplitProofData, JoinSplitTx, ProofDataError, SenderMeta, TxId, PROOF_DATA_SIZE, WORD_SIZE,
};
pub use rollup::{Rollup, RollupProofData, ROLLUP_HEADER_SIZE};
pub use tx::{TxType, TX_TYPES};
