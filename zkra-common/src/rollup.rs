//! The rollup batch witness and the rollup proof wire format.
//!
//! A `Rollup` is the immutable witness the builder produces for a closed
//! batch: the data-tree snapshot before and after applying the batch, plus
//! per-tx nullifier and root-membership paths. It is serialized with
//! length-prefixed framing and handed to the external proof generator.
//!
//! The generator's output (and the calldata recovered from a confirmed
//! `processRollup` transaction) leads with a fixed header of 32-byte words:
//!
//! ```text
//! word 0  rollup id          word 5  old nullifier root
//! word 1  rollup size        word 6  new nullifier root
//! word 2  data start index   word 7  old root-tree root
//! word 3  old data root      word 8  new root-tree root
//! word 4  new data root
//! ```
//!
//! followed by `rollup_size` inner tx slots of [`PROOF_DATA_SIZE`] bytes
//! each; unfilled slots are zero.

use crate::merkle::{HashPath, Leaf, TreeHash};
use crate::proof::{
    leaf_at, word, word_u128, word_u32, word_u64, ProofDataError, PROOF_DATA_SIZE, WORD_SIZE,
};

/// Words in the rollup proof header.
pub const ROLLUP_HEADER_WORDS: usize = 9;

/// Size of the rollup proof header in bytes.
pub const ROLLUP_HEADER_SIZE: usize = ROLLUP_HEADER_WORDS * WORD_SIZE;

/// The batch witness consumed by the proof generator.
#[derive(Clone, Debug)]
pub struct Rollup {
    pub rollup_id: u64,
    pub rollup_size: usize,
    pub data_start_index: u64,
    /// Raw tx proof blobs, admission order. May hold fewer than
    /// `rollup_size` entries; the prover fills the rest with null witnesses.
    pub proofs: Vec<Vec<u8>>,
    /// Sub-root of the data tree spanning exactly this batch's new notes.
    pub rollup_root: TreeHash,
    pub old_data_root: TreeHash,
    pub new_data_root: TreeHash,
    pub old_data_path: HashPath,
    pub new_data_path: HashPath,
    pub old_null_root: TreeHash,
    /// Nullifier root after each individual spent-leaf insertion.
    pub new_null_roots: Vec<TreeHash>,
    pub old_null_paths: Vec<HashPath>,
    pub new_null_paths: Vec<HashPath>,
    pub old_root_root: TreeHash,
    pub old_root_paths: Vec<HashPath>,
}

impl Rollup {
    /// Serialize the witness for the proof generator request.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.rollup_id.to_le_bytes());
        out.extend_from_slice(&(self.rollup_size as u32).to_le_bytes());
        out.extend_from_slice(&self.data_start_index.to_le_bytes());

        put_blobs(&mut out, &self.proofs);

        out.extend_from_slice(&self.rollup_root);
        out.extend_from_slice(&self.old_data_root);
        out.extend_from_slice(&self.new_data_root);
        put_path(&mut out, &self.old_data_path);
        put_path(&mut out, &self.new_data_path);

        out.extend_from_slice(&self.old_null_root);
        put_hashes(&mut out, &self.new_null_roots);
        put_paths(&mut out, &self.old_null_paths);
        put_paths(&mut out, &self.new_null_paths);

        out.extend_from_slice(&self.old_root_root);
        put_paths(&mut out, &self.old_root_paths);
        out
    }
}

fn put_blobs(out: &mut Vec<u8>, blobs: &[Vec<u8>]) {
    out.extend_from_slice(&(blobs.len() as u32).to_le_bytes());
    for blob in blobs {
        out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        out.extend_from_slice(blob);
    }
}

fn put_path(out: &mut Vec<u8>, path: &HashPath) {
    out.extend_from_slice(&(path.0.len() as u32).to_le_bytes());
    for [left, right] in &path.0 {
        out.extend_from_slice(left);
        out.extend_from_slice(right);
    }
}

fn put_paths(out: &mut Vec<u8>, paths: &[HashPath]) {
    out.extend_from_slice(&(paths.len() as u32).to_le_bytes());
    for path in paths {
        put_path(out, path);
    }
}

fn put_hashes(out: &mut Vec<u8>, hashes: &[TreeHash]) {
    out.extend_from_slice(&(hashes.len() as u32).to_le_bytes());
    for hash in hashes {
        out.extend_from_slice(hash);
    }
}

/// Decoded rollup proof: the header fields plus the note commitments and
/// nullifiers recovered from the inner tx slots.
#[derive(Clone, Debug)]
pub struct RollupProofData {
    pub rollup_id: u64,
    pub rollup_size: usize,
    pub data_start_index: u64,
    pub old_data_root: TreeHash,
    pub new_data_root: TreeHash,
    pub old_null_root: TreeHash,
    pub new_null_root: TreeHash,
    pub old_root_root: TreeHash,
    pub new_root_root: TreeHash,
    /// New note commitments from the populated tx slots, in order.
    pub data_entries: Vec<Leaf>,
    /// Nullifiers revealed by the populated tx slots.
    pub nullifiers: Vec<u128>,
    /// Leaf span this rollup occupies in the data tree (`rollup_size * 2`).
    pub num_data_entries: usize,
}

impl RollupProofData {
    /// Decode a rollup proof (or the `proofData` argument recovered from
    /// `processRollup` calldata).
    pub fn parse(bytes: &[u8]) -> Result<Self, ProofDataError> {
        if bytes.len() < ROLLUP_HEADER_SIZE {
            return Err(ProofDataError::TooShort {
                got: bytes.len(),
                need: ROLLUP_HEADER_SIZE,
            });
        }
        let rollup_size = word_u32(bytes, 1) as usize;
        let need = ROLLUP_HEADER_SIZE + rollup_size * PROOF_DATA_SIZE;
        if bytes.len() < need {
            return Err(ProofDataError::TooShort {
                got: bytes.len(),
                need,
            });
        }

        let mut data_entries = Vec::new();
        let mut nullifiers = Vec::new();
        for slot in 0..rollup_size {
            let inner = &bytes[ROLLUP_HEADER_SIZE + slot * PROOF_DATA_SIZE..];
            if inner[..PROOF_DATA_SIZE].iter().all(|b| *b == 0) {
                continue;
            }
            data_entries.push(leaf_at(inner, 4));
            data_entries.push(leaf_at(inner, 6));
            for nullifier in [word_u128(inner, 8), word_u128(inner, 9)] {
                if nullifier != 0 {
                    nullifiers.push(nullifier);
                }
            }
        }

        Ok(Self {
            rollup_id: word_u64(bytes, 0),
            rollup_size,
            data_start_index: word_u64(bytes, 2),
            old_data_root: *word(bytes, 3),
            new_data_root: *word(bytes, 4),
            old_null_root: *word(bytes, 5),
            new_null_root: *word(bytes, 6),
            old_root_root: *word(bytes, 7),
            new_root_root: *word(bytes, 8),
            data_entries,
            nullifiers,
            num_data_entries: rollup_size * 2,
        })
    }

    /// Encode a rollup proof from a witness.
    ///
    /// This is the layout the external prover emits; it is exposed so mock
    /// provers and tests can synthesize bit-compatible proofs.
    pub fn encode(rollup: &Rollup, new_null_root: TreeHash, new_root_root: TreeHash) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            ROLLUP_HEADER_SIZE + rollup.rollup_size * PROOF_DATA_SIZE,
        );
        out.extend_from_slice(&word_from_u64(rollup.rollup_id));
        out.extend_from_slice(&word_from_u64(rollup.rollup_size as u64));
        out.extend_from_slice(&word_from_u64(rollup.data_start_index));
        out.extend_from_slice(&rollup.old_data_root);
        out.extend_from_slice(&rollup.new_data_root);
        out.extend_from_slice(&rollup.old_null_root);
        out.extend_from_slice(&new_null_root);
        out.extend_from_slice(&rollup.old_root_root);
        out.extend_from_slice(&new_root_root);
        for slot in 0..rollup.rollup_size {
            match rollup.proofs.get(slot) {
                Some(proof) => out.extend_from_slice(&proof[..PROOF_DATA_SIZE]),
                None => out.extend_from_slice(&[0u8; PROOF_DATA_SIZE]),
            }
        }
        out
    }
}

fn word_from_u64(value: u64) -> [u8; WORD_SIZE] {
    let mut w = [0u8; WORD_SIZE];
    w[WORD_SIZE - 8..].copy_from_slice(&value.to_be_bytes());
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::ZERO_LEAF;

    fn empty_path() -> HashPath {
        HashPath(vec![[[0u8; 32]; 2]; 3])
    }

    fn sample_rollup(proofs: Vec<Vec<u8>>) -> Rollup {
        Rollup {
            rollup_id: 7,
            rollup_size: 2,
            data_start_index: 4,
            proofs,
            rollup_root: [1u8; 32],
            old_data_root: [2u8; 32],
            new_data_root: [3u8; 32],
            old_data_path: empty_path(),
            new_data_path: empty_path(),
            old_null_root: [4u8; 32],
            new_null_roots: vec![],
            old_null_paths: vec![],
            new_null_paths: vec![],
            old_root_root: [5u8; 32],
            old_root_paths: vec![],
        }
    }

    fn inner_proof(nullifier1: u8, nullifier2: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; PROOF_DATA_SIZE];
        bytes[4 * WORD_SIZE..6 * WORD_SIZE].fill(0xaa);
        bytes[6 * WORD_SIZE..8 * WORD_SIZE].fill(0xbb);
        bytes[9 * WORD_SIZE - 1] = nullifier1;
        bytes[10 * WORD_SIZE - 1] = nullifier2;
        bytes
    }

    #[test]
    fn encode_parse_round_trip() {
        let rollup = sample_rollup(vec![inner_proof(9, 10)]);
        let encoded = RollupProofData::encode(&rollup, [6u8; 32], [5u8; 32]);
        let parsed = RollupProofData::parse(&encoded).unwrap();

        assert_eq!(parsed.rollup_id, 7);
        assert_eq!(parsed.rollup_size, 2);
        assert_eq!(parsed.data_start_index, 4);
        assert_eq!(parsed.old_data_root, [2u8; 32]);
        assert_eq!(parsed.new_data_root, [3u8; 32]);
        assert_eq!(parsed.num_data_entries, 4);
        // one real tx slot, one zero pad slot
        assert_eq!(parsed.data_entries.len(), 2);
        assert_ne!(parsed.data_entries[0], ZERO_LEAF);
        assert_eq!(parsed.nullifiers, vec![9, 10]);
    }

    #[test]
    fn parse_rejects_truncated_proof() {
        let rollup = sample_rollup(vec![inner_proof(1, 2)]);
        let encoded = RollupProofData::encode(&rollup, [0u8; 32], [0u8; 32]);
        assert!(RollupProofData::parse(&encoded[..encoded.len() - 1]).is_err());
    }
}
