//! Join-split proof parsing.
//!
//! Client proofs arrive as an opaque blob whose leading section is a fixed
//! layout of 32-byte words that the aggregator needs to read without running
//! the verifier:
//!
//! ```text
//! word  0   tx-type tag (low byte)
//! word  1   public input value
//! word  2   public output value
//! word  3   asset id (low 4 bytes) / bridge id (low 8 bytes) for defi txs
//! words 4-5 new note commitment 1 (64 bytes)
//! words 6-7 new note commitment 2 (64 bytes)
//! word  8   nullifier 1 (low 16 bytes are the tree key)
//! word  9   nullifier 2
//! word 10   note tree root the input notes were proven against
//! word 11   tx fee, denominated in the fee asset
//! ```
//!
//! Anything shorter, or carrying an unknown tag, is rejected at admission.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merkle::{Leaf, TreeHash, LEAF_SIZE};
use crate::tx::TxType;

/// Size of one proof-data word.
pub const WORD_SIZE: usize = 32;

/// Number of structured words at the head of a tx proof.
pub const PROOF_DATA_WORDS: usize = 12;

/// Size of the structured section of a tx proof.
pub const PROOF_DATA_SIZE: usize = WORD_SIZE * PROOF_DATA_WORDS;

/// Errors from decoding proof blobs.
#[derive(Debug, Error)]
pub enum ProofDataError {
    #[error("proof data too short: {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },

    #[error("unknown tx type tag: {0}")]
    UnknownTxType(u8),
}

/// Identifier of an admitted tx: the blake3 hash of its proof blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn from_proof(proof_bytes: &[u8]) -> Self {
        Self(*blake3::hash(proof_bytes).as_bytes())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Fields extracted from a client proof blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinSplitProofData {
    pub tx_type: TxType,
    pub public_input: u128,
    pub public_output: u128,
    pub asset_id: u32,
    pub bridge_id: u64,
    pub new_note1: Leaf,
    pub new_note2: Leaf,
    pub nullifier1: u128,
    pub nullifier2: u128,
    pub note_tree_root: TreeHash,
    pub tx_fee: u128,
}

impl JoinSplitProofData {
    /// Decode the structured head of a proof blob.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProofDataError> {
        if bytes.len() < PROOF_DATA_SIZE {
            return Err(ProofDataError::TooShort {
                got: bytes.len(),
                need: PROOF_DATA_SIZE,
            });
        }

        let tag = word(bytes, 0)[WORD_SIZE - 1];
        let tx_type = TxType::from_tag(tag).ok_or(ProofDataError::UnknownTxType(tag))?;

        Ok(Self {
            tx_type,
            public_input: word_u128(bytes, 1),
            public_output: word_u128(bytes, 2),
            asset_id: word_u32(bytes, 3),
            bridge_id: word_u64(bytes, 3),
            new_note1: leaf_at(bytes, 4),
            new_note2: leaf_at(bytes, 6),
            nullifier1: word_u128(bytes, 8),
            nullifier2: word_u128(bytes, 9),
            note_tree_root: *word(bytes, 10),
            tx_fee: word_u128(bytes, 11),
        })
    }

    /// The asset a tx pays its fee in.
    ///
    /// Defi deposits and claims pay in the bridge's input asset, encoded in
    /// the low 32 bits of the bridge id.
    pub fn fee_asset_id(&self) -> u32 {
        match self.tx_type {
            TxType::DefiDeposit | TxType::DefiClaim => (self.bridge_id & 0xffff_ffff) as u32,
            _ => self.asset_id,
        }
    }
}

/// Sender metadata recorded at admission.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SenderMeta {
    pub ip: Option<String>,
    pub origin: Option<String>,
}

/// An admitted transaction: parsed proof plus everything the pipeline needs
/// to batch, prove and submit it.
#[derive(Clone, Debug)]
pub struct JoinSplitTx {
    pub id: TxId,
    pub proof: JoinSplitProofData,
    pub raw_proof: Vec<u8>,
    pub viewing_key1: Vec<u8>,
    pub viewing_key2: Vec<u8>,
    /// Deposit authorization, compact 65-byte `r||s||v`.
    pub signature: Option<[u8; 65]>,
    pub sender: SenderMeta,
    /// Unix seconds at admission.
    pub received_at: u64,
}

impl JoinSplitTx {
    pub fn new(
        raw_proof: Vec<u8>,
        viewing_key1: Vec<u8>,
        viewing_key2: Vec<u8>,
        signature: Option<[u8; 65]>,
        sender: SenderMeta,
    ) -> Result<Self, ProofDataError> {
        let proof = JoinSplitProofData::parse(&raw_proof)?;
        let id = TxId::from_proof(&raw_proof);
        let received_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            id,
            proof,
            raw_proof,
            viewing_key1,
            viewing_key2,
            signature,
            sender,
            received_at,
        })
    }
}

pub(crate) fn word(bytes: &[u8], index: usize) -> &[u8; WORD_SIZE] {
    bytes[index * WORD_SIZE..(index + 1) * WORD_SIZE]
        .try_into()
        .expect("word slice is exactly WORD_SIZE bytes")
}

/// Low 16 bytes of a word, big-endian.
pub(crate) fn word_u128(bytes: &[u8], index: usize) -> u128 {
    let w = word(bytes, index);
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..32]);
    u128::from_be_bytes(buf)
}

pub(crate) fn word_u64(bytes: &[u8], index: usize) -> u64 {
    let w = word(bytes, index);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[24..32]);
    u64::from_be_bytes(buf)
}

pub(crate) fn word_u32(bytes: &[u8], index: usize) -> u32 {
    let w = word(bytes, index);
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&w[28..32]);
    u32::from_be_bytes(buf)
}

pub(crate) fn leaf_at(bytes: &[u8], word_index: usize) -> Leaf {
    let mut leaf = [0u8; LEAF_SIZE];
    leaf.copy_from_slice(&bytes[word_index * WORD_SIZE..word_index * WORD_SIZE + LEAF_SIZE]);
    leaf
}
