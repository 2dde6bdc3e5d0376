//! Chain-facing adapter for the rollup aggregator.
//!
//! The aggregator never speaks an RPC dialect directly; it goes through the
//! [`Blockchain`] trait. The production implementation talks to the rollup
//! processor contract over ethers; [`mock::MockBlockchain`] backs tests.

pub mod mock;

mod contract;
mod poller;
mod signature;

use async_trait::async_trait;
use thiserror::Error;
use zkra_common::{Block, TreeHash};

pub use ethers::types::{Address, H256, U256};

pub use contract::{
    decode_process_rollup_calldata, encode_process_rollup_calldata, EthereumBlockchain,
};
pub use poller::BlockPoller;
pub use signature::{marshal_signatures, COMPACT_SIG_SIZE, SIG_RECORD_SIZE};

/// Errors from the chain adapter.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC transport or provider failure.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// ABI encode/decode failure.
    #[error("abi error: {0}")]
    Abi(String),

    /// Rollup submission failed or was dropped.
    #[error("submit error: {0}")]
    Submit(String),

    /// Calldata or proof bytes did not decode.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<anyhow::Error> for ChainError {
    fn from(err: anyhow::Error) -> Self {
        ChainError::Rpc(err.to_string())
    }
}

impl From<zkra_common::ProofDataError> for ChainError {
    fn from(err: zkra_common::ProofDataError) -> Self {
        ChainError::Decode(err.to_string())
    }
}

/// Rollup processor contract status.
#[derive(Clone, Copy, Debug)]
pub struct ChainStatus {
    pub next_rollup_id: u64,
    pub data_size: u64,
    pub data_root: TreeHash,
    pub null_root: TreeHash,
    pub root_root: TreeHash,
}

/// Escape hatch window status.
#[derive(Clone, Copy, Debug)]
pub struct EscapeStatus {
    pub open: bool,
    pub blocks_remaining: u32,
}

/// The on-chain rollup processor, as the aggregator sees it.
#[async_trait]
pub trait Blockchain: Send + Sync {
    /// Contract status: next rollup id and current tree roots.
    async fn status(&self) -> Result<ChainStatus, ChainError>;

    /// Whether the escape hatch window is open.
    async fn escape_status(&self) -> Result<EscapeStatus, ChainError>;

    /// Submit a rollup proof; resolves to the submission tx hash.
    ///
    /// `signatures` are compact 65-byte records authorizing deposits;
    /// `sig_indexes` names the tx slot each signature belongs to.
    async fn submit_rollup(
        &self,
        proof_data: &[u8],
        signatures: &[[u8; COMPACT_SIG_SIZE]],
        sig_indexes: &[u32],
        viewing_keys: &[Vec<u8>],
        gas_limit: Option<u64>,
    ) -> Result<H256, ChainError>;

    /// Confirmed rollup blocks at or after `rollup_id`.
    async fn blocks_from(
        &self,
        rollup_id: u64,
        min_confirmations: u64,
    ) -> Result<Vec<Block>, ChainError>;

    /// ERC-20 balance of `address` for a supported asset (asset 0 is the
    /// native asset).
    async fn asset_balance(&self, asset_id: u32, address: Address) -> Result<U256, ChainError>;

    /// ERC-20 allowance granted by `owner` to the rollup processor.
    async fn asset_allowance(&self, asset_id: u32, owner: Address) -> Result<U256, ChainError>;
}
