//! In-memory rollup processor for tests and local development.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

use zkra_common::{Block, RollupProofData, TreeHash};

use crate::signature::COMPACT_SIG_SIZE;
use crate::{Blockchain, ChainError, ChainStatus, EscapeStatus};

/// A rollup submission captured by the mock.
#[derive(Clone, Debug)]
pub struct SubmittedRollup {
    pub proof_data: Vec<u8>,
    pub signatures: Vec<[u8; COMPACT_SIG_SIZE]>,
    pub sig_indexes: Vec<u32>,
    pub viewing_keys: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    blocks: Vec<Block>,
    submissions: Vec<SubmittedRollup>,
    data_root: TreeHash,
    null_root: TreeHash,
    root_root: TreeHash,
    data_size: u64,
    fail_submissions: bool,
    hold_blocks: bool,
}

/// Mock chain: every submitted rollup confirms immediately as the next
/// block, in submission order.
#[derive(Default)]
pub struct MockBlockchain {
    inner: Mutex<Inner>,
}

impl MockBlockchain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock chain lock poisoned")
    }

    /// Make subsequent `submit_rollup` calls fail.
    pub fn fail_submissions(&self, fail: bool) {
        self.lock().fail_submissions = fail;
    }

    /// While held, confirmed blocks are not served to `blocks_from`;
    /// submissions still succeed. Lets tests observe the window between
    /// submission and confirmation.
    pub fn hold_blocks(&self, hold: bool) {
        self.lock().hold_blocks = hold;
    }

    /// All captured submissions, in order.
    pub fn submissions(&self) -> Vec<SubmittedRollup> {
        self.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }
}

#[async_trait]
impl Blockchain for MockBlockchain {
    async fn status(&self) -> Result<ChainStatus, ChainError> {
        let inner = self.lock();
        Ok(ChainStatus {
            next_rollup_id: inner.blocks.len() as u64,
            data_size: inner.data_size,
            data_root: inner.data_root,
            null_root: inner.null_root,
            root_root: inner.root_root,
        })
    }

    async fn escape_status(&self) -> Result<EscapeStatus, ChainError> {
        Ok(EscapeStatus {
            open: false,
            blocks_remaining: 0,
        })
    }

    async fn submit_rollup(
        &self,
        proof_data: &[u8],
        signatures: &[[u8; COMPACT_SIG_SIZE]],
        sig_indexes: &[u32],
        viewing_keys: &[Vec<u8>],
        _gas_limit: Option<u64>,
    ) -> Result<H256, ChainError> {
        let parsed = RollupProofData::parse(proof_data)?;
        let mut inner = self.lock();
        if inner.fail_submissions {
            return Err(ChainError::Submit("mock submission failure".into()));
        }

        let tx_hash = keccak256(proof_data);
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let block_num = inner.blocks.len() as u64;

        inner.data_root = parsed.new_data_root;
        inner.null_root = parsed.new_null_root;
        inner.root_root = parsed.new_root_root;
        inner.data_size = inner
            .data_size
            .max(parsed.data_start_index + parsed.num_data_entries as u64);

        inner.submissions.push(SubmittedRollup {
            proof_data: proof_data.to_vec(),
            signatures: signatures.to_vec(),
            sig_indexes: sig_indexes.to_vec(),
            viewing_keys: viewing_keys.concat(),
        });
        let viewing_keys_data = viewing_keys.concat();
        inner.blocks.push(Block::from_rollup_proof(
            parsed,
            proof_data.to_vec(),
            viewing_keys_data,
            block_num,
            created,
            tx_hash,
        ));
        Ok(H256::from(tx_hash))
    }

    async fn blocks_from(
        &self,
        rollup_id: u64,
        _min_confirmations: u64,
    ) -> Result<Vec<Block>, ChainError> {
        let inner = self.lock();
        if inner.hold_blocks {
            return Ok(vec![]);
        }
        Ok(inner
            .blocks
            .iter()
            .filter(|b| b.rollup_id >= rollup_id)
            .cloned()
            .collect())
    }

    async fn asset_balance(&self, _asset_id: u32, _address: Address) -> Result<U256, ChainError> {
        Ok(U256::zero())
    }

    async fn asset_allowance(&self, _asset_id: u32, _owner: Address) -> Result<U256, ChainError> {
        Ok(U256::zero())
    }
}
