//! The state-queue work items: batch processing and block materialization.

use std::sync::Arc;

use tracing::{info, warn};

use zkra_chain::Blockchain;
use zkra_common::{Block, JoinSplitTx, TxId};
use zkra_prover::Prover;
use zkra_state::WorldState;

use crate::builder::build_rollup;
use crate::error::AggregatorError;
use crate::rollup_db::RollupDb;
use crate::serializer;

/// Everything a state-queue item needs to drive a batch from witness to
/// chain submission, or a confirmed block into the world state.
pub struct Pipeline {
    pub world: Arc<WorldState>,
    pub db: Arc<RollupDb>,
    pub chain: Arc<dyn Blockchain>,
    pub prover: Arc<dyn Prover>,
    pub rollup_size: usize,
}

impl Pipeline {
    /// Build, prove and submit one closed batch.
    ///
    /// Runs inside the state queue. A double spend inside the batch drops
    /// it (the error names the offender); a proving failure drops it and
    /// leaves the tx db untouched; a submission failure frees the rollup
    /// id and txs before propagating; a state error propagates as fatal.
    pub async fn process_batch(&self, batch: Vec<JoinSplitTx>) -> Result<(), AggregatorError> {
        let rollup_id = self.db.next_rollup_id()?;

        let rollup = match build_rollup(&self.world, rollup_id, self.rollup_size, &batch) {
            Ok(rollup) => rollup,
            Err(err @ AggregatorError::NullifierExists(_)) => {
                warn!(rollup_id, txs = batch.len(), "batch aborted: {err}; dropping batch");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        self.db.insert_rollup(&rollup)?;

        let Some(proof_data) = self.prover.create_proof(&rollup).await else {
            warn!(rollup_id, "invalid proof");
            self.db.delete_rollup(rollup_id)?;
            return Ok(());
        };
        self.db.set_rollup_proof(rollup_id, &proof_data)?;
        let tx_ids: Vec<TxId> = batch.iter().map(|tx| tx.id).collect();
        self.db.assign_txs(rollup_id, &tx_ids)?;

        let mut signatures = Vec::new();
        let mut sig_indexes = Vec::new();
        for (slot, tx) in batch.iter().enumerate() {
            if let Some(signature) = tx.signature {
                signatures.push(signature);
                sig_indexes.push(slot as u32);
            }
        }
        let viewing_keys: Vec<Vec<u8>> = batch
            .iter()
            .flat_map(|tx| [tx.viewing_key1.clone(), tx.viewing_key2.clone()])
            .collect();

        match self
            .chain
            .submit_rollup(&proof_data, &signatures, &sig_indexes, &viewing_keys, None)
            .await
        {
            Ok(tx_hash) => {
                info!(rollup_id, ?tx_hash, txs = batch.len(), "rollup submitted");
                Ok(())
            }
            Err(err) => {
                // the batch is lost; free the id and unbind the txs so the
                // next batch stays consecutive with the chain, then let the
                // supervisor see the failure
                self.db.delete_rollup(rollup_id)?;
                Err(err.into())
            }
        }
    }

    /// Materialize one confirmed block and settle its txs.
    pub async fn apply_block(&self, block: Block) -> Result<(), AggregatorError> {
        serializer::apply_block(&self.world, &block)?;
        self.db.confirm_rollup(&block)?;
        self.db.settle_txs(block.rollup_id)?;
        info!(
            rollup_id = block.rollup_id,
            block_num = block.block_num,
            "rollup block applied"
        );
        Ok(())
    }
}
