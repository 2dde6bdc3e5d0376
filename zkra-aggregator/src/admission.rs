//! Transaction admission gate.
//!
//! Every incoming proof is checked against the *committed* world state:
//! fresh nullifiers, a known historical note root, and a passing verifier
//! run. Admission never stages state; the same soundness conditions are
//! re-enforced inside the rollup builder, which is what catches two
//! admitted txs sharing a nullifier.

use std::sync::Arc;

use tracing::debug;

use zkra_common::{is_zero_leaf, root_tree_key, JoinSplitTx, SenderMeta, TxId};
use zkra_state::{TreeId, WorldState};

use crate::controller::TxEvent;
use crate::error::AggregatorError;
use crate::fifo::Fifo;
use crate::rollup_db::RollupDb;
use crate::verifier::ProofVerifier;

pub struct TxAdmission {
    world: Arc<WorldState>,
    verifier: Arc<dyn ProofVerifier>,
    db: Arc<RollupDb>,
    tx_queue: Fifo<TxEvent>,
}

impl TxAdmission {
    pub fn new(
        world: Arc<WorldState>,
        verifier: Arc<dyn ProofVerifier>,
        db: Arc<RollupDb>,
        tx_queue: Fifo<TxEvent>,
    ) -> Self {
        Self {
            world,
            verifier,
            db,
            tx_queue,
        }
    }

    /// Validate and enqueue a client proof.
    ///
    /// Runs concurrently with rollup construction; reads see only state
    /// committed by prior block confirmations.
    pub async fn receive_tx(
        &self,
        raw_proof: Vec<u8>,
        viewing_key1: Vec<u8>,
        viewing_key2: Vec<u8>,
        signature: Option<[u8; 65]>,
        sender: SenderMeta,
    ) -> Result<TxId, AggregatorError> {
        let tx = JoinSplitTx::new(raw_proof, viewing_key1, viewing_key2, signature, sender)?;

        for (which, nullifier) in [(1u8, tx.proof.nullifier1), (2u8, tx.proof.nullifier2)] {
            let leaf = self.world.get_committed(TreeId::Nullifier, nullifier)?;
            if !is_zero_leaf(&leaf) {
                return Err(AggregatorError::NullifierExists(which));
            }
        }

        let root_key = root_tree_key(&tx.proof.note_tree_root);
        if is_zero_leaf(&self.world.get_committed(TreeId::Root, root_key)?) {
            return Err(AggregatorError::UnknownNoteRoot);
        }

        if !self.verifier.verify(&tx.raw_proof) {
            return Err(AggregatorError::VerifierFailed);
        }

        self.db.insert_tx(&tx)?;
        let id = tx.id;
        debug!(tx_id = %id, tx_type = ?tx.proof.tx_type, "tx admitted");
        self.tx_queue.put(TxEvent::Proof(Box::new(tx)));
        Ok(id)
    }

    /// Ask the batch controller to close the pending batch.
    pub fn flush(&self) {
        self.tx_queue.put(TxEvent::Flush);
    }
}
