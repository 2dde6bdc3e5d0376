//! Rollup witness construction.
//!
//! Runs inside the state queue, the sole writer. The builder stages the
//! batch's effects to capture before/after paths, then rolls everything
//! back: the witness is the only output, and real insertions happen when
//! the confirmed block comes back from the chain.

use tracing::{debug, warn};

use zkra_common::{is_zero_leaf, non_empty_leaf, root_tree_key, JoinSplitTx, Rollup};
use zkra_state::{TreeId, WorldState};

use crate::error::AggregatorError;

/// Level of the data tree at which one node spans a whole rollup
/// (`rollup_size` txs, two notes each).
pub fn rollup_root_height(rollup_size: usize) -> usize {
    rollup_size.trailing_zeros() as usize + 1
}

/// Build the witness for a batch of up to `rollup_size` txs.
///
/// Leaves the world state byte-for-byte unchanged. A nullifier collision
/// inside the batch aborts it with `NullifierExists`; a failed rollback is
/// a fatal state error.
pub fn build_rollup(
    world: &WorldState,
    rollup_id: u64,
    rollup_size: usize,
    txs: &[JoinSplitTx],
) -> Result<Rollup, AggregatorError> {
    debug_assert!(txs.len() <= rollup_size);

    let data_start_index = world.size(TreeId::Data)?;
    let old_data_root = world.root(TreeId::Data)?;
    let old_data_path = world.hash_path(TreeId::Data, data_start_index as u128)?;
    let old_null_root = world.root(TreeId::Nullifier)?;
    let old_root_root = world.root(TreeId::Root)?;

    let mut new_null_roots = Vec::with_capacity(txs.len() * 2);
    let mut old_null_paths = Vec::with_capacity(txs.len() * 2);
    let mut new_null_paths = Vec::with_capacity(txs.len() * 2);
    let mut old_root_paths = Vec::with_capacity(txs.len());

    let mut next_index = data_start_index as u128;
    for tx in txs {
        world.put(TreeId::Data, next_index, tx.proof.new_note1)?;
        next_index += 1;
        world.put(TreeId::Data, next_index, tx.proof.new_note2)?;
        next_index += 1;

        for (which, nullifier) in [(1u8, tx.proof.nullifier1), (2u8, tx.proof.nullifier2)] {
            let old_path = world.hash_path(TreeId::Nullifier, nullifier)?;
            if !is_zero_leaf(&world.get(TreeId::Nullifier, nullifier)?) {
                warn!(tx_id = %tx.id, nullifier, "nullifier {which} already spent within batch");
                world.rollback()?;
                return Err(AggregatorError::NullifierExists(which));
            }
            world.put(TreeId::Nullifier, nullifier, non_empty_leaf())?;
            new_null_roots.push(world.root(TreeId::Nullifier)?);
            old_null_paths.push(old_path);
            new_null_paths.push(world.hash_path(TreeId::Nullifier, nullifier)?);
        }

        let root_key = root_tree_key(&tx.proof.note_tree_root);
        old_root_paths.push(world.hash_path(TreeId::Root, root_key)?);
    }

    let new_data_path = world.hash_path(TreeId::Data, data_start_index as u128)?;
    let height = rollup_root_height(rollup_size);
    let side = ((data_start_index as u128 / (2 * rollup_size as u128)) % 2) as usize;
    let rollup_root = new_data_path.node_at(height, side);
    let new_data_root = world.root(TreeId::Data)?;

    world.rollback()?;

    debug!(
        rollup_id,
        txs = txs.len(),
        data_start_index,
        "rollup witness built"
    );

    Ok(Rollup {
        rollup_id,
        rollup_size,
        data_start_index,
        proofs: txs.iter().map(|tx| tx.raw_proof.clone()).collect(),
        rollup_root,
        old_data_root,
        new_data_root,
        old_data_path,
        new_data_path,
        old_null_root,
        new_null_roots,
        old_null_paths,
        new_null_paths,
        old_root_root,
        old_root_paths,
    })
}
