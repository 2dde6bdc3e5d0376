//! The state queue: single-writer serialization of world-state mutation.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use zkra_common::{non_empty_leaf, root_tree_key, Block, ZERO_LEAF};
use zkra_state::{StateError, TreeId, WorldState};

use crate::fifo::Fifo;

/// A unit of work on the state queue.
pub type StateJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Single consumer over the state queue.
///
/// Work items run strictly one at a time, so every world-state mutation is
/// linearized. Cancelling lets the in-flight item finish (its commit or
/// rollback is atomic) and then exits the loop.
#[derive(Clone)]
pub struct StateSerializer {
    queue: Fifo<StateJob>,
}

impl StateSerializer {
    pub fn new() -> Self {
        Self { queue: Fifo::new() }
    }

    /// Enqueue a work item. Items run in enqueue order.
    pub fn enqueue(&self, job: impl Future<Output = ()> + Send + 'static) {
        self.queue.put(Box::pin(job));
    }

    /// Consume until cancelled.
    pub async fn run(&self) {
        while let Some(job) = self.queue.get().await {
            job.await;
        }
        debug!("state queue consumer exited");
    }

    pub fn cancel(&self) {
        self.queue.cancel();
    }
}

impl Default for StateSerializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Materialize a confirmed block into the world state.
///
/// Inserts the block's note commitments, pads the data tree out to the
/// block's reserved span, registers the new data root as a known
/// historical root, marks the nullifiers spent, and commits. Skipped
/// intermediate indexes stay absent; they read as zero leaves and hash
/// into the zero chain, which is exactly what the padding relies on.
pub fn apply_block(world: &WorldState, block: &Block) -> Result<(), StateError> {
    for (i, entry) in block.data_entries.iter().enumerate() {
        world.put(TreeId::Data, block.data_start_index as u128 + i as u128, *entry)?;
    }
    if block.data_entries.len() < block.num_data_entries {
        let pad_index = block.data_start_index as u128 + block.num_data_entries as u128 - 1;
        world.put(TreeId::Data, pad_index, ZERO_LEAF)?;
    }

    let new_data_root = world.root(TreeId::Data)?;
    world.put(
        TreeId::Root,
        root_tree_key(&new_data_root),
        non_empty_leaf(),
    )?;

    for nullifier in &block.nullifiers {
        world.put(TreeId::Nullifier, *nullifier, non_empty_leaf())?;
    }

    world.commit()?;
    debug!(
        rollup_id = block.rollup_id,
        entries = block.data_entries.len(),
        nullifiers = block.nullifiers.len(),
        "block materialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use zkra_common::is_zero_leaf;

    fn block(data_start_index: u64, entries: Vec<[u8; 64]>, nullifiers: Vec<u128>) -> Block {
        Block {
            block_num: 1,
            created: 0,
            tx_hash: [0u8; 32],
            rollup_id: 0,
            rollup_size: 2,
            data_start_index,
            num_data_entries: 4,
            data_entries: entries,
            nullifiers,
            rollup_proof_data: vec![],
            viewing_keys_data: vec![],
        }
    }

    #[test]
    fn apply_block_commits_entries_padding_root_and_nullifiers() {
        let world = WorldState::in_memory().unwrap();
        let block = block(0, vec![[1u8; 64], [2u8; 64]], vec![11, 12]);

        apply_block(&world, &block).unwrap();

        // padded out to the reserved span
        assert_eq!(world.committed_size(TreeId::Data).unwrap(), 4);
        assert_eq!(world.get_committed(TreeId::Data, 0).unwrap(), [1u8; 64]);
        assert_eq!(world.get_committed(TreeId::Data, 1).unwrap(), [2u8; 64]);
        assert_eq!(world.get_committed(TreeId::Data, 3).unwrap(), ZERO_LEAF);

        // the new data root is now a known historical root
        let key = root_tree_key(&world.committed_root(TreeId::Data).unwrap());
        assert!(!is_zero_leaf(
            &world.get_committed(TreeId::Root, key).unwrap()
        ));

        for nullifier in [11u128, 12] {
            assert!(!is_zero_leaf(
                &world.get_committed(TreeId::Nullifier, nullifier).unwrap()
            ));
        }
        assert!(!world.has_staged_writes().unwrap());
    }

    #[test]
    fn apply_block_size_covers_reserved_span() {
        let world = WorldState::in_memory().unwrap();
        let block = block(0, vec![[1u8; 64]], vec![]);
        apply_block(&world, &block).unwrap();
        assert!(
            world.committed_size(TreeId::Data).unwrap()
                >= block.data_start_index + block.num_data_entries as u64
        );
    }

    #[tokio::test]
    async fn jobs_run_in_enqueue_order() {
        let serializer = StateSerializer::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));

        for i in 0..5usize {
            let order = order.clone();
            let running = running.clone();
            serializer.enqueue(async move {
                // no two jobs may overlap
                assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                order.lock().unwrap().push(i);
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        let consumer = {
            let serializer = serializer.clone();
            tokio::spawn(async move { serializer.run().await })
        };
        while order.lock().unwrap().len() < 5 {
            tokio::task::yield_now().await;
        }
        serializer.cancel();
        consumer.await.unwrap();

        let order = order.lock().unwrap();
        assert_eq!(&*order, &[0, 1, 2, 3, 4]);
    }
}
