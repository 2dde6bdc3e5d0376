//! Confirmed-block polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use zkra_common::Block;

use crate::Blockchain;

/// Polls the rollup processor for confirmed blocks and forwards them in
/// strict rollup-id order.
pub struct BlockPoller {
    chain: Arc<dyn Blockchain>,
    poll_interval: Duration,
    min_confirmations: u64,
}

impl BlockPoller {
    pub fn new(chain: Arc<dyn Blockchain>, poll_interval: Duration, min_confirmations: u64) -> Self {
        Self {
            chain,
            poll_interval,
            min_confirmations,
        }
    }

    /// Run until the sink closes or `shutdown` flips.
    ///
    /// Blocks are forwarded consecutively from `next_rollup_id`; anything
    /// out of order waits for the gap to fill on a later poll.
    pub async fn run(
        self,
        mut next_rollup_id: u64,
        sink: mpsc::UnboundedSender<Block>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self
                .chain
                .blocks_from(next_rollup_id, self.min_confirmations)
                .await
            {
                Ok(blocks) => {
                    for block in blocks {
                        if block.rollup_id != next_rollup_id {
                            continue;
                        }
                        debug!(rollup_id = block.rollup_id, "confirmed rollup block");
                        if sink.send(block).is_err() {
                            return;
                        }
                        next_rollup_id += 1;
                    }
                }
                Err(e) => warn!("failed to poll rollup blocks: {e}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("block poller stopped");
    }
}
