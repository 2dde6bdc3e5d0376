//! Batch timing and size policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use zkra_common::JoinSplitTx;

use crate::fifo::Fifo;
use crate::pipeline::Pipeline;
use crate::serializer::StateSerializer;

/// Items on the tx queue. `Flush` is the close-now signal.
pub enum TxEvent {
    Proof(Box<JoinSplitTx>),
    Flush,
}

/// Sole consumer of the tx queue. Closes a batch when it fills, when the
/// oldest unbatched tx has waited `max_wait`, or on an explicit flush, and
/// dispatches it onto the state queue in strictly monotonic order.
pub struct BatchController {
    tx_queue: Fifo<TxEvent>,
    serializer: StateSerializer,
    pipeline: Arc<Pipeline>,
    rollup_size: usize,
    max_wait: Duration,
    min_interval: Duration,
}

impl BatchController {
    pub fn new(
        tx_queue: Fifo<TxEvent>,
        serializer: StateSerializer,
        pipeline: Arc<Pipeline>,
        rollup_size: usize,
        max_wait: Duration,
        min_interval: Duration,
    ) -> Self {
        Self {
            tx_queue,
            serializer,
            pipeline,
            rollup_size,
            max_wait,
            min_interval,
        }
    }

    pub async fn run(self) {
        let mut pending: Vec<JoinSplitTx> = Vec::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let event = match deadline {
                // nothing pending: just wait for work
                None => match self.tx_queue.get().await {
                    Some(event) => Some(event),
                    None => break,
                },
                Some(at) => tokio::select! {
                    event = self.tx_queue.get() => match event {
                        Some(event) => Some(event),
                        None => break,
                    },
                    _ = tokio::time::sleep_until(at) => None,
                },
            };

            let mut flush = false;
            match event {
                Some(TxEvent::Proof(tx)) => {
                    pending.push(*tx);
                    deadline = Some(Instant::now() + self.max_wait);
                }
                Some(TxEvent::Flush) => flush = true,
                // deadline fired: the oldest unbatched tx waited max_wait
                None => flush = true,
            }

            let should_close =
                !pending.is_empty() && (flush || pending.len() >= self.rollup_size);
            if !should_close {
                continue;
            }

            let batch: Vec<JoinSplitTx> = pending.drain(..).collect();
            deadline = None;
            info!(txs = batch.len(), "closing rollup batch");

            let pipeline = self.pipeline.clone();
            let serializer = self.serializer.clone();
            let tx_queue = self.tx_queue.clone();
            self.serializer.enqueue(async move {
                if let Err(err) = pipeline.process_batch(batch).await {
                    if err.is_fatal() {
                        error!("fatal error processing batch: {err}; halting pipeline");
                        serializer.cancel();
                        tx_queue.cancel();
                    } else {
                        error!("failed to process batch: {err}");
                    }
                }
            });

            // throttle: the next tx is pulled only after the interval
            tokio::time::sleep(self.min_interval).await;
        }
        info!("batch controller exited");
    }
}
