//! Aggregator wiring: admission, batching, state queue, block ingestion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use zkra_chain::{BlockPoller, Blockchain, ChainStatus, EscapeStatus};
use zkra_common::{
    is_zero_leaf, non_empty_leaf, root_tree_key, SenderMeta, TreeHash, TxId,
};
use zkra_prover::Prover;
use zkra_state::{TreeId, WorldState};

use crate::admission::TxAdmission;
use crate::config::AggregatorConfig;
use crate::controller::{BatchController, TxEvent};
use crate::error::AggregatorError;
use crate::fees::{FeeCalculator, FeeQuotes, PriceOracle};
use crate::fifo::Fifo;
use crate::pipeline::Pipeline;
use crate::rollup_db::RollupDb;
use crate::serializer::StateSerializer;
use crate::verifier::ProofVerifier;

/// Operator-facing status snapshot.
#[derive(Clone, Debug)]
pub struct AggregatorStatus {
    pub chain: ChainStatus,
    pub escape: EscapeStatus,
    pub data_size: u64,
    pub data_root: TreeHash,
    pub null_root: TreeHash,
    pub root_root: TreeHash,
    pub pending_txs: u64,
}

/// The rollup aggregation server.
pub struct Aggregator {
    config: AggregatorConfig,
    world: Arc<WorldState>,
    db: Arc<RollupDb>,
    chain: Arc<dyn Blockchain>,
    prover: Arc<dyn Prover>,
    fees: Arc<FeeCalculator>,
    admission: TxAdmission,
    tx_queue: Fifo<TxEvent>,
    serializer: StateSerializer,
    pipeline: Arc<Pipeline>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Aggregator {
    pub fn new(
        config: AggregatorConfig,
        world: Arc<WorldState>,
        db: Arc<RollupDb>,
        chain: Arc<dyn Blockchain>,
        prover: Arc<dyn Prover>,
        verifier: Arc<dyn ProofVerifier>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Result<Self, AggregatorError> {
        config.validate()?;

        let tx_queue: Fifo<TxEvent> = Fifo::new();
        let serializer = StateSerializer::new();
        let fees = Arc::new(FeeCalculator::new(&config.fees, config.rollup_size, oracle));
        let pipeline = Arc::new(Pipeline {
            world: world.clone(),
            db: db.clone(),
            chain: chain.clone(),
            prover: prover.clone(),
            rollup_size: config.rollup_size,
        });
        let admission = TxAdmission::new(
            world.clone(),
            verifier,
            db.clone(),
            tx_queue.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            world,
            db,
            chain,
            prover,
            fees,
            admission,
            tx_queue,
            serializer,
            pipeline,
            shutdown_tx,
            shutdown_rx,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Bring the pipeline up: state queue consumer, batch controller,
    /// block poller and its forwarder.
    pub async fn start(&self) -> Result<(), AggregatorError> {
        // anything in flight when the last process died is unrecoverable;
        // its id must be reusable before new batches close
        self.db.delete_unconfirmed_rollups()?;

        // register the genesis data root so first-epoch proofs pass the
        // root-membership check
        let genesis_key = root_tree_key(&self.world.committed_root(TreeId::Data)?);
        if is_zero_leaf(&self.world.get_committed(TreeId::Root, genesis_key)?) {
            self.world.put(TreeId::Root, genesis_key, non_empty_leaf())?;
            self.world.commit()?;
        }

        let mut tasks = self.tasks.lock().await;

        let serializer = self.serializer.clone();
        tasks.push(tokio::spawn(async move { serializer.run().await }));

        let controller = BatchController::new(
            self.tx_queue.clone(),
            self.serializer.clone(),
            self.pipeline.clone(),
            self.config.rollup_size,
            Duration::from_secs(self.config.max_rollup_wait_secs),
            Duration::from_secs(self.config.min_rollup_interval_secs),
        );
        tasks.push(tokio::spawn(controller.run()));

        let (block_tx, mut block_rx) = mpsc::unbounded_channel();
        let poller = BlockPoller::new(
            self.chain.clone(),
            Duration::from_secs(self.config.poll_interval_secs),
            self.config.min_confirmations,
        );
        let from_rollup_id = self.db.next_unconfirmed_rollup_id()?;
        tasks.push(tokio::spawn(poller.run(
            from_rollup_id,
            block_tx,
            self.shutdown_rx.clone(),
        )));

        let serializer = self.serializer.clone();
        let tx_queue = self.tx_queue.clone();
        let pipeline = self.pipeline.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(block) = block_rx.recv().await {
                let pipeline = pipeline.clone();
                let serializer_inner = serializer.clone();
                let tx_queue = tx_queue.clone();
                serializer.enqueue(async move {
                    if let Err(err) = pipeline.apply_block(block).await {
                        error!("failed to apply rollup block: {err}; halting pipeline");
                        serializer_inner.cancel();
                        tx_queue.cancel();
                    }
                });
            }
        }));

        info!(
            rollup_size = self.config.rollup_size,
            from_rollup_id, "aggregator started"
        );
        Ok(())
    }

    /// Admit a client proof into the pipeline.
    pub async fn receive_tx(
        &self,
        raw_proof: Vec<u8>,
        viewing_key1: Vec<u8>,
        viewing_key2: Vec<u8>,
        signature: Option<[u8; 65]>,
        sender: SenderMeta,
    ) -> Result<TxId, AggregatorError> {
        self.admission
            .receive_tx(raw_proof, viewing_key1, viewing_key2, signature, sender)
            .await
    }

    /// Close the pending batch regardless of size or timing.
    pub fn flush(&self) {
        self.admission.flush();
    }

    /// Fee schedule for one asset.
    pub fn fee_quotes(&self, asset_id: u32) -> FeeQuotes {
        self.fees.fee_quotes(asset_id)
    }

    pub fn fee_calculator(&self) -> &FeeCalculator {
        &self.fees
    }

    /// World-state and contract status.
    pub async fn status(&self) -> Result<AggregatorStatus, AggregatorError> {
        Ok(AggregatorStatus {
            chain: self.chain.status().await?,
            escape: self.chain.escape_status().await?,
            data_size: self.world.committed_size(TreeId::Data)?,
            data_root: self.world.committed_root(TreeId::Data)?,
            null_root: self.world.committed_root(TreeId::Nullifier)?,
            root_root: self.world.committed_root(TreeId::Root)?,
            pending_txs: self.db.pending_tx_count()?,
        })
    }

    /// Tear everything down. The in-flight state item finishes its commit
    /// or rollback before the queue exits; nothing partial is persisted.
    pub async fn stop(&self) {
        info!("stopping aggregator");
        self.prover.cancel();
        self.tx_queue.cancel();
        self.serializer.cancel();
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("aggregator stopped");
    }
}
