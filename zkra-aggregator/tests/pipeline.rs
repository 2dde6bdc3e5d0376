//! End-to-end pipeline tests over the mock chain and a mock prover.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use zkra_aggregator::{
    AcceptAllVerifier, Aggregator, AggregatorConfig, AggregatorError, RollupDb, StaticOracle,
};
use zkra_chain::mock::MockBlockchain;
use zkra_common::{
    Rollup, RollupProofData, SenderMeta, TreeHash, TxType, PROOF_DATA_SIZE, WORD_SIZE,
};
use zkra_prover::Prover;
use zkra_state::{TreeId, WorldState};

/// Prover that deterministically encodes the witness into proof bytes, so
/// the mock chain can decode the submission back into a block.
#[derive(Default)]
struct TestProver {
    fail: AtomicBool,
}

#[async_trait]
impl Prover for TestProver {
    async fn create_proof(&self, rollup: &Rollup) -> Option<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        let new_null_root = rollup
            .new_null_roots
            .last()
            .copied()
            .unwrap_or(rollup.old_null_root);
        Some(RollupProofData::encode(
            rollup,
            new_null_root,
            rollup.old_root_root,
        ))
    }

    fn cancel(&self) {}
}

struct Harness {
    world: Arc<WorldState>,
    db: Arc<RollupDb>,
    chain: Arc<MockBlockchain>,
    aggregator: Aggregator,
    genesis_root: TreeHash,
}

async fn harness(rollup_size: usize, max_wait_secs: u64) -> Harness {
    harness_with(rollup_size, max_wait_secs, Arc::new(TestProver::default())).await
}

async fn harness_with(
    rollup_size: usize,
    max_wait_secs: u64,
    prover: Arc<dyn Prover>,
) -> Harness {
    let world = Arc::new(WorldState::in_memory().unwrap());
    let db = Arc::new(RollupDb::in_memory().unwrap());
    let chain = Arc::new(MockBlockchain::new());
    let genesis_root = world.committed_root(TreeId::Data).unwrap();

    let config = AggregatorConfig {
        rollup_size,
        max_rollup_wait_secs: max_wait_secs,
        min_rollup_interval_secs: 0,
        min_confirmations: 0,
        poll_interval_secs: 1,
        fees: Default::default(),
    };

    let aggregator = Aggregator::new(
        config,
        world.clone(),
        db.clone(),
        chain.clone(),
        prover,
        Arc::new(AcceptAllVerifier),
        Arc::new(StaticOracle::default()),
    )
    .unwrap();
    aggregator.start().await.unwrap();

    Harness {
        world,
        db,
        chain,
        aggregator,
        genesis_root,
    }
}

fn make_proof(
    tx_type: TxType,
    note_seed: u8,
    nullifier1: u128,
    nullifier2: u128,
    note_root: &TreeHash,
    tx_fee: u128,
) -> Vec<u8> {
    let mut proof = vec![0u8; PROOF_DATA_SIZE];
    proof[WORD_SIZE - 1] = tx_type as u8;
    proof[4 * WORD_SIZE..6 * WORD_SIZE].fill(note_seed);
    proof[6 * WORD_SIZE..8 * WORD_SIZE].fill(note_seed.wrapping_add(1));
    proof[8 * WORD_SIZE + 16..9 * WORD_SIZE].copy_from_slice(&nullifier1.to_be_bytes());
    proof[9 * WORD_SIZE + 16..10 * WORD_SIZE].copy_from_slice(&nullifier2.to_be_bytes());
    proof[10 * WORD_SIZE..11 * WORD_SIZE].copy_from_slice(note_root);
    proof[11 * WORD_SIZE + 16..12 * WORD_SIZE].copy_from_slice(&tx_fee.to_be_bytes());
    proof
}

async fn admit(harness: &Harness, proof: Vec<u8>) -> Result<zkra_common::TxId, AggregatorError> {
    harness
        .aggregator
        .receive_tx(proof, vec![0x11], vec![0x22], None, SenderMeta::default())
        .await
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn single_deposit_happy_path() {
    let h = harness(2, 600).await;

    let proof = make_proof(TxType::Deposit, 0x10, 1, 2, &h.genesis_root, 0);
    admit(&h, proof).await.unwrap();
    h.aggregator.flush();

    // the mock chain confirms the submission; the poller feeds it back and
    // the state queue materializes it
    let world = h.world.clone();
    wait_until(move || world.committed_size(TreeId::Data).unwrap() == 4).await;

    let submissions = h.chain.submissions();
    assert_eq!(submissions.len(), 1);
    let parsed = RollupProofData::parse(&submissions[0].proof_data).unwrap();
    assert_eq!(parsed.rollup_id, 0);
    assert_eq!(parsed.rollup_size, 2);
    assert_eq!(parsed.data_start_index, 0);
    assert_eq!(parsed.old_data_root, h.genesis_root);
    // one real tx, one padded slot
    assert_eq!(parsed.data_entries.len(), 2);

    // both nullifiers are now spent
    for nullifier in [1u128, 2] {
        assert!(!zkra_common::is_zero_leaf(
            &h.world
                .get_committed(TreeId::Nullifier, nullifier)
                .unwrap()
        ));
    }
    // viewing keys rode along with the submission
    assert_eq!(submissions[0].viewing_keys, vec![0x11, 0x22]);

    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn builder_output_never_commits_state() {
    let h = harness(2, 600).await;
    // hold confirmations back so the window between submission and block
    // application stays observable
    h.chain.hold_blocks(true);
    let roots_before = [
        h.world.committed_root(TreeId::Data).unwrap(),
        h.world.committed_root(TreeId::Nullifier).unwrap(),
        h.world.committed_root(TreeId::Root).unwrap(),
    ];

    admit(&h, make_proof(TxType::Transfer, 0x10, 5, 6, &h.genesis_root, 0))
        .await
        .unwrap();
    h.aggregator.flush();

    let chain = h.chain.clone();
    wait_until(move || chain.submission_count() == 1).await;

    // submission happened, but nothing committed: state only moves on
    // block confirmation
    assert_eq!(h.world.committed_root(TreeId::Data).unwrap(), roots_before[0]);
    assert_eq!(
        h.world.committed_root(TreeId::Nullifier).unwrap(),
        roots_before[1]
    );
    assert_eq!(h.world.committed_root(TreeId::Root).unwrap(), roots_before[2]);
    assert_eq!(h.world.committed_size(TreeId::Data).unwrap(), 0);

    // release the block and watch it materialize
    h.chain.hold_blocks(false);
    let world = h.world.clone();
    wait_until(move || world.committed_size(TreeId::Data).unwrap() == 4).await;

    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn in_batch_double_spend_drops_batch() {
    let h = harness(2, 600).await;

    // both pass admission: the committed nullifier tree is untouched
    admit(&h, make_proof(TxType::Transfer, 0x10, 7, 8, &h.genesis_root, 0))
        .await
        .unwrap();
    admit(&h, make_proof(TxType::Transfer, 0x20, 7, 9, &h.genesis_root, 0))
        .await
        .unwrap();
    h.aggregator.flush();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.chain.submission_count(), 0);
    assert_eq!(h.db.next_rollup_id().unwrap(), 0);
    assert!(!h.world.has_staged_writes().unwrap());

    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn replayed_nullifier_rejected_after_confirmation() {
    let h = harness(2, 600).await;

    admit(&h, make_proof(TxType::Transfer, 0x10, 7, 8, &h.genesis_root, 0))
        .await
        .unwrap();
    h.aggregator.flush();
    let world = h.world.clone();
    wait_until(move || world.committed_size(TreeId::Data).unwrap() == 4).await;

    let err = admit(&h, make_proof(TxType::Transfer, 0x20, 7, 9, &h.genesis_root, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::NullifierExists(1)));

    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn size_cap_closes_batch() {
    let h = harness(4, 600).await;

    for i in 0..4u128 {
        admit(
            &h,
            make_proof(
                TxType::Transfer,
                0x10 + i as u8,
                100 + i * 2,
                101 + i * 2,
                &h.genesis_root,
                0,
            ),
        )
        .await
        .unwrap();
    }

    // no flush: the fourth admission fills the rollup
    let chain = h.chain.clone();
    wait_until(move || chain.submission_count() == 1).await;

    let parsed = RollupProofData::parse(&h.chain.submissions()[0].proof_data).unwrap();
    assert_eq!(parsed.rollup_size, 4);
    assert_eq!(parsed.data_entries.len(), 8);
    assert_eq!(h.chain.submission_count(), 1);
    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_closes_batch() {
    let h = harness(4, 5).await;

    admit(&h, make_proof(TxType::Transfer, 0x10, 1, 2, &h.genesis_root, 0))
        .await
        .unwrap();
    assert_eq!(h.chain.submission_count(), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let chain = h.chain.clone();
    wait_until(move || chain.submission_count() == 1).await;

    let parsed = RollupProofData::parse(&h.chain.submissions()[0].proof_data).unwrap();
    assert_eq!(parsed.rollup_size, 4);
    assert_eq!(parsed.data_entries.len(), 2);
    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_note_root_rejected() {
    let h = harness(2, 600).await;
    let foreign_root = [0x5au8; 32];
    let err = admit(&h, make_proof(TxType::Transfer, 0x10, 1, 2, &foreign_root, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::UnknownNoteRoot));
    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_proof_rejected() {
    let h = harness(2, 600).await;
    let err = admit(&h, vec![0u8; 7]).await.unwrap_err();
    assert!(matches!(err, AggregatorError::MalformedProof(_)));
    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_proof_drops_batch_and_frees_id() {
    let prover = Arc::new(TestProver::default());
    prover.fail.store(true, Ordering::SeqCst);
    let h = harness_with(2, 600, prover).await;

    admit(&h, make_proof(TxType::Transfer, 0x10, 1, 2, &h.genesis_root, 0))
        .await
        .unwrap();
    h.aggregator.flush();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.chain.submission_count(), 0);
    // the rollup row was deleted so the id is reused
    assert_eq!(h.db.next_rollup_id().unwrap(), 0);
    // the tx db was not updated: the tx is still unsettled and unassigned
    assert_eq!(h.db.pending_tx_count().unwrap(), 1);

    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_submission_drops_batch_and_frees_id() {
    let h = harness(2, 600).await;
    h.chain.fail_submissions(true);

    admit(&h, make_proof(TxType::Transfer, 0x10, 1, 2, &h.genesis_root, 0))
        .await
        .unwrap();
    h.aggregator.flush();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.chain.submission_count(), 0);
    // the rollup row was deleted so the id stays consecutive with the chain
    assert_eq!(h.db.next_rollup_id().unwrap(), 0);
    // the tx is unbound and unsettled, recoverable by re-admission
    assert_eq!(h.db.pending_tx_count().unwrap(), 1);
    // nothing was committed
    assert_eq!(h.world.committed_size(TreeId::Data).unwrap(), 0);

    // once the chain recovers, a fresh batch takes the freed id
    h.chain.fail_submissions(false);
    admit(&h, make_proof(TxType::Transfer, 0x20, 3, 4, &h.genesis_root, 0))
        .await
        .unwrap();
    h.aggregator.flush();
    let chain = h.chain.clone();
    wait_until(move || chain.submission_count() == 1).await;
    let parsed = RollupProofData::parse(&h.chain.submissions()[0].proof_data).unwrap();
    assert_eq!(parsed.rollup_id, 0);

    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn deposit_signature_rides_with_submission() {
    let h = harness(2, 600).await;

    let mut signature = [0x42u8; 65];
    signature[64] = 0x1b;
    h.aggregator
        .receive_tx(
            make_proof(TxType::Deposit, 0x10, 1, 2, &h.genesis_root, 0),
            vec![],
            vec![],
            Some(signature),
            SenderMeta::default(),
        )
        .await
        .unwrap();
    h.aggregator.flush();

    let chain = h.chain.clone();
    wait_until(move || chain.submission_count() == 1).await;

    let submissions = h.chain.submissions();
    assert_eq!(submissions[0].signatures, vec![signature]);
    assert_eq!(submissions[0].sig_indexes, vec![0]);
    h.aggregator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn consecutive_batches_get_consecutive_rollup_ids() {
    let h = harness(2, 600).await;

    admit(&h, make_proof(TxType::Transfer, 0x10, 1, 2, &h.genesis_root, 0))
        .await
        .unwrap();
    h.aggregator.flush();
    let world = h.world.clone();
    wait_until(move || world.committed_size(TreeId::Data).unwrap() == 4).await;

    admit(&h, make_proof(TxType::Transfer, 0x20, 3, 4, &h.genesis_root, 0))
        .await
        .unwrap();
    h.aggregator.flush();
    let world = h.world.clone();
    wait_until(move || world.committed_size(TreeId::Data).unwrap() == 8).await;

    let ids: Vec<u64> = h
        .chain
        .submissions()
        .iter()
        .map(|s| RollupProofData::parse(&s.proof_data).unwrap().rollup_id)
        .collect();
    assert_eq!(ids, vec![0, 1]);

    // the second batch stacked on the first block's state
    let second = RollupProofData::parse(&h.chain.submissions()[1].proof_data).unwrap();
    assert_eq!(second.data_start_index, 4);

    h.aggregator.stop().await;
}
