//! zkra-aggregator
//!
//! Rollup aggregation service: admits client join-split proofs, batches
//! them into fixed-size rollups, drives the external proof generator and
//! submits proofs to the on-chain rollup processor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use zkra_aggregator::{
    AcceptAllVerifier, Aggregator, AggregatorConfig, RollupDb, StaticOracle,
};
use zkra_chain::{Address, EthereumBlockchain};
use zkra_prover::ProofGenerator;
use zkra_state::WorldState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkra_aggregator=info,zkra_chain=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = AggregatorConfig::from_env()?;

    let rpc_url = std::env::var("ETH_RPC_URL").context("ETH_RPC_URL must be set")?;
    let processor: Address = std::env::var("ROLLUP_CONTRACT_ADDRESS")
        .context("ROLLUP_CONTRACT_ADDRESS must be set")?
        .parse()
        .context("invalid ROLLUP_CONTRACT_ADDRESS")?;
    let private_key = std::env::var("AGGREGATOR_PRIVATE_KEY").ok();
    let prover_cmd = std::env::var("PROVER_CMD").context("PROVER_CMD must be set")?;
    let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    info!("starting zkra-aggregator");
    info!("rollup processor: {processor}");
    info!("rollup size: {}", config.rollup_size);

    let world = Arc::new(WorldState::open(data_dir.join("world_state.db"))?);
    let db = Arc::new(RollupDb::open(data_dir.join("rollups.db"))?);
    let chain = Arc::new(EthereumBlockchain::connect(&rpc_url, processor, private_key).await?);

    let prover_args: Vec<String> = std::env::var("PROVER_ARGS")
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let prover = Arc::new(ProofGenerator::spawn(&prover_cmd, &prover_args)?);

    // External collaborators: the circuit verifier and the price oracle.
    // Until they are wired in, admission accepts every well-formed proof
    // and fees quote from a fixed gas price.
    warn!("join-split verifier not configured; admitting all well-formed proofs");
    let verifier = Arc::new(AcceptAllVerifier);
    let gas_price = std::env::var("GAS_PRICE_WEI")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0u128);
    let oracle = Arc::new(StaticOracle {
        gas_price,
        prices: Default::default(),
    });

    let aggregator = Aggregator::new(config, world, db, chain, prover, verifier, oracle)?;
    aggregator.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down aggregator...");
    aggregator.stop().await;
    Ok(())
}
