//! The rollup aggregation server.
//!
//! Client proofs flow through admission into the tx queue; the batch
//! controller closes fixed-size rollups by size, timeout or flush; each
//! batch becomes a state-queue item that builds the witness, drives the
//! external proof generator and submits the result to the rollup
//! processor. Confirmed blocks come back through the chain adapter and are
//! the only thing that ever commits world state.

pub mod admission;
pub mod builder;
pub mod config;
pub mod controller;
pub mod error;
pub mod fees;
pub mod fifo;
pub mod pipeline;
pub mod rollup_db;
pub mod serializer;
pub mod server;
pub mod verifier;

pub use admission::TxAdmission;
pub use config::{AggregatorConfig, AssetConfig, FeeConfig};
pub use controller::{BatchController, TxEvent};
pub use error::AggregatorError;
pub use fees::{FeeCalculator, FeeQuotes, PriceOracle, StaticOracle};
pub use fifo::Fifo;
pub use pipeline::Pipeline;
pub use rollup_db::{RollupDb, RollupStatus};
pub use serializer::StateSerializer;
pub use server::{Aggregator, AggregatorStatus};
pub use verifier::{AcceptAllVerifier, ProofVerifier, RejectAllVerifier};
