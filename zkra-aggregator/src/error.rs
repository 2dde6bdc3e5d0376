//! Aggregator error taxonomy.

use thiserror::Error;

use zkra_chain::ChainError;
use zkra_common::ProofDataError;
use zkra_state::StateError;

/// Errors surfaced by the aggregation pipeline.
///
/// Admission errors go back to the submitting client; builder errors drop
/// the batch; state errors are fatal and halt the state queue.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("malformed proof: {0}")]
    MalformedProof(#[from] ProofDataError),

    /// `which` is 1 or 2, naming the colliding nullifier.
    #[error("nullifier {0} already exists")]
    NullifierExists(u8),

    #[error("merkle root does not exist")]
    UnknownNoteRoot,

    #[error("proof verification failed")]
    VerifierFailed,

    #[error("invalid proof")]
    ProofGenFailed,

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("database error: {0}")]
    Db(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for AggregatorError {
    fn from(err: rusqlite::Error) -> Self {
        AggregatorError::Db(err.to_string())
    }
}

impl AggregatorError {
    /// Whether the error must halt the pipeline (state io is never
    /// recoverable in place; everything else is per-tx or per-batch).
    pub fn is_fatal(&self) -> bool {
        matches!(self, AggregatorError::State(_))
    }
}
