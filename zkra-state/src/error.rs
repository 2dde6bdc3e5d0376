//! Error type for world-state operations.

use thiserror::Error;

/// World-state failures. All of these are fatal to the state queue.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("key {key:#x} out of range for depth-{depth} tree")]
    KeyOutOfRange { key: u128, depth: u32 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("state lock poisoned")]
    Lock,
}

impl From<rusqlite::Error> for StateError {
    fn from(err: rusqlite::Error) -> Self {
        StateError::Storage(err.to_string())
    }
}
