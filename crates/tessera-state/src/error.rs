use num_bigint::BigUint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: BigUint, need: BigUint },

    #[error("Nonce mismatch: account at {expected}, transaction at {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("Nonce overflow for account {0}")]
    NonceOverflow(String),

    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("Block already exists: {0}")]
    BlockExists(String),

    #[error("Genesis block already installed")]
    GenesisExists,

    #[error("Block out of sequence: expected nonce {expected}, got {got}")]
    OutOfSequence { expected: u64, got: u64 },

    #[error("Chain head overflow at nonce {0}")]
    HeadOverflow(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Core error: {0}")]
    Core(#[from] tessera_core::CoreError),
}
