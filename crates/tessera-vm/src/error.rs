use num_bigint::BigUint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: BigUint, need: BigUint },

    #[error("State error: {0}")]
    State(#[from] tessera_state::StateError),

    #[error("Core error: {0}")]
    Core(#[from] tessera_core::CoreError),
}
