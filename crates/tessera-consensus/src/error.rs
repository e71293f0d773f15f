use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    /// A caller bug, never caused by block content
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Signer {0} is not a member of the signing group")]
    UnknownSigner(String),

    #[error("Signing round out of order: {0}")]
    SigningOrder(String),

    #[error("Invalid signature share from {0}")]
    InvalidShare(String),

    #[error("Missing contributions: have {have}, need {need}")]
    MissingContributions { have: usize, need: usize },

    #[error("Pending queue full ({0} transactions)")]
    PendingQueueFull(usize),

    #[error("Round scheduler stopped: {0}")]
    SchedulerStopped(String),

    #[error("State error: {0}")]
    State(#[from] tessera_state::StateError),

    #[error("Core error: {0}")]
    Core(#[from] tessera_core::CoreError),

    #[error("VM error: {0}")]
    Vm(#[from] tessera_vm::VmError),
}
