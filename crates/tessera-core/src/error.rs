use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Sender public key does not match sender address")]
    SenderKeyMismatch,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid hash length")]
    InvalidHashLength,

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid group element")]
    InvalidPoint,

    #[error("Invalid scalar encoding")]
    InvalidScalar,

    #[error("Signer {0} is not part of the signing set")]
    UnknownSigner(String),

    #[error("Signer at index {0} is not selected by the bitmap")]
    SignerNotSelected(usize),

    #[error("Consensus group of {0} signers exceeds the bitmap width")]
    GroupTooLarge(usize),

    #[error("Expected {expected} contributions, got {got}")]
    ContributionCount { expected: usize, got: usize },
}
