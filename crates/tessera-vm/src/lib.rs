//! Tessera VM - Transaction validation and execution
//!
//! The same checks run when a block is composed against a sandbox and when
//! it is re-executed against the authoritative ledger.

pub mod error;
pub mod executor;
pub mod validation;

pub use error::VmError;
pub use executor::Executor;
pub use validation::{validate_transaction, ExecutionPolicy};
