//! Tessera State - Ledger, chain history and storage
//!
//! This crate provides the account ledger with sandboxed and authoritative
//! mutation, the append-only chain store, and the byte-keyed storage
//! backends both persist to.

pub mod chain;
pub mod context;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod storage;

pub use chain::ChainStore;
pub use context::ChainContext;
pub use error::StateError;
pub use ledger::{AccountLedger, Ledger, SandboxLedger};
pub use merkle::compute_state_root;
pub use storage::{FileStorage, MemoryStorage, Storage};
