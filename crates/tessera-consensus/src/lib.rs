//! Tessera Consensus - Round timing, block composition and admission
//!
//! This crate schedules consensus rounds, composes candidate blocks against
//! a sandbox ledger, collects multi-signatures over them, and validates and
//! commits incoming blocks.

pub mod chronology;
pub mod composer;
pub mod eligibility;
pub mod error;
pub mod proposer;
pub mod signing;
pub mod validator;

pub use chronology::{
    ChronologyConfig, Clock, ManualClock, Phase, PhaseHandler, PhaseTiming, Round,
    RoundScheduler, SystemClock,
};
pub use composer::BlockComposer;
pub use eligibility::{AcceptAllSigners, ConsensusGroupEligibility, SignerEligibility};
pub use error::ConsensusError;
pub use proposer::Proposer;
pub use signing::SigningSession;
pub use validator::{BlockOutcome, BlockState, BlockValidator};
