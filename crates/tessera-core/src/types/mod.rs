pub mod account;
pub mod block;
pub mod report;
pub mod transaction;

pub use account::{Account, Address};
pub use block::{Block, GenesisConfig};
pub use report::{BlockReceipts, ExecutionReport};
pub use transaction::Transaction;
