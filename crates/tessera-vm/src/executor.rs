use tessera_core::{ExecutionReport, Hash, Transaction};
use tessera_state::AccountLedger;
use tracing::debug;

use crate::error::VmError;
use crate::validation::{validate_transaction, ExecutionPolicy};

/// Applies transactions to any [`AccountLedger`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    policy: ExecutionPolicy,
}

impl Executor {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Executor { policy }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Validate and apply one transaction
    ///
    /// The ledger is left untouched when the report is not ok.
    pub fn execute_transaction<L: AccountLedger + ?Sized>(
        &self,
        tx: &Transaction,
        ledger: &mut L,
    ) -> ExecutionReport {
        let tx_hash = match tx.hash() {
            Ok(hash) => hash,
            Err(e) => return ExecutionReport::ko(format!("transaction not hashable: {}", e)),
        };

        match self.apply(tx, ledger) {
            Ok(()) => {
                debug!(
                    "Applied transaction {}: {} from {} to {}",
                    tx_hash, tx.value, tx.sender, tx.receiver
                );
                ExecutionReport::ok(format!("transaction {} applied", tx_hash))
            }
            Err(e) => {
                debug!("Transaction {} rejected: {}", tx_hash, e);
                rejected(&tx_hash, &e)
            }
        }
    }

    fn apply<L: AccountLedger + ?Sized>(
        &self,
        tx: &Transaction,
        ledger: &mut L,
    ) -> Result<(), VmError> {
        validate_transaction(tx, ledger, &self.policy)?;

        let nonce = if self.policy.verify_nonce {
            tx.nonce
        } else {
            ledger.account_state(&tx.sender).map_or(0, |a| a.nonce)
        };
        ledger.transfer(&tx.sender, &tx.receiver, &tx.value, nonce)?;
        Ok(())
    }
}

fn rejected(tx_hash: &Hash, error: &VmError) -> ExecutionReport {
    ExecutionReport::ko(format!("transaction {} rejected: {}", tx_hash, error))
}
