use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tessera_core::Transaction;
use tessera_state::AccountLedger;

use crate::error::VmError;

/// Checks applied to every transaction, shared by composition and processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Require the transaction nonce to equal the sender's account nonce.
    /// When off, the transfer advances the account nonce regardless.
    pub verify_nonce: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        ExecutionPolicy { verify_nonce: true }
    }
}

/// Check signature, funds and nonce, in that order, against `ledger`
pub fn validate_transaction<L: AccountLedger + ?Sized>(
    tx: &Transaction,
    ledger: &L,
    policy: &ExecutionPolicy,
) -> Result<(), VmError> {
    tx.verify_signature()
        .map_err(|e| VmError::InvalidSignature(e.to_string()))?;

    if !ledger.has_funds(&tx.sender, &tx.value) {
        let have = ledger
            .account_state(&tx.sender)
            .map(|a| a.balance)
            .unwrap_or_else(BigUint::default);
        return Err(VmError::InsufficientBalance {
            have,
            need: tx.value.clone(),
        });
    }

    if policy.verify_nonce && !ledger.has_correct_nonce(&tx.sender, tx.nonce) {
        let expected = ledger.account_state(&tx.sender).map_or(0, |a| a.nonce);
        return Err(VmError::InvalidNonce {
            expected,
            got: tx.nonce,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Address, GenesisConfig, KeyPair, Sig};
    use tessera_state::{Ledger, MemoryStorage};

    fn setup() -> (KeyPair, Ledger<MemoryStorage>) {
        let mint = KeyPair::from_seed_phrase("mint");
        let genesis = GenesisConfig::new(
            0,
            Address::from_public_key(&mint.public),
            BigUint::from(100u32),
        );
        let ledger = Ledger::open(MemoryStorage::new(), &genesis).unwrap();
        (mint, ledger)
    }

    fn transfer(sender: &KeyPair, value: u32, nonce: u64) -> Transaction {
        Transaction::new_signed(
            sender,
            Address([1u8; 32]),
            BigUint::from(value),
            nonce,
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_transaction() {
        let (mint, ledger) = setup();
        let tx = transfer(&mint, 100, 0);
        assert!(validate_transaction(&tx, &ledger, &ExecutionPolicy::default()).is_ok());
    }

    #[test]
    fn test_each_check_rejects() {
        let (mint, ledger) = setup();
        let policy = ExecutionPolicy::default();

        let mut forged = transfer(&mint, 10, 0);
        forged.signature = Sig::default();
        assert!(matches!(
            validate_transaction(&forged, &ledger, &policy),
            Err(VmError::InvalidSignature(_))
        ));

        let broke = transfer(&mint, 101, 0);
        assert!(matches!(
            validate_transaction(&broke, &ledger, &policy),
            Err(VmError::InsufficientBalance { .. })
        ));

        let early = transfer(&mint, 10, 1);
        assert!(matches!(
            validate_transaction(&early, &ledger, &policy),
            Err(VmError::InvalidNonce {
                expected: 0,
                got: 1
            })
        ));
    }

    #[test]
    fn test_nonce_check_can_be_disabled() {
        let (mint, ledger) = setup();
        let policy = ExecutionPolicy {
            verify_nonce: false,
        };
        assert!(validate_transaction(&transfer(&mint, 10, 7), &ledger, &policy).is_ok());
    }

    #[test]
    fn test_unknown_sender_has_no_funds() {
        let (_, ledger) = setup();
        let stranger = KeyPair::generate();
        assert!(matches!(
            validate_transaction(&transfer(&stranger, 1, 0), &ledger, &ExecutionPolicy::default()),
            Err(VmError::InsufficientBalance { .. })
        ));
    }
}
