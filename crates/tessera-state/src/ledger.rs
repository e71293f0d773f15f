use std::collections::BTreeMap;
use std::sync::Arc;

use num_bigint::BigUint;
use tessera_core::{serialize, Account, Address, GenesisConfig, Hash};
use tracing::{debug, info};

use crate::error::StateError;
use crate::merkle::compute_state_root;
use crate::storage::Storage;

const ACCOUNT_PREFIX: &[u8] = b"acc:";

fn account_key(address: &Address) -> Vec<u8> {
    [ACCOUNT_PREFIX, address.as_bytes()].concat()
}

/// Read and transfer operations shared by the authoritative ledger and its
/// sandboxes
pub trait AccountLedger {
    /// `None` when the address has never been touched
    fn account_state(&self, address: &Address) -> Option<Account>;

    fn has_funds(&self, address: &Address, amount: &BigUint) -> bool {
        match self.account_state(address) {
            Some(account) => account.can_afford(amount),
            None => *amount == BigUint::default(),
        }
    }

    fn has_correct_nonce(&self, address: &Address, nonce: u64) -> bool {
        self.account_state(address).map_or(0, |a| a.nonce) == nonce
    }

    /// Move `amount` from `sender` to `receiver` and set the sender nonce to
    /// `nonce + 1`. Nothing is mutated when the funds or nonce are wrong.
    fn transfer(
        &mut self,
        sender: &Address,
        receiver: &Address,
        amount: &BigUint,
        nonce: u64,
    ) -> Result<(), StateError>;

    /// Merkle root over every account
    fn digest(&self) -> Result<Hash, StateError>;
}

/// Account deltas over a shared, immutable snapshot
#[derive(Debug, Clone, Default)]
struct AccountOverlay {
    base: Arc<BTreeMap<Address, Account>>,
    changes: BTreeMap<Address, Account>,
}

impl AccountOverlay {
    fn get(&self, address: &Address) -> Option<&Account> {
        self.changes.get(address).or_else(|| self.base.get(address))
    }

    fn get_or_new(&self, address: &Address) -> Account {
        self.get(address)
            .cloned()
            .unwrap_or_else(|| Account::new(*address))
    }

    fn transfer(
        &mut self,
        sender: &Address,
        receiver: &Address,
        amount: &BigUint,
        nonce: u64,
    ) -> Result<(), StateError> {
        let mut from = self.get_or_new(sender);
        if from.nonce != nonce {
            return Err(StateError::NonceMismatch {
                expected: from.nonce,
                got: nonce,
            });
        }
        let next_nonce = nonce
            .checked_add(1)
            .ok_or_else(|| StateError::NonceOverflow(sender.to_hex()))?;
        if !from.debit(amount) {
            return Err(StateError::InsufficientBalance {
                have: from.balance,
                need: amount.clone(),
            });
        }
        from.nonce = next_nonce;

        if sender == receiver {
            from.credit(amount);
        } else {
            let mut to = self.get_or_new(receiver);
            to.credit(amount);
            self.changes.insert(*receiver, to);
        }
        self.changes.insert(*sender, from);
        Ok(())
    }

    fn digest(&self) -> Result<Hash, StateError> {
        let mut view: BTreeMap<&Address, &Account> = self.base.iter().collect();
        view.extend(self.changes.iter());

        let mut entries = Vec::with_capacity(view.len());
        for (address, account) in view {
            entries.push((account_key(address), serialize::to_bytes(account)?));
        }
        Ok(compute_state_root(
            entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        ))
    }
}

/// The authoritative account ledger
///
/// Transfers accumulate as pending changes until [`Ledger::commit`] persists
/// them or [`Ledger::rollback`] drops them.
pub struct Ledger<S: Storage> {
    storage: S,
    state: AccountOverlay,
}

impl<S: Storage> Ledger<S> {
    /// Load persisted accounts, minting the genesis account into empty storage
    pub fn open(storage: S, genesis: &GenesisConfig) -> Result<Self, StateError> {
        let mut accounts = BTreeMap::new();
        for key in storage.keys_with_prefix(ACCOUNT_PREFIX) {
            if let Some(value) = storage.get(&key) {
                let account: Account = serialize::from_bytes(&value)?;
                accounts.insert(account.address, account);
            }
        }

        let mut ledger = Ledger {
            storage,
            state: AccountOverlay {
                base: Arc::new(accounts),
                changes: BTreeMap::new(),
            },
        };

        if ledger.state.base.is_empty() {
            info!(
                "Minting {} to genesis account {}",
                genesis.mint_balance, genesis.mint_address
            );
            let mint = Account::with_balance(genesis.mint_address, genesis.mint_balance.clone());
            ledger.state.changes.insert(mint.address, mint);
            ledger.commit()?;
        } else {
            debug!("Loaded {} accounts", ledger.state.base.len());
        }

        Ok(ledger)
    }

    /// An isolated copy of the current state for trial execution
    pub fn begin_sandbox(&self) -> SandboxLedger {
        SandboxLedger {
            state: AccountOverlay {
                base: Arc::clone(&self.state.base),
                changes: self.state.changes.clone(),
            },
        }
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.state.changes.is_empty()
    }

    /// Committed accounts in address order
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.state.base.values()
    }

    /// Persist pending changes; irrevocable once it returns
    ///
    /// On error the changes stay pending and nothing reaches storage.
    pub fn commit(&mut self) -> Result<(), StateError> {
        self.stage_changes()?;
        self.commit_staged()
    }

    /// Write pending changes into storage without making them durable
    pub(crate) fn stage_changes(&mut self) -> Result<(), StateError> {
        let mut encoded = Vec::with_capacity(self.state.changes.len());
        for (address, account) in &self.state.changes {
            encoded.push((account_key(address), serialize::to_bytes(account)?));
        }
        for (key, value) in &encoded {
            self.storage.put(key, value);
        }
        Ok(())
    }

    /// Make staged changes durable and fold them into the committed state
    pub(crate) fn commit_staged(&mut self) -> Result<(), StateError> {
        if let Err(e) = self.storage.commit() {
            self.storage.rollback();
            return Err(e);
        }

        let changes = std::mem::take(&mut self.state.changes);
        debug!("Committed {} account changes", changes.len());
        Arc::make_mut(&mut self.state.base).extend(changes);
        Ok(())
    }

    /// Drop every change since the last commit
    pub fn rollback(&mut self) {
        if self.has_pending_changes() {
            debug!("Rolling back {} account changes", self.state.changes.len());
        }
        self.state.changes.clear();
        self.storage.rollback();
    }
}

impl<S: Storage> AccountLedger for Ledger<S> {
    fn account_state(&self, address: &Address) -> Option<Account> {
        self.state.get(address).cloned()
    }

    fn transfer(
        &mut self,
        sender: &Address,
        receiver: &Address,
        amount: &BigUint,
        nonce: u64,
    ) -> Result<(), StateError> {
        self.state.transfer(sender, receiver, amount, nonce)
    }

    fn digest(&self) -> Result<Hash, StateError> {
        self.state.digest()
    }
}

/// Disposable trial-execution copy of a [`Ledger`]
#[derive(Debug, Clone)]
pub struct SandboxLedger {
    state: AccountOverlay,
}

impl SandboxLedger {
    /// Accounts modified inside this sandbox
    pub fn touched(&self) -> usize {
        self.state.changes.len()
    }
}

impl AccountLedger for SandboxLedger {
    fn account_state(&self, address: &Address) -> Option<Account> {
        self.state.get(address).cloned()
    }

    fn transfer(
        &mut self,
        sender: &Address,
        receiver: &Address,
        amount: &BigUint,
        nonce: u64,
    ) -> Result<(), StateError> {
        self.state.transfer(sender, receiver, amount, nonce)
    }

    fn digest(&self) -> Result<Hash, StateError> {
        self.state.digest()
    }
}
