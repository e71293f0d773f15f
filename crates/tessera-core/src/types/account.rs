use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::PublicKey;
use crate::error::CoreError;

/// Account identifier: the raw bytes of the holder's Ed25519 public key
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Address(*public_key.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = slice.try_into().ok()?;
        Some(Address(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes).ok_or(CoreError::InvalidHashLength)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<PublicKey> for Address {
    fn from(public_key: PublicKey) -> Self {
        Address::from_public_key(&public_key)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An account in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: BigUint,
    /// Count of applied outgoing transactions
    pub nonce: u64,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Account {
            address,
            balance: BigUint::default(),
            nonce: 0,
        }
    }

    pub fn with_balance(address: Address, balance: BigUint) -> Self {
        Account {
            address,
            balance,
            nonce: 0,
        }
    }

    pub fn can_afford(&self, amount: &BigUint) -> bool {
        &self.balance >= amount
    }

    pub fn credit(&mut self, amount: &BigUint) {
        self.balance += amount;
    }

    /// Debit `amount`, refusing to go below zero
    pub fn debit(&mut self, amount: &BigUint) -> bool {
        if !self.can_afford(amount) {
            return false;
        }
        self.balance -= amount;
        true
    }
}
