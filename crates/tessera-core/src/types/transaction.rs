use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::crypto::{sign, verify, Hash, KeyPair, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;
use crate::types::account::Address;

/// A value transfer between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub receiver: Address,
    pub value: BigUint,
    /// Must equal the sender's current account nonce
    pub nonce: u64,
    /// Opaque application data
    pub payload: Vec<u8>,
    pub sender_pubkey: PublicKey,
    /// Signature over every field except itself
    pub signature: Sig,
}

/// Borrowed view of the signed fields
#[derive(Serialize)]
struct TransactionSigningView<'a> {
    sender: &'a Address,
    receiver: &'a Address,
    value: &'a BigUint,
    nonce: u64,
    payload: &'a [u8],
    sender_pubkey: &'a PublicKey,
}

impl Transaction {
    /// Create an unsigned transfer from the holder of `sender_pubkey`
    pub fn new(
        sender_pubkey: PublicKey,
        receiver: Address,
        value: BigUint,
        nonce: u64,
        payload: Vec<u8>,
    ) -> Self {
        Transaction {
            sender: Address::from_public_key(&sender_pubkey),
            receiver,
            value,
            nonce,
            payload,
            sender_pubkey,
            signature: Sig::default(),
        }
    }

    pub fn new_signed(
        sender: &KeyPair,
        receiver: Address,
        value: BigUint,
        nonce: u64,
        payload: Vec<u8>,
    ) -> Result<Self, CoreError> {
        let mut tx = Self::new(sender.public, receiver, value, nonce, payload);
        tx.sign(&sender.secret)?;
        Ok(tx)
    }

    fn signing_view(&self) -> TransactionSigningView<'_> {
        TransactionSigningView {
            sender: &self.sender,
            receiver: &self.receiver,
            value: &self.value,
            nonce: self.nonce,
            payload: &self.payload,
            sender_pubkey: &self.sender_pubkey,
        }
    }

    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(&self.signing_view())
    }

    pub fn sign(&mut self, secret_key: &SecretKey) -> Result<(), CoreError> {
        let bytes = self.signing_bytes()?;
        self.signature = sign(secret_key, &bytes);
        Ok(())
    }

    /// Check the signature and that the signing key owns the sender address
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        if Address::from_public_key(&self.sender_pubkey) != self.sender {
            return Err(CoreError::SenderKeyMismatch);
        }
        let bytes = self.signing_bytes()?;
        verify(&self.sender_pubkey, &bytes, &self.signature)
    }

    /// Digest over the full transaction, signature included
    pub fn hash(&self) -> Result<Hash, CoreError> {
        serialize::digest(self)
    }
}
