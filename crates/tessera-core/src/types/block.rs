use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::crypto::{AggregatedSignature, Bitmap, Commitment, Hash, MultiSigPublicKey};
use crate::error::CoreError;
use crate::serialize;
use crate::types::account::Address;

/// A block of transfers, authenticated by a consensus-group multi-signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Sequence number, 0 for genesis
    pub nonce: u64,
    pub round_index: u64,
    /// Unix time in milliseconds
    pub timestamp: u64,
    /// Digest of the parent block, [`Hash::ZERO`] for the first block
    pub prev_hash: Hash,
    /// Digests of the included transactions, in execution order
    pub tx_hashes: Vec<Hash>,
    /// Ledger digest after executing `tx_hashes`
    pub state_root: Hash,
    pub signers: Vec<MultiSigPublicKey>,
    pub commitment: Commitment,
    pub signature: AggregatedSignature,
}

/// The fields covered by the block signature
#[derive(Serialize)]
struct BlockSigningView<'a> {
    nonce: u64,
    round_index: u64,
    timestamp: u64,
    prev_hash: &'a Hash,
    tx_hashes: &'a [Hash],
    state_root: &'a Hash,
    signers: &'a [MultiSigPublicKey],
}

impl Block {
    /// An unsigned block with no transactions
    pub fn new(nonce: u64, round_index: u64, timestamp: u64, prev_hash: Hash) -> Self {
        Block {
            nonce,
            round_index,
            timestamp,
            prev_hash,
            tx_hashes: Vec::new(),
            state_root: Hash::ZERO,
            signers: Vec::new(),
            commitment: Commitment::default(),
            signature: AggregatedSignature::default(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.nonce == 0
    }

    /// Digest of the whole block; identifies it in the chain store
    pub fn hash(&self) -> Result<Hash, CoreError> {
        serialize::digest(self)
    }

    /// Digest of the block without its commitment and signature; the
    /// message every signer signs
    pub fn signing_hash(&self) -> Result<Hash, CoreError> {
        serialize::digest(&BlockSigningView {
            nonce: self.nonce,
            round_index: self.round_index,
            timestamp: self.timestamp,
            prev_hash: &self.prev_hash,
            tx_hashes: &self.tx_hashes,
            state_root: &self.state_root,
            signers: &self.signers,
        })
    }

    /// Participation mask claiming every listed signer
    pub fn signer_bitmap(&self) -> Result<Bitmap, CoreError> {
        Bitmap::all(self.signers.len())
    }
}

/// Chain parameters fixed at genesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Unix time in milliseconds at which round 0 starts
    pub timestamp: u64,
    pub mint_address: Address,
    pub mint_balance: BigUint,
}

impl GenesisConfig {
    pub fn new(timestamp: u64, mint_address: Address, mint_balance: BigUint) -> Self {
        GenesisConfig {
            timestamp,
            mint_address,
            mint_balance,
        }
    }
}
