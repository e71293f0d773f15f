//! Tessera Core - Core types, cryptography, and serialization
//!
//! This crate provides the data model shared by the ledger, the transaction
//! executor and the consensus pipeline, together with the hashing, Ed25519
//! and Schnorr multi-signature primitives that authenticate it.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{
    hash_blake3, merkle_root, sign, verify, AggregatedSignature, Bitmap, Challenge, Commitment,
    CommitmentSecret, Hash, KeyPair, MultiSigKeyPair, MultiSigPublicKey, MultiSigSecret,
    MultiSignatureScheme, PublicKey, SchnorrMultiSig, SecretKey, Sig, SignatureShare,
};
pub use error::CoreError;
pub use types::*;
