pub mod hash;
pub mod keys;
pub mod multisig;
pub mod signature;

pub use hash::{hash_blake3, merkle_root, Hash};
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use multisig::{
    AggregatedSignature, Bitmap, Challenge, Commitment, CommitmentSecret, MultiSigKeyPair,
    MultiSigPublicKey, MultiSigSecret, MultiSignatureScheme, SchnorrMultiSig, SignatureShare,
};
pub use signature::{sign, verify, Sig};
