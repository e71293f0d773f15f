//! Schnorr multi-signatures over the Ristretto group.
//!
//! The scheme follows Bellare–Neven: every signer `i` holds a key `x_i` with
//! public point `X_i = x_i·G`, publishes a commitment `R_i = r_i·G`, and
//! answers the per-signer challenge `c_i = H(L ‖ X_i ‖ R ‖ m)` with the share
//! `s_i = r_i + c_i·x_i`. Here `L` is the ordered list of all signer keys and
//! `R` the sum of the participating commitments. An aggregate `(R, s)` with
//! `s = Σ s_i` verifies iff `s·G == R + Σ c_i·X_i`.
//!
//! Participation is expressed as a [`Bitmap`] over the positions of `L`.
//! Every list passed to the aggregation functions is indexed by signer
//! position; entries whose bit is clear are ignored.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::keys::{KeyPair, SecretKey};
use crate::error::CoreError;

const KEY_CONTEXT: &str = "tessera 2024 multisig signer key";
const CHALLENGE_CONTEXT: &str = "tessera 2024 multisig challenge";

macro_rules! encoded_element {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn from_slice(slice: &[u8]) -> Option<Self> {
                let bytes: [u8; 32] = slice.try_into().ok()?;
                Some($name(bytes))
            }

            pub fn from_hex(s: &str) -> Result<Self, CoreError> {
                let bytes = hex::decode(s)?;
                Self::from_slice(&bytes).ok_or(CoreError::InvalidHashLength)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }
    };
}

encoded_element!(
    /// Compressed public point of a consensus-group member
    MultiSigPublicKey
);
encoded_element!(
    /// Compressed commitment point, per signer or aggregated
    Commitment
);
encoded_element!(
    /// One signer's response scalar
    SignatureShare
);
encoded_element!(
    /// Sum of the participating response scalars
    AggregatedSignature
);

/// Participation mask over signer positions (bit `i` = signer `i`)
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bitmap(pub u64);

impl Bitmap {
    pub const MAX_SIGNERS: usize = 64;

    /// Mask selecting exactly the `n` low positions
    pub fn all(n: usize) -> Result<Self, CoreError> {
        match n {
            0..=63 => Ok(Bitmap((1u64 << n) - 1)),
            64 => Ok(Bitmap(u64::MAX)),
            _ => Err(CoreError::GroupTooLarge(n)),
        }
    }

    pub fn is_set(&self, index: usize) -> bool {
        index < Self::MAX_SIGNERS && (self.0 >> index) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        if index < Self::MAX_SIGNERS {
            self.0 |= 1u64 << index;
        }
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// True when no bit at or above `len` is set
    pub fn fits(&self, len: usize) -> bool {
        len >= Self::MAX_SIGNERS || self.0 >> len == 0
    }

    fn selected(&self, len: usize) -> impl Iterator<Item = usize> + '_ {
        (0..len).filter(move |i| self.is_set(*i))
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({:#b})", self.0)
    }
}

/// Long-term multi-signature key of a group member
#[derive(Clone)]
pub struct MultiSigSecret(Scalar);

impl MultiSigSecret {
    /// Derive the group signing key from a node's Ed25519 seed
    pub fn from_secret_key(secret: &SecretKey) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(KEY_CONTEXT);
        hasher.update(&secret.to_bytes());
        MultiSigSecret(wide_scalar(hasher))
    }

    pub fn public_key(&self) -> MultiSigPublicKey {
        MultiSigPublicKey((RISTRETTO_BASEPOINT_POINT * self.0).compress().to_bytes())
    }
}

impl fmt::Debug for MultiSigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiSigSecret([REDACTED])")
    }
}

#[derive(Clone, Debug)]
pub struct MultiSigKeyPair {
    pub secret: MultiSigSecret,
    pub public: MultiSigPublicKey,
}

impl MultiSigKeyPair {
    pub fn from_keypair(keypair: &KeyPair) -> Self {
        let secret = MultiSigSecret::from_secret_key(&keypair.secret);
        let public = secret.public_key();
        MultiSigKeyPair { secret, public }
    }
}

/// Per-round nonce `r_i`; must never be reused across messages
pub struct CommitmentSecret(Scalar);

impl fmt::Debug for CommitmentSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitmentSecret([REDACTED])")
    }
}

/// Fiat–Shamir challenge `c_i`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Challenge(Scalar);

impl Challenge {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", hex::encode(self.0.to_bytes()))
    }
}

/// The multi-signature protocol as consumed by block signing and validation
pub trait MultiSignatureScheme: Send + Sync {
    fn commitment_secret(&self) -> CommitmentSecret;

    fn commitment(&self, secret: &CommitmentSecret) -> Commitment;

    fn aggregate_commitments(
        &self,
        commitments: &[Commitment],
        bitmap: Bitmap,
    ) -> Result<Commitment, CoreError>;

    fn challenge(
        &self,
        signers: &[MultiSigPublicKey],
        signer: &MultiSigPublicKey,
        aggregated_commitment: &Commitment,
        message: &[u8],
        bitmap: Bitmap,
    ) -> Result<Challenge, CoreError>;

    fn signature_share(
        &self,
        challenge: &Challenge,
        private_key: &MultiSigSecret,
        commitment_secret: &CommitmentSecret,
    ) -> SignatureShare;

    /// Check one share against its signer's own commitment
    fn verify_signature_share(
        &self,
        signers: &[MultiSigPublicKey],
        signer_index: usize,
        share: &SignatureShare,
        commitment: &Commitment,
        aggregated_commitment: &Commitment,
        message: &[u8],
        bitmap: Bitmap,
    ) -> bool;

    fn aggregate_signatures(
        &self,
        shares: &[SignatureShare],
        bitmap: Bitmap,
    ) -> Result<AggregatedSignature, CoreError>;

    fn verify_aggregated_signature(
        &self,
        signers: &[MultiSigPublicKey],
        signature: &AggregatedSignature,
        aggregated_commitment: &Commitment,
        message: &[u8],
        bitmap: Bitmap,
    ) -> bool;
}

/// Bellare–Neven multi-signature with Blake3 as the random oracle
#[derive(Debug, Clone, Copy, Default)]
pub struct SchnorrMultiSig;

impl SchnorrMultiSig {
    pub fn new() -> Self {
        SchnorrMultiSig
    }
}

fn wide_scalar(hasher: blake3::Hasher) -> Scalar {
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn decode_point(bytes: &[u8; 32]) -> Option<RistrettoPoint> {
    CompressedRistretto(*bytes).decompress()
}

/// Signer keys additionally exclude the identity, which would sign anything
fn decode_signer(key: &MultiSigPublicKey) -> Option<RistrettoPoint> {
    decode_point(key.as_bytes()).filter(|point| !point.is_identity())
}

fn decode_scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes))
}

fn challenge_scalar(
    signers: &[MultiSigPublicKey],
    signer: &MultiSigPublicKey,
    aggregated_commitment: &Commitment,
    message: &[u8],
) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(CHALLENGE_CONTEXT);
    hasher.update(&(signers.len() as u64).to_le_bytes());
    for key in signers {
        hasher.update(key.as_bytes());
    }
    hasher.update(signer.as_bytes());
    hasher.update(aggregated_commitment.as_bytes());
    hasher.update(message);
    wide_scalar(hasher)
}

fn check_selection(bitmap: Bitmap, len: usize) -> Result<(), CoreError> {
    if !bitmap.fits(len) {
        return Err(CoreError::ContributionCount {
            expected: bitmap.count(),
            got: len,
        });
    }
    if bitmap.count() == 0 {
        return Err(CoreError::ContributionCount {
            expected: 1,
            got: 0,
        });
    }
    Ok(())
}

impl MultiSignatureScheme for SchnorrMultiSig {
    fn commitment_secret(&self) -> CommitmentSecret {
        CommitmentSecret(Scalar::random(&mut OsRng))
    }

    fn commitment(&self, secret: &CommitmentSecret) -> Commitment {
        Commitment((RISTRETTO_BASEPOINT_POINT * secret.0).compress().to_bytes())
    }

    fn aggregate_commitments(
        &self,
        commitments: &[Commitment],
        bitmap: Bitmap,
    ) -> Result<Commitment, CoreError> {
        check_selection(bitmap, commitments.len())?;

        let mut sum = Vec::with_capacity(bitmap.count());
        for index in bitmap.selected(commitments.len()) {
            sum.push(decode_point(commitments[index].as_bytes()).ok_or(CoreError::InvalidPoint)?);
        }
        let aggregated: RistrettoPoint = sum.iter().sum();
        Ok(Commitment(aggregated.compress().to_bytes()))
    }

    fn challenge(
        &self,
        signers: &[MultiSigPublicKey],
        signer: &MultiSigPublicKey,
        aggregated_commitment: &Commitment,
        message: &[u8],
        bitmap: Bitmap,
    ) -> Result<Challenge, CoreError> {
        let index = signers
            .iter()
            .position(|key| key == signer)
            .ok_or_else(|| CoreError::UnknownSigner(signer.to_hex()))?;
        if !bitmap.is_set(index) {
            return Err(CoreError::SignerNotSelected(index));
        }

        Ok(Challenge(challenge_scalar(
            signers,
            signer,
            aggregated_commitment,
            message,
        )))
    }

    fn signature_share(
        &self,
        challenge: &Challenge,
        private_key: &MultiSigSecret,
        commitment_secret: &CommitmentSecret,
    ) -> SignatureShare {
        let share = commitment_secret.0 + challenge.0 * private_key.0;
        SignatureShare(share.to_bytes())
    }

    fn verify_signature_share(
        &self,
        signers: &[MultiSigPublicKey],
        signer_index: usize,
        share: &SignatureShare,
        commitment: &Commitment,
        aggregated_commitment: &Commitment,
        message: &[u8],
        bitmap: Bitmap,
    ) -> bool {
        let Some(signer) = signers.get(signer_index) else {
            return false;
        };
        if !bitmap.is_set(signer_index) {
            return false;
        }
        let (Some(s), Some(r), Some(x)) = (
            decode_scalar(share.as_bytes()),
            decode_point(commitment.as_bytes()),
            decode_signer(signer),
        ) else {
            return false;
        };

        let c = challenge_scalar(signers, signer, aggregated_commitment, message);
        RISTRETTO_BASEPOINT_POINT * s == r + x * c
    }

    fn aggregate_signatures(
        &self,
        shares: &[SignatureShare],
        bitmap: Bitmap,
    ) -> Result<AggregatedSignature, CoreError> {
        check_selection(bitmap, shares.len())?;

        let mut sum = Scalar::ZERO;
        for index in bitmap.selected(shares.len()) {
            sum += decode_scalar(shares[index].as_bytes()).ok_or(CoreError::InvalidScalar)?;
        }
        Ok(AggregatedSignature(sum.to_bytes()))
    }

    fn verify_aggregated_signature(
        &self,
        signers: &[MultiSigPublicKey],
        signature: &AggregatedSignature,
        aggregated_commitment: &Commitment,
        message: &[u8],
        bitmap: Bitmap,
    ) -> bool {
        if signers.is_empty() || signers.len() > Bitmap::MAX_SIGNERS {
            return false;
        }
        if bitmap.count() == 0 || !bitmap.fits(signers.len()) {
            return false;
        }
        let (Some(s), Some(r)) = (
            decode_scalar(signature.as_bytes()),
            decode_point(aggregated_commitment.as_bytes()),
        ) else {
            return false;
        };

        let mut expected = r;
        for index in bitmap.selected(signers.len()) {
            let signer = &signers[index];
            let Some(x) = decode_signer(signer) else {
                return false;
            };
            expected += x * challenge_scalar(signers, signer, aggregated_commitment, message);
        }

        RISTRETTO_BASEPOINT_POINT * s == expected
    }
}
