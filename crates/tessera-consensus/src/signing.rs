use std::sync::Arc;

use tessera_core::{
    Bitmap, Block, Challenge, Commitment, CommitmentSecret, Hash, MultiSigKeyPair,
    MultiSigPublicKey, MultiSignatureScheme, SignatureShare,
};
use tracing::debug;

use crate::error::ConsensusError;

/// Participants fixed at the close of round 1
struct Participants {
    signers: Vec<MultiSigPublicKey>,
    commitments: Vec<Commitment>,
    aggregated: Commitment,
    bitmap: Bitmap,
    message: Hash,
}

/// Bookkeeping for one block signing round across the consensus group
///
/// Round 1 collects commitments from group members. Closing it fixes the
/// participant set, which becomes the block's signer list, and yields the
/// aggregated commitment. Round 3 collects one verified share per
/// participant; [`SigningSession::finalize`] then attaches the signature.
pub struct SigningSession {
    scheme: Arc<dyn MultiSignatureScheme>,
    block: Block,
    group: Vec<MultiSigPublicKey>,
    commitments: Vec<Option<Commitment>>,
    participants: Option<Participants>,
    shares: Vec<Option<SignatureShare>>,
}

impl SigningSession {
    pub fn new(
        scheme: Arc<dyn MultiSignatureScheme>,
        block: Block,
        group: Vec<MultiSigPublicKey>,
    ) -> Result<Self, ConsensusError> {
        if group.is_empty() {
            return Err(ConsensusError::InvalidArgument(
                "signing group is empty".into(),
            ));
        }
        Bitmap::all(group.len())?;

        let slots = group.len();
        Ok(SigningSession {
            scheme,
            block,
            group,
            commitments: vec![None; slots],
            participants: None,
            shares: Vec::new(),
        })
    }

    fn group_index(&self, signer: &MultiSigPublicKey) -> Result<usize, ConsensusError> {
        self.group
            .iter()
            .position(|member| member == signer)
            .ok_or_else(|| ConsensusError::UnknownSigner(signer.to_hex()))
    }

    fn participants(&self) -> Result<&Participants, ConsensusError> {
        self.participants
            .as_ref()
            .ok_or_else(|| ConsensusError::SigningOrder("commitments not yet aggregated".into()))
    }

    /// Round 1: record a member's commitment
    pub fn add_commitment(
        &mut self,
        signer: &MultiSigPublicKey,
        commitment: Commitment,
    ) -> Result<(), ConsensusError> {
        if self.participants.is_some() {
            return Err(ConsensusError::SigningOrder(
                "commitment after participants closed".into(),
            ));
        }
        let index = self.group_index(signer)?;
        if self.commitments[index].is_some() {
            return Err(ConsensusError::SigningOrder(format!(
                "duplicate commitment from {}",
                signer
            )));
        }
        self.commitments[index] = Some(commitment);
        debug!("Commitment {}/{} from {}", self.commitment_count(), self.group.len(), signer);
        Ok(())
    }

    pub fn commitment_count(&self) -> usize {
        self.commitments.iter().flatten().count()
    }

    /// Round 2: close the participant set and aggregate its commitments
    pub fn aggregate_commitments(&mut self) -> Result<Commitment, ConsensusError> {
        if let Some(participants) = &self.participants {
            return Ok(participants.aggregated);
        }

        let (signers, commitments): (Vec<_>, Vec<_>) = self
            .group
            .iter()
            .zip(&self.commitments)
            .filter_map(|(member, commitment)| commitment.map(|c| (*member, c)))
            .unzip();
        if signers.is_empty() {
            return Err(ConsensusError::MissingContributions { have: 0, need: 1 });
        }

        let bitmap = Bitmap::all(signers.len())?;
        let aggregated = self.scheme.aggregate_commitments(&commitments, bitmap)?;

        self.block.signers = signers.clone();
        let message = self.block.signing_hash()?;
        self.shares = vec![None; signers.len()];
        self.participants = Some(Participants {
            signers,
            commitments,
            aggregated,
            bitmap,
            message,
        });
        Ok(aggregated)
    }

    /// Message participants sign, available once commitments are aggregated
    pub fn message(&self) -> Option<Hash> {
        self.participants.as_ref().map(|p| p.message)
    }

    pub fn signers(&self) -> Option<&[MultiSigPublicKey]> {
        self.participants.as_ref().map(|p| p.signers.as_slice())
    }

    pub fn challenge(&self, signer: &MultiSigPublicKey) -> Result<Challenge, ConsensusError> {
        let p = self.participants()?;
        Ok(self.scheme.challenge(
            &p.signers,
            signer,
            &p.aggregated,
            p.message.as_bytes(),
            p.bitmap,
        )?)
    }

    /// Compute a participant's share from its key and round-1 secret
    pub fn sign_share(
        &self,
        key: &MultiSigKeyPair,
        secret: &CommitmentSecret,
    ) -> Result<SignatureShare, ConsensusError> {
        let challenge = self.challenge(&key.public)?;
        Ok(self.scheme.signature_share(&challenge, &key.secret, secret))
    }

    /// Round 3: record a participant's share after checking it
    pub fn add_share(
        &mut self,
        signer: &MultiSigPublicKey,
        share: SignatureShare,
    ) -> Result<(), ConsensusError> {
        let p = self.participants()?;
        let index = p
            .signers
            .iter()
            .position(|s| s == signer)
            .ok_or_else(|| ConsensusError::UnknownSigner(signer.to_hex()))?;

        let valid = self.scheme.verify_signature_share(
            &p.signers,
            index,
            &share,
            &p.commitments[index],
            &p.aggregated,
            p.message.as_bytes(),
            p.bitmap,
        );
        if !valid {
            return Err(ConsensusError::InvalidShare(signer.to_hex()));
        }

        self.shares[index] = Some(share);
        Ok(())
    }

    /// Aggregate the shares into the block's signature
    pub fn finalize(mut self) -> Result<Block, ConsensusError> {
        let p = self.participants()?;
        let shares: Vec<SignatureShare> = self.shares.iter().flatten().copied().collect();
        if shares.len() != p.signers.len() {
            return Err(ConsensusError::MissingContributions {
                have: shares.len(),
                need: p.signers.len(),
            });
        }

        let signature = self.scheme.aggregate_signatures(&shares, p.bitmap)?;
        let aggregated = p.aggregated;
        self.block.commitment = aggregated;
        self.block.signature = signature;
        Ok(self.block)
    }
}
