use std::collections::BTreeSet;

use tessera_core::MultiSigPublicKey;

use crate::chronology::Round;

/// Decides whether a block's signer list may sign for a round
pub trait SignerEligibility: Send + Sync {
    fn is_eligible(&self, round: &Round, signers: &[MultiSigPublicKey]) -> bool;
}

/// Accepts any signer list; the signature itself is still verified
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllSigners;

impl SignerEligibility for AcceptAllSigners {
    fn is_eligible(&self, _round: &Round, _signers: &[MultiSigPublicKey]) -> bool {
        true
    }
}

/// Signers must be distinct members of a fixed consensus group
#[derive(Debug, Clone)]
pub struct ConsensusGroupEligibility {
    group: BTreeSet<MultiSigPublicKey>,
}

impl ConsensusGroupEligibility {
    pub fn new(group: impl IntoIterator<Item = MultiSigPublicKey>) -> Self {
        ConsensusGroupEligibility {
            group: group.into_iter().collect(),
        }
    }
}

impl SignerEligibility for ConsensusGroupEligibility {
    fn is_eligible(&self, _round: &Round, signers: &[MultiSigPublicKey]) -> bool {
        let mut seen = BTreeSet::new();
        !signers.is_empty()
            && signers
                .iter()
                .all(|signer| self.group.contains(signer) && seen.insert(*signer))
    }
}
