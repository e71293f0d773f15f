use std::fmt;
use std::sync::Arc;

use tessera_core::{Block, ExecutionReport, MultiSignatureScheme};
use tessera_state::{AccountLedger, ChainContext, Storage};
use tessera_vm::{ExecutionPolicy, Executor};
use tracing::{debug, info, warn};

use crate::chronology::{Round, RoundScheduler};
use crate::eligibility::{AcceptAllSigners, SignerEligibility};
use crate::error::ConsensusError;

/// Progress of a block through validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Received,
    StructuralOk,
    TemporalOk,
    SignatureOk,
    Executed,
    Committed,
    Rejected,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct BlockOutcome {
    /// `Committed` or `Rejected`
    pub state: BlockState,
    /// Last state reached before the terminal one
    pub reached: BlockState,
    pub report: ExecutionReport,
}

impl BlockOutcome {
    pub fn is_committed(&self) -> bool {
        self.state == BlockState::Committed
    }
}

/// Admits blocks into the chain: validates, re-executes, then commits or
/// rolls back the ledger
pub struct BlockValidator {
    scheduler: Arc<RoundScheduler>,
    scheme: Arc<dyn MultiSignatureScheme>,
    eligibility: Arc<dyn SignerEligibility>,
    executor: Executor,
}

/// Single processing attempt; every rejection rolls the ledger back
struct Attempt<'a, S: Storage> {
    context: &'a mut ChainContext<S>,
    state: BlockState,
}

impl<'a, S: Storage> Attempt<'a, S> {
    fn advance(&mut self, next: BlockState) {
        debug!("Block {} -> {}", self.state, next);
        self.state = next;
    }

    fn reject(self, report: ExecutionReport) -> BlockOutcome {
        self.context.ledger.rollback();
        warn!("Block rejected after {}: {}", self.state, report);
        BlockOutcome {
            state: BlockState::Rejected,
            reached: self.state,
            report,
        }
    }
}

impl BlockValidator {
    pub fn new(scheduler: Arc<RoundScheduler>, scheme: Arc<dyn MultiSignatureScheme>) -> Self {
        BlockValidator {
            scheduler,
            scheme,
            eligibility: Arc::new(AcceptAllSigners),
            executor: Executor::default(),
        }
    }

    pub fn with_eligibility(mut self, eligibility: Arc<dyn SignerEligibility>) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.executor = Executor::new(policy);
        self
    }

    /// Validate `block` and, if every check passes, commit it
    ///
    /// Invalid blocks produce a `Rejected` outcome, never an error. Errors are
    /// reserved for storage failures while committing.
    pub fn process<S: Storage>(
        &self,
        block: &Block,
        context: &mut ChainContext<S>,
    ) -> Result<BlockOutcome, ConsensusError> {
        let mut attempt = Attempt {
            context,
            state: BlockState::Received,
        };

        let hash = match block.hash() {
            Ok(hash) => hash,
            Err(e) => return Ok(attempt.reject(ExecutionReport::ko(format!("block not hashable: {}", e)))),
        };

        // Structure and ancestry
        if attempt.context.chain.contains_block(&hash) {
            return Ok(attempt.reject(ExecutionReport::ko("block already in chain")));
        }
        if !block.is_genesis() {
            let parent = match attempt.context.chain.get_block(&block.prev_hash) {
                Ok(Some(parent)) => parent,
                Ok(None) => {
                    return Ok(attempt.reject(ExecutionReport::ko("previous block not in chain")))
                }
                Err(e) => {
                    return Ok(attempt.reject(ExecutionReport::ko(format!(
                        "previous block unreadable: {}",
                        e
                    ))))
                }
            };
            if parent.nonce.checked_add(1) != Some(block.nonce) {
                return Ok(attempt.reject(ExecutionReport::ko(
                    "block nonce does not follow parent",
                )));
            }
            if attempt.context.chain.head() != Some(block.prev_hash) {
                return Ok(attempt.reject(ExecutionReport::ko(
                    "previous block is not the chain head",
                )));
            }
        }
        let genesis_timestamp = if block.is_genesis() {
            if attempt.context.chain.genesis().is_some() {
                return Ok(attempt.reject(ExecutionReport::ko("genesis already installed")));
            }
            block.timestamp
        } else {
            match attempt.context.chain.genesis().map(|genesis| genesis.timestamp) {
                Some(timestamp) => timestamp,
                None => return Ok(attempt.reject(ExecutionReport::ko("genesis missing"))),
            }
        };
        attempt.advance(BlockState::StructuralOk);

        // Round window
        let round = match self.scheduler.round_start(genesis_timestamp, block.round_index) {
            Some(start) => Round {
                index: block.round_index,
                start,
            },
            None => {
                return Ok(attempt.reject(ExecutionReport::ko("timestamp/round mismatch")));
            }
        };
        if !self.scheduler.is_within_round(&round, block.timestamp) {
            return Ok(attempt.reject(ExecutionReport::ko(format!(
                "timestamp/round mismatch: {} outside round {} starting {}",
                block.timestamp, round.index, round.start
            ))));
        }
        attempt.advance(BlockState::TemporalOk);

        // Signers and signature
        if !self.eligibility.is_eligible(&round, &block.signers) {
            return Ok(attempt.reject(ExecutionReport::ko("signers not eligible for round")));
        }
        if !self.signature_valid(block) {
            return Ok(attempt.reject(ExecutionReport::ko("signature not valid")));
        }
        attempt.advance(BlockState::SignatureOk);

        // Authoritative re-execution, stopping at the first failure
        let report = self.execute(block, attempt.context);
        if !report.is_ok() {
            return Ok(attempt.reject(report));
        }
        attempt.advance(BlockState::Executed);

        let digest = match attempt.context.ledger.digest() {
            Ok(digest) => digest,
            Err(e) => {
                return Ok(attempt.reject(report.combine(ExecutionReport::ko(format!(
                    "ledger digest unavailable: {}",
                    e
                )))))
            }
        };
        if digest != block.state_root {
            warn!(
                "State digest mismatch for block {}: declared {}, computed {}",
                hash, block.state_root, digest
            );
            return Ok(attempt.reject(report.combine(ExecutionReport::ko(
                "state digest mismatch",
            ))));
        }

        attempt.context.commit_block(block)?;
        info!(
            "Committed block {} at nonce {} ({} transactions)",
            hash,
            block.nonce,
            block.tx_hashes.len()
        );

        Ok(BlockOutcome {
            state: BlockState::Committed,
            reached: BlockState::Executed,
            report: report.combine(ExecutionReport::ok(format!(
                "ledger digest {}",
                digest
            ))),
        })
    }

    fn signature_valid(&self, block: &Block) -> bool {
        let (Ok(message), Ok(bitmap)) = (block.signing_hash(), block.signer_bitmap()) else {
            return false;
        };
        self.scheme.verify_aggregated_signature(
            &block.signers,
            &block.signature,
            &block.commitment,
            message.as_bytes(),
            bitmap,
        )
    }

    fn execute<S: Storage>(&self, block: &Block, context: &mut ChainContext<S>) -> ExecutionReport {
        let mut report = ExecutionReport::success();
        for tx_hash in &block.tx_hashes {
            let tx = match context.chain.get_transaction(tx_hash) {
                Ok(Some(tx)) => tx,
                Ok(None) => {
                    return report.combine(ExecutionReport::ko(format!(
                        "transaction {} not found",
                        tx_hash
                    )))
                }
                Err(e) => {
                    return report.combine(ExecutionReport::ko(format!(
                        "transaction {} unreadable: {}",
                        tx_hash, e
                    )))
                }
            };

            report = report.combine(self.executor.execute_transaction(&tx, &mut context.ledger));
            if !report.is_ok() {
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chronology::{ChronologyConfig, ManualClock};
    use crate::composer::BlockComposer;
    use crate::eligibility::ConsensusGroupEligibility;
    use num_bigint::BigUint;
    use tessera_core::{Address, GenesisConfig, KeyPair, MultiSigKeyPair, SchnorrMultiSig};
    use tessera_state::MemoryStorage;

    const GENESIS_TS: u64 = 50_000;

    struct Fixture {
        key: MultiSigKeyPair,
        clock: Arc<ManualClock>,
        composer: BlockComposer,
        validator: BlockValidator,
        context: ChainContext<MemoryStorage>,
    }

    fn fixture() -> Fixture {
        let mint = KeyPair::from_seed_phrase("mint");
        let genesis = GenesisConfig::new(
            GENESIS_TS,
            Address::from_public_key(&mint.public),
            BigUint::from(100u32),
        );
        let scheduler = Arc::new(RoundScheduler::new(&ChronologyConfig::default()).unwrap());
        let scheme: Arc<dyn MultiSignatureScheme> = Arc::new(SchnorrMultiSig::new());
        let clock = Arc::new(ManualClock::new(GENESIS_TS));

        Fixture {
            key: MultiSigKeyPair::from_keypair(&mint),
            composer: BlockComposer::new(scheduler.clone(), scheme.clone(), clock.clone()),
            validator: BlockValidator::new(scheduler, scheme),
            clock,
            context: ChainContext::open(MemoryStorage::new(), MemoryStorage::new(), genesis)
                .unwrap(),
        }
    }

    impl Fixture {
        fn next_signed(&self) -> Block {
            let block = self.composer.compose(&[], &self.context).unwrap().block;
            self.composer.sign(block, &self.key).unwrap()
        }
    }

    #[test]
    fn test_genesis_then_child() {
        let mut f = fixture();
        let genesis = f.next_signed();
        let outcome = f.validator.process(&genesis, &mut f.context).unwrap();
        assert!(outcome.is_committed(), "{}", outcome.report);
        assert_eq!(f.context.chain.genesis(), Some(&genesis));

        f.clock.advance(5_000);
        let child = f.next_signed();
        assert_eq!(child.prev_hash, genesis.hash().unwrap());
        assert_eq!(child.round_index, 1);

        let outcome = f.validator.process(&child, &mut f.context).unwrap();
        assert!(outcome.is_committed(), "{}", outcome.report);
        assert!(outcome.report.messages().last().unwrap().starts_with("ledger digest"));
        assert_eq!(f.context.chain.head(), Some(child.hash().unwrap()));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut f = fixture();
        let genesis = f.next_signed();
        f.validator.process(&genesis, &mut f.context).unwrap();

        let outcome = f.validator.process(&genesis, &mut f.context).unwrap();
        assert_eq!(outcome.state, BlockState::Rejected);
        assert_eq!(outcome.reached, BlockState::Received);
    }

    #[test]
    fn test_nonce_must_follow_parent() {
        let mut f = fixture();
        let genesis = f.next_signed();
        f.validator.process(&genesis, &mut f.context).unwrap();

        f.clock.advance(5_000);
        for nonce in [u64::MAX, 2, 7] {
            let mut block = f.composer.compose(&[], &f.context).unwrap().block;
            block.nonce = nonce;
            let block = f.composer.sign(block, &f.key).unwrap();

            let outcome = f.validator.process(&block, &mut f.context).unwrap();
            assert_eq!(outcome.state, BlockState::Rejected);
            assert_eq!(outcome.reached, BlockState::Received);
            assert_eq!(outcome.report.messages(), ["block nonce does not follow parent"]);
        }

        assert_eq!(f.context.chain.head(), Some(genesis.hash().unwrap()));
        assert_eq!(f.context.next_nonce().unwrap(), 1);
        assert_eq!(f.next_signed().nonce, 1);
    }

    #[test]
    fn test_stale_parent_rejected() {
        let mut f = fixture();
        let genesis = f.next_signed();
        f.validator.process(&genesis, &mut f.context).unwrap();

        f.clock.advance(5_000);
        let first = f.next_signed();
        assert!(f.validator.process(&first, &mut f.context).unwrap().is_committed());

        // A sibling of `first` built on genesis
        f.clock.advance(5_000);
        let mut sibling = f.composer.compose(&[], &f.context).unwrap().block;
        sibling.nonce = 1;
        sibling.prev_hash = genesis.hash().unwrap();
        let sibling = f.composer.sign(sibling, &f.key).unwrap();

        let outcome = f.validator.process(&sibling, &mut f.context).unwrap();
        assert_eq!(outcome.report.messages(), ["previous block is not the chain head"]);
        assert_eq!(f.context.chain.head(), Some(first.hash().unwrap()));
        assert_eq!(
            f.context.chain.get_block_by_nonce(1).unwrap(),
            Some(first)
        );
    }

    #[test]
    fn test_timestamp_outside_round() {
        let mut f = fixture();
        let genesis = f.next_signed();
        f.validator.process(&genesis, &mut f.context).unwrap();

        f.clock.advance(5_000);
        let mut block = f.composer.compose(&[], &f.context).unwrap().block;
        block.round_index += 1;
        let block = f.composer.sign(block, &f.key).unwrap();

        let outcome = f.validator.process(&block, &mut f.context).unwrap();
        assert_eq!(outcome.reached, BlockState::StructuralOk);
        assert!(outcome.report.messages()[0].starts_with("timestamp/round mismatch"));
    }

    #[test]
    fn test_round_index_overflow_rejected() {
        let mut f = fixture();
        let genesis = f.next_signed();
        f.validator.process(&genesis, &mut f.context).unwrap();

        let mut block = f.composer.compose(&[], &f.context).unwrap().block;
        block.round_index = u64::MAX;
        let block = f.composer.sign(block, &f.key).unwrap();

        let outcome = f.validator.process(&block, &mut f.context).unwrap();
        assert_eq!(outcome.state, BlockState::Rejected);
        assert_eq!(outcome.reached, BlockState::StructuralOk);
    }

    #[test]
    fn test_unsigned_block_rejected() {
        let mut f = fixture();
        let block = f.composer.compose(&[], &f.context).unwrap().block;

        let outcome = f.validator.process(&block, &mut f.context).unwrap();
        assert_eq!(outcome.reached, BlockState::TemporalOk);
        assert_eq!(outcome.report.messages(), ["signature not valid"]);
        assert!(f.context.chain.is_empty());
    }

    #[test]
    fn test_ineligible_signer_rejected() {
        let mut f = fixture();
        let outsider = MultiSigKeyPair::from_keypair(&KeyPair::generate());
        let validator = BlockValidator::new(
            Arc::new(RoundScheduler::new(&ChronologyConfig::default()).unwrap()),
            Arc::new(SchnorrMultiSig::new()),
        )
        .with_eligibility(Arc::new(ConsensusGroupEligibility::new([outsider.public])));

        let genesis = f.next_signed();
        let outcome = validator.process(&genesis, &mut f.context).unwrap();
        assert_eq!(outcome.reached, BlockState::TemporalOk);
        assert_eq!(outcome.report.messages(), ["signers not eligible for round"]);
    }
}
