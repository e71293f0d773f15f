use std::collections::HashSet;
use std::sync::Arc;

use tessera_core::{Block, Hash, MultiSigKeyPair, Transaction};
use tessera_state::{ChainContext, Storage};
use tessera_vm::{validate_transaction, VmError};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::chronology::{Clock, Phase, Round, RoundScheduler};
use crate::composer::BlockComposer;
use crate::error::ConsensusError;
use crate::validator::{BlockOutcome, BlockValidator};

/// Default bound on queued transactions
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Drives block production for a node that is the whole consensus group
///
/// Each round it composes and signs a block from the pending queue during
/// the propose phase, then feeds it through the validator during the verify
/// phase.
pub struct Proposer<S: Storage> {
    context: Arc<RwLock<ChainContext<S>>>,
    composer: BlockComposer,
    validator: BlockValidator,
    key: MultiSigKeyPair,
    max_pending: usize,
    pending: Mutex<Vec<Transaction>>,
    proposed: Mutex<Option<Block>>,
}

impl<S: Storage + 'static> Proposer<S> {
    pub fn new(
        context: Arc<RwLock<ChainContext<S>>>,
        composer: BlockComposer,
        validator: BlockValidator,
        key: MultiSigKeyPair,
    ) -> Self {
        Proposer {
            context,
            composer,
            validator,
            key,
            max_pending: DEFAULT_MAX_PENDING,
            pending: Mutex::new(Vec::new()),
            proposed: Mutex::new(None),
        }
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn context(&self) -> Arc<RwLock<ChainContext<S>>> {
        Arc::clone(&self.context)
    }

    /// Persist a transaction and queue it for the next proposal
    ///
    /// Refused once `max_pending` transactions are queued.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash, ConsensusError> {
        tx.verify_signature()?;
        let hash = tx.hash()?;

        {
            let pending = self.pending.lock().await;
            if pending.len() >= self.max_pending {
                return Err(ConsensusError::PendingQueueFull(pending.len()));
            }
        }

        // Never hold the queue while waiting on the context; commits lock
        // them the other way round
        self.context.write().await.chain.store_transaction(&tx)?;

        let mut pending = self.pending.lock().await;
        if pending.iter().any(|queued| queued.hash().ok() == Some(hash)) {
            debug!("Transaction {} already pending", hash);
        } else {
            pending.push(tx);
            debug!("Queued transaction {} ({} pending)", hash, pending.len());
        }
        Ok(hash)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Install the genesis block if the chain is still empty
    pub async fn bootstrap_genesis(&self) -> Result<Option<BlockOutcome>, ConsensusError> {
        let mut context = self.context.write().await;
        if !context.chain.is_empty() {
            return Ok(None);
        }

        let receipts = self.composer.compose(&[], &*context)?;
        let genesis = self.composer.sign(receipts.block, &self.key)?;
        let outcome = self.validator.process(&genesis, &mut *context)?;
        if outcome.is_committed() {
            info!("Installed genesis block {}", genesis.hash()?);
        } else {
            error!("Genesis block rejected: {}", outcome.report);
        }
        Ok(Some(outcome))
    }

    /// Compose and sign a block from the pending queue
    ///
    /// The block is held until [`Proposer::commit_proposed`]; a newer
    /// proposal replaces it.
    pub async fn propose_block(&self) -> Result<Block, ConsensusError> {
        let transactions = self.pending.lock().await.clone();
        let receipts = {
            let context = self.context.read().await;
            self.composer.compose(&transactions, &*context)?
        };
        for report in receipts.reports.iter().filter(|r| !r.is_ok()) {
            debug!("Left out of proposal: {}", report);
        }

        let block = self.composer.sign(receipts.block, &self.key)?;
        info!(
            "Proposed block {} at nonce {} round {}",
            block.hash()?,
            block.nonce,
            block.round_index
        );
        *self.proposed.lock().await = Some(block.clone());
        Ok(block)
    }

    /// Validate and commit the held proposal, if any
    pub async fn commit_proposed(&self) -> Result<Option<BlockOutcome>, ConsensusError> {
        let Some(block) = self.proposed.lock().await.take() else {
            return Ok(None);
        };

        let mut context = self.context.write().await;
        let outcome = self.validator.process(&block, &mut *context)?;
        if outcome.is_committed() {
            self.prune_pending(&block, &*context).await;
        }
        Ok(Some(outcome))
    }

    /// Drop transactions that were included or can no longer apply
    ///
    /// Only a nonce ahead of the sender's account keeps a failing
    /// transaction queued, since earlier transfers may still fill the gap.
    async fn prune_pending(&self, block: &Block, context: &ChainContext<S>) {
        let included: HashSet<Hash> = block.tx_hashes.iter().copied().collect();
        let policy = self.composer.policy();

        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|tx| {
            if tx.hash().map_or(true, |hash| included.contains(&hash)) {
                return false;
            }
            match validate_transaction(tx, &context.ledger, policy) {
                Ok(()) => true,
                Err(VmError::InvalidNonce { expected, got }) => got > expected,
                Err(e) => {
                    debug!("Dropping pending transaction: {}", e);
                    false
                }
            }
        });
        debug!("Pruned {} pending transactions", before - pending.len());
    }

    pub async fn handle_phase(&self, phase: Phase, round: &Round) {
        match phase {
            Phase::ProposeBlock => {
                if let Err(e) = self.propose_block().await {
                    warn!("Round {}: failed to propose block: {}", round.index, e);
                }
            }
            Phase::VerifyBlock => match self.commit_proposed().await {
                Ok(Some(outcome)) if !outcome.is_committed() => {
                    warn!("Round {}: proposal rejected: {}", round.index, outcome.report);
                }
                Ok(_) => {}
                Err(e) => error!("Round {}: failed to commit block: {}", round.index, e),
            },
            _ => {}
        }
    }

    /// Run the round loop until the scheduler stops
    pub async fn run(
        self: Arc<Self>,
        mut scheduler: RoundScheduler,
        clock: Arc<dyn Clock>,
    ) -> Result<(), ConsensusError> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<(Phase, Round)>();
        for phase in [Phase::ProposeBlock, Phase::VerifyBlock] {
            let sender = sender.clone();
            scheduler.set_handler(phase, move |phase, round| {
                let _ = sender.send((phase, *round));
            });
        }
        drop(sender);

        let genesis = self.context.read().await.genesis_timestamp();
        info!(
            "Starting round loop: genesis {} round {}ms",
            genesis,
            scheduler.round_duration()
        );

        let mut driver =
            tokio::spawn(async move { scheduler.run(genesis, clock.as_ref()).await });

        loop {
            tokio::select! {
                Some((phase, round)) = receiver.recv() => {
                    self.handle_phase(phase, &round).await;
                }
                result = &mut driver => {
                    return match result {
                        Ok(result) => result,
                        Err(e) => Err(ConsensusError::SchedulerStopped(e.to_string())),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chronology::{ChronologyConfig, ManualClock, SystemClock};
    use num_bigint::BigUint;
    use std::time::Duration;
    use tessera_core::{Address, GenesisConfig, KeyPair, MultiSignatureScheme, SchnorrMultiSig};
    use tessera_state::{AccountLedger, MemoryStorage};

    fn fast_config() -> ChronologyConfig {
        ChronologyConfig {
            start_round_ms: 0,
            propose_block_ms: 20,
            verify_block_ms: 10,
            multi_sign_round_1_ms: 5,
            multi_sign_round_2_ms: 5,
            multi_sign_round_3_ms: 5,
            end_round_ms: 0,
        }
    }

    fn build(
        mint: &KeyPair,
        genesis_ts: u64,
        clock: Arc<dyn Clock>,
        config: &ChronologyConfig,
    ) -> Proposer<MemoryStorage> {
        let genesis = GenesisConfig::new(
            genesis_ts,
            Address::from_public_key(&mint.public),
            BigUint::from(1_000u32),
        );
        let context =
            ChainContext::open(MemoryStorage::new(), MemoryStorage::new(), genesis).unwrap();
        let scheduler = Arc::new(RoundScheduler::new(config).unwrap());
        let scheme: Arc<dyn MultiSignatureScheme> = Arc::new(SchnorrMultiSig::new());

        Proposer::new(
            Arc::new(RwLock::new(context)),
            BlockComposer::new(scheduler.clone(), scheme.clone(), clock),
            BlockValidator::new(scheduler, scheme),
            MultiSigKeyPair::from_keypair(mint),
        )
    }

    #[tokio::test]
    async fn test_propose_and_commit() {
        let mint = KeyPair::from_seed_phrase("mint");
        let clock = Arc::new(ManualClock::new(10_000));
        let proposer = build(&mint, 10_000, clock.clone(), &ChronologyConfig::default());

        assert!(proposer.bootstrap_genesis().await.unwrap().unwrap().is_committed());
        assert!(proposer.bootstrap_genesis().await.unwrap().is_none());

        let receiver = Address([9u8; 32]);
        let good = Transaction::new_signed(&mint, receiver, BigUint::from(40u32), 0, vec![]).unwrap();
        let gap = Transaction::new_signed(&mint, receiver, BigUint::from(1u32), 5, vec![]).unwrap();
        proposer.submit_transaction(good.clone()).await.unwrap();
        proposer.submit_transaction(good.clone()).await.unwrap();
        proposer.submit_transaction(gap.clone()).await.unwrap();
        assert_eq!(proposer.pending_count().await, 2);

        clock.advance(4_000);
        let block = proposer.propose_block().await.unwrap();
        assert_eq!(block.nonce, 1);
        assert_eq!(block.tx_hashes, vec![good.hash().unwrap()]);

        let outcome = proposer.commit_proposed().await.unwrap().unwrap();
        assert!(outcome.is_committed(), "{}", outcome.report);
        assert!(proposer.commit_proposed().await.unwrap().is_none());

        // The nonce gap stays queued
        assert_eq!(proposer.pending_count().await, 1);

        let context = proposer.context();
        let context = context.read().await;
        assert_eq!(context.chain.head(), Some(block.hash().unwrap()));
        assert_eq!(
            context.ledger.account_state(&receiver).unwrap().balance,
            BigUint::from(40u32)
        );
    }

    #[tokio::test]
    async fn test_dead_transactions_pruned() {
        let mint = KeyPair::from_seed_phrase("mint");
        let clock = Arc::new(ManualClock::new(10_000));
        let proposer = build(&mint, 10_000, clock.clone(), &ChronologyConfig::default());
        proposer.bootstrap_genesis().await.unwrap();

        let receiver = Address([9u8; 32]);
        let broke = KeyPair::from_seed_phrase("broke");
        let transfer = |from: &KeyPair, value: u32, nonce: u64| {
            Transaction::new_signed(from, receiver, BigUint::from(value), nonce, vec![]).unwrap()
        };
        let good = transfer(&mint, 10, 0);
        let unfunded = transfer(&broke, 10, 0);
        let oversized = transfer(&mint, 5_000, 1);
        let ahead = transfer(&mint, 1, 3);
        for tx in [&good, &unfunded, &oversized, &ahead] {
            proposer.submit_transaction(tx.clone()).await.unwrap();
        }

        clock.advance(4_000);
        proposer.propose_block().await.unwrap();
        assert!(proposer.commit_proposed().await.unwrap().unwrap().is_committed());

        // Only the transfer waiting on earlier nonces survives
        assert_eq!(proposer.pending_count().await, 1);
        assert_eq!(
            proposer.pending.lock().await[0].hash().unwrap(),
            ahead.hash().unwrap()
        );
    }

    #[tokio::test]
    async fn test_pending_queue_bounded() {
        let mint = KeyPair::from_seed_phrase("mint");
        let proposer = build(
            &mint,
            0,
            Arc::new(ManualClock::new(0)),
            &ChronologyConfig::default(),
        )
        .with_max_pending(2);

        let transfer = |nonce: u64| {
            Transaction::new_signed(&mint, Address([1u8; 32]), BigUint::from(1u32), nonce, vec![])
                .unwrap()
        };
        proposer.submit_transaction(transfer(0)).await.unwrap();
        proposer.submit_transaction(transfer(1)).await.unwrap();
        assert!(matches!(
            proposer.submit_transaction(transfer(2)).await,
            Err(ConsensusError::PendingQueueFull(2))
        ));
        assert_eq!(proposer.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_forged_transaction_refused() {
        let mint = KeyPair::from_seed_phrase("mint");
        let proposer = build(
            &mint,
            0,
            Arc::new(ManualClock::new(0)),
            &ChronologyConfig::default(),
        );

        let mut tx =
            Transaction::new_signed(&mint, Address([1u8; 32]), BigUint::from(1u32), 0, vec![])
                .unwrap();
        tx.value = BigUint::from(999u32);
        assert!(proposer.submit_transaction(tx).await.is_err());
        assert_eq!(proposer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_round_loop_grows_chain() {
        let mint = KeyPair::from_seed_phrase("mint");
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = fast_config();
        let proposer = Arc::new(build(&mint, clock.now_ms(), clock.clone(), &config));
        let context = proposer.context();

        let scheduler = RoundScheduler::new(&config).unwrap();
        let handle = tokio::spawn(proposer.run(scheduler, clock));
        tokio::time::sleep(Duration::from_millis(600)).await;
        handle.abort();

        let context = context.read().await;
        assert!(context.chain.genesis().is_some());
        assert!(context.next_nonce().unwrap() >= 2);
    }
}
