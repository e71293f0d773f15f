use std::sync::Arc;

use tessera_core::{Block, BlockReceipts, MultiSigKeyPair, MultiSignatureScheme, Transaction};
use tessera_state::{AccountLedger, ChainContext, Storage};
use tessera_vm::{ExecutionPolicy, Executor};
use tracing::{debug, info};

use crate::chronology::{Clock, RoundScheduler};
use crate::error::ConsensusError;
use crate::signing::SigningSession;

/// Builds candidate blocks by trial-executing transactions in a sandbox
pub struct BlockComposer {
    scheduler: Arc<RoundScheduler>,
    scheme: Arc<dyn MultiSignatureScheme>,
    clock: Arc<dyn Clock>,
    executor: Executor,
}

impl BlockComposer {
    pub fn new(
        scheduler: Arc<RoundScheduler>,
        scheme: Arc<dyn MultiSignatureScheme>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        BlockComposer {
            scheduler,
            scheme,
            clock,
            executor: Executor::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.executor = Executor::new(policy);
        self
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        self.executor.policy()
    }

    /// Compose the next block from `transactions`, in order
    ///
    /// Transactions failing signature, funds or nonce checks against the
    /// sandbox are left out. The returned reports line up with the input.
    /// The authoritative ledger is never touched.
    pub fn compose<S: Storage>(
        &self,
        transactions: &[Transaction],
        context: &ChainContext<S>,
    ) -> Result<BlockReceipts, ConsensusError> {
        let now = self.clock.now_ms();
        let genesis = context.genesis_timestamp();
        if now < genesis {
            return Err(ConsensusError::InvalidArgument(format!(
                "clock reads {} before genesis {}",
                now, genesis
            )));
        }

        let nonce = context.next_nonce()?;
        let mut block = if nonce == 0 {
            Block::new(0, 0, genesis, context.head_hash())
        } else {
            let round = self.scheduler.round_for(genesis, now)?;
            Block::new(nonce, round.index, now, context.head_hash())
        };

        let mut sandbox = context.ledger.begin_sandbox();
        let mut reports = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let report = self.executor.execute_transaction(tx, &mut sandbox);
            if report.is_ok() {
                block.tx_hashes.push(tx.hash()?);
            }
            reports.push(report);
        }
        block.state_root = sandbox.digest()?;

        info!(
            "Composed block at nonce {} round {}: {}/{} transactions included",
            block.nonce,
            block.round_index,
            block.tx_hashes.len(),
            transactions.len()
        );
        debug!("Sandbox touched {} accounts", sandbox.touched());

        Ok(BlockReceipts { block, reports })
    }

    /// Sign `block` alone, as a consensus group of one
    pub fn sign(&self, block: Block, key: &MultiSigKeyPair) -> Result<Block, ConsensusError> {
        let mut session = SigningSession::new(Arc::clone(&self.scheme), block, vec![key.public])?;

        let secret = self.scheme.commitment_secret();
        session.add_commitment(&key.public, self.scheme.commitment(&secret))?;
        session.aggregate_commitments()?;
        let share = session.sign_share(key, &secret)?;
        session.add_share(&key.public, share)?;

        session.finalize()
    }
}
