use tessera_core::{Block, GenesisConfig, Hash};
use tracing::error;

use crate::chain::ChainStore;
use crate::error::StateError;
use crate::ledger::Ledger;
use crate::storage::Storage;

/// Authoritative ledger and chain history of one shard
///
/// Block processing mutates both, so callers share the context behind a
/// single write lock to keep a ledger commit and its block append together.
pub struct ChainContext<S: Storage> {
    pub ledger: Ledger<S>,
    pub chain: ChainStore<S>,
    pub genesis: GenesisConfig,
}

impl<S: Storage> ChainContext<S> {
    pub fn open(
        ledger_storage: S,
        chain_storage: S,
        genesis: GenesisConfig,
    ) -> Result<Self, StateError> {
        Ok(ChainContext {
            ledger: Ledger::open(ledger_storage, &genesis)?,
            chain: ChainStore::open(chain_storage)?,
            genesis,
        })
    }

    /// Head digest, or [`Hash::ZERO`] on an empty chain
    pub fn head_hash(&self) -> Hash {
        self.chain.head().unwrap_or(Hash::ZERO)
    }

    /// Sequence number the next block must carry
    pub fn next_nonce(&self) -> Result<u64, StateError> {
        self.chain.next_nonce()
    }

    /// Persist the ledger's pending changes together with `block`
    ///
    /// The chain is made durable first and the ledger second. If the ledger
    /// fails to persist, the block is unwound again, so a committed ledger
    /// state always has its block recorded. On any error the pending ledger
    /// changes are rolled back.
    pub fn commit_block(&mut self, block: &Block) -> Result<Hash, StateError> {
        let staged = self
            .chain
            .stage_block(block)
            .and_then(|hash| self.ledger.stage_changes().map(|_| hash));
        let hash = match staged {
            Ok(hash) => hash,
            Err(e) => {
                self.chain.discard_staged();
                self.ledger.rollback();
                return Err(e);
            }
        };

        if let Err(e) = self.chain.commit_staged() {
            self.chain.discard_staged();
            self.ledger.rollback();
            return Err(e);
        }
        if let Err(e) = self.ledger.commit_staged() {
            self.ledger.rollback();
            if let Err(unwind) = self.chain.unwind(block, &hash) {
                error!(
                    "Block {} stored without its ledger state; unwind failed: {}",
                    hash, unwind
                );
            }
            return Err(e);
        }

        self.chain.finish_append(block, hash);
        Ok(hash)
    }

    pub fn head_block(&self) -> Result<Option<Block>, StateError> {
        self.chain.head_block()
    }

    /// Round 0 start: the installed genesis block's timestamp, falling back
    /// to the configured one before genesis is committed
    pub fn genesis_timestamp(&self) -> u64 {
        self.chain
            .genesis()
            .map_or(self.genesis.timestamp, |block| block.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AccountLedger;
    use crate::storage::MemoryStorage;
    use num_bigint::BigUint;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tessera_core::{Address, KeyPair};

    /// Memory storage whose commits fail while `fail` is set
    #[derive(Clone, Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail: Arc<AtomicBool>,
    }

    impl Storage for FlakyStorage {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.inner.get(key)
        }

        fn put(&mut self, key: &[u8], value: &[u8]) {
            self.inner.put(key, value)
        }

        fn delete(&mut self, key: &[u8]) {
            self.inner.delete(key)
        }

        fn commit(&mut self) -> Result<(), StateError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StateError::Storage("disk full".into()));
            }
            self.inner.commit()
        }

        fn rollback(&mut self) {
            self.inner.rollback()
        }

        fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
            self.inner.keys_with_prefix(prefix)
        }
    }

    struct Flaky {
        context: ChainContext<FlakyStorage>,
        ledger_fails: Arc<AtomicBool>,
        chain_fails: Arc<AtomicBool>,
        mint: Address,
        genesis: Block,
    }

    fn flaky() -> Flaky {
        let (ledger, chain) = (FlakyStorage::default(), FlakyStorage::default());
        let (ledger_fails, chain_fails) = (ledger.fail.clone(), chain.fail.clone());
        let mint = Address::from_public_key(&KeyPair::from_seed_phrase("mint").public);
        let mut context =
            ChainContext::open(ledger, chain, GenesisConfig::new(0, mint, BigUint::from(100u32)))
                .unwrap();

        let genesis = Block::new(0, 0, 0, Hash::ZERO);
        context.commit_block(&genesis).unwrap();
        Flaky {
            context,
            ledger_fails,
            chain_fails,
            mint,
            genesis,
        }
    }

    impl Flaky {
        fn transfer_block(&mut self) -> Block {
            self.context
                .ledger
                .transfer(&self.mint, &Address([9u8; 32]), &BigUint::from(10u32), 0)
                .unwrap();
            Block::new(1, 1, 10, self.genesis.hash().unwrap())
        }

        fn assert_unchanged(&self, digest: Hash) {
            assert_eq!(self.context.ledger.digest().unwrap(), digest);
            assert!(!self.context.ledger.has_pending_changes());
            assert!(self.context.ledger.account_state(&Address([9u8; 32])).is_none());
            assert_eq!(self.context.head_hash(), self.genesis.hash().unwrap());
            assert!(self.context.chain.get_block_by_nonce(1).unwrap().is_none());
        }
    }

    #[test]
    fn test_empty_context() {
        let genesis = GenesisConfig::new(1_000, Address([7u8; 32]), BigUint::from(50u32));
        let context =
            ChainContext::open(MemoryStorage::new(), MemoryStorage::new(), genesis).unwrap();

        assert_eq!(context.head_hash(), Hash::ZERO);
        assert_eq!(context.next_nonce().unwrap(), 0);
        assert_eq!(context.genesis_timestamp(), 1_000);
        assert!(context.head_block().unwrap().is_none());
        assert!(context.ledger.has_funds(&Address([7u8; 32]), &BigUint::from(50u32)));
    }

    #[test]
    fn test_commit_block_persists_both() {
        let mut f = flaky();
        let block = f.transfer_block();

        let hash = f.context.commit_block(&block).unwrap();
        assert_eq!(f.context.head_hash(), hash);
        assert_eq!(f.context.next_nonce().unwrap(), 2);
        assert!(!f.context.ledger.has_pending_changes());
        assert_eq!(
            f.context.ledger.account_state(&Address([9u8; 32])).unwrap().balance,
            BigUint::from(10u32)
        );
    }

    #[test]
    fn test_chain_failure_leaves_ledger_uncommitted() {
        let mut f = flaky();
        let before = f.context.ledger.digest().unwrap();
        let block = f.transfer_block();

        f.chain_fails.store(true, Ordering::SeqCst);
        assert!(f.context.commit_block(&block).is_err());
        f.assert_unchanged(before);

        f.chain_fails.store(false, Ordering::SeqCst);
        assert!(!f.context.chain.contains_block(&block.hash().unwrap()));
    }

    #[test]
    fn test_ledger_failure_unwinds_block() {
        let mut f = flaky();
        let before = f.context.ledger.digest().unwrap();
        let block = f.transfer_block();

        f.ledger_fails.store(true, Ordering::SeqCst);
        assert!(f.context.commit_block(&block).is_err());
        f.assert_unchanged(before);
        assert!(!f.context.chain.contains_block(&block.hash().unwrap()));

        // Once storage recovers the same block commits cleanly
        f.ledger_fails.store(false, Ordering::SeqCst);
        let block = f.transfer_block();
        f.context.commit_block(&block).unwrap();
        assert_eq!(f.context.next_nonce().unwrap(), 2);
    }

    #[test]
    fn test_out_of_sequence_block_rolls_back() {
        let mut f = flaky();
        let before = f.context.ledger.digest().unwrap();
        let mut block = f.transfer_block();
        block.nonce = u64::MAX;

        assert!(matches!(
            f.context.commit_block(&block),
            Err(StateError::OutOfSequence { expected: 1, .. })
        ));
        f.assert_unchanged(before);
    }
}
