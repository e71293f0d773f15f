use tessera_core::{serialize, Block, Hash, Transaction};
use tracing::{debug, info, warn};

use crate::error::StateError;
use crate::storage::Storage;

mod keys {
    pub const BLOCK: &[u8] = b"blk:";
    pub const NONCE_INDEX: &[u8] = b"idx:";
    pub const TX: &[u8] = b"tx:";
    pub const HEAD: &[u8] = b"head";
    pub const GENESIS: &[u8] = b"genesis";
}

fn block_key(hash: &Hash) -> Vec<u8> {
    [keys::BLOCK, hash.as_bytes()].concat()
}

fn nonce_key(nonce: u64) -> Vec<u8> {
    [keys::NONCE_INDEX, &nonce.to_be_bytes()[..]].concat()
}

fn tx_key(hash: &Hash) -> Vec<u8> {
    [keys::TX, hash.as_bytes()].concat()
}

/// Append-only history of committed blocks plus the transaction index
pub struct ChainStore<S: Storage> {
    storage: S,
    head: Option<(Hash, u64)>,
    genesis: Option<Block>,
}

impl<S: Storage> ChainStore<S> {
    /// Reload head and genesis from `storage`
    pub fn open(storage: S) -> Result<Self, StateError> {
        let mut chain = ChainStore {
            storage,
            head: None,
            genesis: None,
        };

        if let Some(bytes) = chain.storage.get(keys::GENESIS) {
            let hash = Hash::from_slice(&bytes).ok_or(tessera_core::CoreError::InvalidHashLength)?;
            chain.genesis = chain.get_block(&hash)?;
        }
        if let Some(bytes) = chain.storage.get(keys::HEAD) {
            let hash = Hash::from_slice(&bytes).ok_or(tessera_core::CoreError::InvalidHashLength)?;
            let block = chain
                .get_block(&hash)?
                .ok_or_else(|| StateError::BlockNotFound(hash.to_hex()))?;
            chain.head = Some((hash, block.nonce));
            debug!("Chain head at nonce {} ({})", block.nonce, hash);
        }

        Ok(chain)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.storage.exists(&block_key(hash))
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>, StateError> {
        match self.storage.get(&block_key(hash)) {
            Some(bytes) => Ok(Some(serialize::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_nonce(&self, nonce: u64) -> Result<Option<Block>, StateError> {
        match self.storage.get(&nonce_key(nonce)) {
            Some(bytes) => {
                let hash =
                    Hash::from_slice(&bytes).ok_or(tessera_core::CoreError::InvalidHashLength)?;
                self.get_block(&hash)
            }
            None => Ok(None),
        }
    }

    /// Digest of the most recently appended block
    pub fn head(&self) -> Option<Hash> {
        self.head.map(|(hash, _)| hash)
    }

    pub fn head_nonce(&self) -> Option<u64> {
        self.head.map(|(_, nonce)| nonce)
    }

    pub fn head_block(&self) -> Result<Option<Block>, StateError> {
        match self.head {
            Some((hash, _)) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    pub fn genesis(&self) -> Option<&Block> {
        self.genesis.as_ref()
    }

    /// Index a transaction by digest so blocks can refer to it
    pub fn store_transaction(&mut self, tx: &Transaction) -> Result<Hash, StateError> {
        let hash = tx.hash()?;
        self.storage.put(&tx_key(&hash), &serialize::to_bytes(tx)?);
        self.storage.commit()?;
        Ok(hash)
    }

    pub fn get_transaction(&self, hash: &Hash) -> Result<Option<Transaction>, StateError> {
        match self.storage.get(&tx_key(hash)) {
            Some(bytes) => Ok(Some(serialize::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Nonce the next appended block must carry
    pub fn next_nonce(&self) -> Result<u64, StateError> {
        match self.head {
            Some((_, nonce)) => nonce.checked_add(1).ok_or(StateError::HeadOverflow(nonce)),
            None => Ok(0),
        }
    }

    /// Append a committed block and make it the head
    ///
    /// The block must extend the head: its parent is stored and its nonce is
    /// the head nonce plus one. A genesis block is only accepted while the
    /// chain is empty.
    pub fn append_block(&mut self, block: &Block) -> Result<Hash, StateError> {
        let hash = self.stage_block(block)?;
        if let Err(e) = self.commit_staged() {
            self.discard_staged();
            return Err(e);
        }
        self.finish_append(block, hash);
        Ok(hash)
    }

    /// Check `block` against the head and stage its writes
    pub(crate) fn stage_block(&mut self, block: &Block) -> Result<Hash, StateError> {
        let hash = block.hash()?;
        if self.contains_block(&hash) {
            return Err(StateError::BlockExists(hash.to_hex()));
        }
        if block.is_genesis() {
            if self.genesis.is_some() {
                return Err(StateError::GenesisExists);
            }
        } else if !self.contains_block(&block.prev_hash) {
            return Err(StateError::BlockNotFound(block.prev_hash.to_hex()));
        }
        let expected = self.next_nonce()?;
        if block.nonce != expected {
            return Err(StateError::OutOfSequence {
                expected,
                got: block.nonce,
            });
        }

        self.storage.put(&block_key(&hash), &serialize::to_bytes(block)?);
        self.storage.put(&nonce_key(block.nonce), hash.as_bytes());
        self.storage.put(keys::HEAD, hash.as_bytes());
        if block.is_genesis() {
            self.storage.put(keys::GENESIS, hash.as_bytes());
        }
        Ok(hash)
    }

    pub(crate) fn commit_staged(&mut self) -> Result<(), StateError> {
        self.storage.commit()
    }

    pub(crate) fn discard_staged(&mut self) {
        self.storage.rollback();
    }

    /// Publish a durably stored block as the new head
    pub(crate) fn finish_append(&mut self, block: &Block, hash: Hash) {
        if block.is_genesis() {
            self.genesis = Some(block.clone());
        }
        self.head = Some((hash, block.nonce));
        info!(
            "Appended block {} at nonce {} with {} transactions",
            hash,
            block.nonce,
            block.tx_hashes.len()
        );
    }

    /// Remove a block committed by [`ChainStore::stage_block`] but never
    /// published, restoring the previous head
    pub(crate) fn unwind(&mut self, block: &Block, hash: &Hash) -> Result<(), StateError> {
        self.storage.rollback();
        self.storage.delete(&block_key(hash));
        self.storage.delete(&nonce_key(block.nonce));
        match self.head {
            Some((head, _)) => self.storage.put(keys::HEAD, head.as_bytes()),
            None => self.storage.delete(keys::HEAD),
        }
        if block.is_genesis() {
            self.storage.delete(keys::GENESIS);
        }
        if let Err(e) = self.storage.commit() {
            self.storage.rollback();
            return Err(e);
        }
        warn!("Unwound block {} at nonce {}", hash, block.nonce);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use num_bigint::BigUint;
    use tessera_core::{Address, KeyPair};

    fn child_of(parent: &Block) -> Block {
        Block::new(
            parent.nonce + 1,
            parent.round_index + 1,
            parent.timestamp + 10,
            parent.hash().unwrap(),
        )
    }

    #[test]
    fn test_append_and_lookup() {
        let mut chain = ChainStore::open(MemoryStorage::new()).unwrap();
        assert!(chain.is_empty());
        assert!(chain.genesis().is_none());

        let genesis = Block::new(0, 0, 0, Hash::ZERO);
        let genesis_hash = chain.append_block(&genesis).unwrap();
        let next = child_of(&genesis);
        let next_hash = chain.append_block(&next).unwrap();

        assert_eq!(chain.genesis(), Some(&genesis));
        assert_eq!(chain.head(), Some(next_hash));
        assert_eq!(chain.head_nonce(), Some(1));
        assert!(chain.contains_block(&genesis_hash));
        assert_eq!(chain.get_block_by_nonce(1).unwrap(), Some(next.clone()));
        assert_eq!(chain.head_block().unwrap(), Some(next));
    }

    #[test]
    fn test_rejects_orphans_and_duplicates() {
        let mut chain = ChainStore::open(MemoryStorage::new()).unwrap();
        let genesis = Block::new(0, 0, 0, Hash::ZERO);

        let orphan = Block::new(1, 1, 10, tessera_core::hash_blake3(b"unknown"));
        assert!(matches!(
            chain.append_block(&orphan),
            Err(StateError::BlockNotFound(_))
        ));

        chain.append_block(&genesis).unwrap();
        assert!(matches!(
            chain.append_block(&genesis),
            Err(StateError::BlockExists(_))
        ));
        assert!(matches!(
            chain.append_block(&Block::new(0, 0, 5, Hash::ZERO)),
            Err(StateError::GenesisExists)
        ));
    }

    #[test]
    fn test_rejects_out_of_sequence_nonce() {
        let mut chain = ChainStore::open(MemoryStorage::new()).unwrap();
        let genesis = Block::new(0, 0, 0, Hash::ZERO);
        chain.append_block(&genesis).unwrap();

        let mut skipped = child_of(&genesis);
        skipped.nonce = u64::MAX;
        assert!(matches!(
            chain.append_block(&skipped),
            Err(StateError::OutOfSequence {
                expected: 1,
                got: u64::MAX
            })
        ));
        assert_eq!(chain.head(), Some(genesis.hash().unwrap()));
        assert!(chain.get_block_by_nonce(u64::MAX).unwrap().is_none());
        assert_eq!(chain.next_nonce().unwrap(), 1);
    }

    #[test]
    fn test_unwind_restores_head() {
        let mut chain = ChainStore::open(MemoryStorage::new()).unwrap();
        let genesis = Block::new(0, 0, 0, Hash::ZERO);
        chain.append_block(&genesis).unwrap();

        let next = child_of(&genesis);
        let hash = chain.stage_block(&next).unwrap();
        chain.commit_staged().unwrap();
        chain.unwind(&next, &hash).unwrap();

        assert!(!chain.contains_block(&hash));
        assert!(chain.get_block_by_nonce(1).unwrap().is_none());
        assert_eq!(chain.head(), Some(genesis.hash().unwrap()));
        assert_eq!(chain.storage.get(keys::HEAD), Some(genesis.hash().unwrap().as_bytes().to_vec()));
    }

    #[test]
    fn test_transaction_index() {
        let mut chain = ChainStore::open(MemoryStorage::new()).unwrap();
        let sender = KeyPair::generate();
        let tx = Transaction::new_signed(
            &sender,
            Address::default(),
            BigUint::from(5u32),
            0,
            Vec::new(),
        )
        .unwrap();

        let hash = chain.store_transaction(&tx).unwrap();
        assert_eq!(chain.get_transaction(&hash).unwrap(), Some(tx));
        assert_eq!(
            chain
                .get_transaction(&tessera_core::hash_blake3(b"missing"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_reopen_restores_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.db");

        let genesis = Block::new(0, 0, 0, Hash::ZERO);
        let next = child_of(&genesis);
        {
            let mut chain = ChainStore::open(FileStorage::open(&path).unwrap()).unwrap();
            chain.append_block(&genesis).unwrap();
            chain.append_block(&next).unwrap();
        }

        let chain = ChainStore::open(FileStorage::open(&path).unwrap()).unwrap();
        assert_eq!(chain.head(), Some(next.hash().unwrap()));
        assert_eq!(chain.genesis(), Some(&genesis));
    }
}
