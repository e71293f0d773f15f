use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tessera_consensus::{
    AcceptAllSigners, BlockComposer, BlockValidator, Clock, ConsensusGroupEligibility, Proposer,
    RoundScheduler, SignerEligibility, SystemClock,
};
use tessera_core::{KeyPair, MultiSigKeyPair, MultiSignatureScheme, SchnorrMultiSig, Transaction};
use tessera_state::{AccountLedger, ChainContext, FileStorage};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::NodeConfig;

/// Open the ledger and chain stores under `data_dir`
pub fn open_context(config: &NodeConfig) -> Result<ChainContext<FileStorage>> {
    let data_dir: &Path = &config.data_dir;
    let ledger = FileStorage::open(data_dir.join("ledger.db"))?;
    let chain = FileStorage::open(data_dir.join("chain.db"))?;
    Ok(ChainContext::open(ledger, chain, config.to_genesis_config()?)?)
}

/// The Tessera node
pub struct Node {
    config: NodeConfig,
    keypair: KeyPair,
    context: Arc<RwLock<ChainContext<FileStorage>>>,
    clock: Arc<dyn Clock>,
}

impl Node {
    /// Create a new node from configuration
    pub fn new(config: NodeConfig) -> Result<Self> {
        let keypair = config.signer_keypair()?;
        let context = open_context(&config)?;

        Ok(Node {
            config,
            keypair,
            context: Arc::new(RwLock::new(context)),
            clock: Arc::new(SystemClock),
        })
    }

    fn eligibility(&self, key: &MultiSigKeyPair) -> Result<Arc<dyn SignerEligibility>> {
        let group = self.config.consensus_group()?;
        if group.is_empty() {
            warn!("No consensus group configured; accepting any signer");
            return Ok(Arc::new(AcceptAllSigners));
        }
        if !group.contains(&key.public) {
            return Err(anyhow!(
                "signer {} is not in the configured consensus group",
                key.public
            ));
        }
        Ok(Arc::new(ConsensusGroupEligibility::new(group)))
    }

    fn build_proposer(&self) -> Result<(Arc<Proposer<FileStorage>>, RoundScheduler)> {
        let key = MultiSigKeyPair::from_keypair(&self.keypair);
        let scheduler = Arc::new(RoundScheduler::new(&self.config.chronology)?);
        let scheme: Arc<dyn MultiSignatureScheme> = Arc::new(SchnorrMultiSig::new());
        let policy = self.config.execution;

        let composer =
            BlockComposer::new(Arc::clone(&scheduler), Arc::clone(&scheme), Arc::clone(&self.clock))
                .with_policy(policy);
        let validator = BlockValidator::new(Arc::clone(&scheduler), scheme)
            .with_eligibility(self.eligibility(&key)?)
            .with_policy(policy);

        info!("Signing as {}", key.public);
        let proposer = Proposer::new(Arc::clone(&self.context), composer, validator, key);
        Ok((
            Arc::new(proposer),
            RoundScheduler::new(&self.config.chronology)?,
        ))
    }

    /// Run the node until interrupted
    pub async fn run(self, txs: Vec<Transaction>) -> Result<()> {
        info!("Starting Tessera node");
        let (proposer, scheduler) = self.build_proposer()?;

        let genesis_ts = self.context.read().await.genesis_timestamp();
        if self.clock.now_ms() >= genesis_ts {
            if let Some(outcome) = proposer.bootstrap_genesis().await? {
                if !outcome.is_committed() {
                    return Err(anyhow!("genesis rejected: {}", outcome.report));
                }
            }
        } else {
            info!("Genesis at {} is in the future; installing it in the first round", genesis_ts);
        }
        self.log_head().await;

        for tx in txs {
            let hash = proposer.submit_transaction(tx).await?;
            info!("Queued transaction {}", hash);
        }

        tokio::select! {
            result = Arc::clone(&proposer).run(scheduler, Arc::clone(&self.clock)) => {
                result?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
            }
        }

        self.log_head().await;
        Ok(())
    }

    async fn log_head(&self) {
        let context = self.context.read().await;
        match context.chain.head().zip(context.chain.head_nonce()) {
            Some((head, nonce)) => info!(
                "Chain head {} at nonce {}, ledger digest {}",
                head,
                nonce,
                context
                    .ledger
                    .digest()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|e| e.to_string())
            ),
            None => info!("Chain is empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::generate_sample_config;
    use tessera_consensus::Phase;

    fn sample(dir: &Path) -> NodeConfig {
        let mut config = generate_sample_config();
        config.data_dir = dir.to_path_buf();
        config.genesis.timestamp = 0;
        config
    }

    #[tokio::test]
    async fn test_bootstrap_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample(dir.path());

        let node = Node::new(config.clone()).unwrap();
        let (proposer, _) = node.build_proposer().unwrap();
        assert!(proposer.bootstrap_genesis().await.unwrap().is_some());
        let head = node.context.read().await.chain.head();
        drop(proposer);
        drop(node);

        let reopened = open_context(&config).unwrap();
        assert!(head.is_some());
        assert_eq!(reopened.chain.head(), head);
        assert_eq!(reopened.genesis_timestamp(), 0);
    }

    #[tokio::test]
    async fn test_phase_handling_commits_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(sample(dir.path())).unwrap();
        let (proposer, _) = node.build_proposer().unwrap();
        proposer.bootstrap_genesis().await.unwrap();

        let round = tessera_consensus::Round { index: 0, start: 0 };
        proposer.handle_phase(Phase::ProposeBlock, &round).await;
        proposer.handle_phase(Phase::VerifyBlock, &round).await;

        assert_eq!(node.context.read().await.next_nonce().unwrap(), 2);
    }

    #[test]
    fn test_signer_outside_group_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample(dir.path());
        config.consensus_group = vec![generate_sample_config().consensus_group[0].clone()];

        let node = Node::new(config).unwrap();
        assert!(node.build_proposer().is_err());
    }
}
