use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tessera_core::{KeyPair, MultiSigKeyPair};
use tessera_state::AccountLedger;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod config;
mod node;
mod txgen;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use node::{open_context, Node};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, txs } => {
            run_node(config, txs).await?;
        }
        Commands::Init { output } => {
            init_config(&output)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
        Commands::Status { config } => {
            show_status(&config)?;
        }
        Commands::Txgen { command } => {
            txgen::handle_txgen(command)?;
        }
    }

    Ok(())
}

fn load_config(config_path: &Path) -> Result<NodeConfig> {
    info!("Loading configuration from {:?}", config_path);
    if !config_path.exists() {
        error!(
            "Configuration file not found: {:?}. Run 'tessera init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    }
    NodeConfig::load(config_path)
}

/// Run a Tessera node
async fn run_node(config_path: PathBuf, tx_files: Vec<PathBuf>) -> Result<()> {
    let config = load_config(&config_path)?;
    let txs = tx_files
        .iter()
        .map(|path| txgen::read_tx(path))
        .collect::<Result<Vec<_>>>()?;

    let node = Node::new(config)?;
    node.run(txs).await
}

/// Initialize a new configuration file
fn init_config(output: &Path) -> Result<()> {
    info!("Generating sample configuration");

    let config = generate_sample_config();
    config.save(output)?;

    info!("Configuration saved to {:?}", output);
    info!("Mint address: {}", config.genesis.mint_address);

    println!("\nConfiguration file created: {}", output.display());
    println!("Edit the file to customize your node settings.");
    println!("\nTo start the node, run:");
    println!("  tessera run --config {}", output.display());

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = KeyPair::generate();
    let multisig = MultiSigKeyPair::from_keypair(&keypair);

    println!("Generated new keypair:");
    println!("  Public key:    {}", keypair.public.to_hex());
    println!("  Address:       {}", tessera_core::Address::from_public_key(&keypair.public));
    println!("  Multisig key:  {}", multisig.public.to_hex());
    println!("  Secret key:    {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}

/// Show stored chain and ledger state
fn show_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let context = open_context(&config)?;

    println!("Chain:");
    match context.head_block()? {
        Some(head) => {
            println!("  head:       {}", head.hash()?);
            println!("  nonce:      {}", head.nonce);
            println!("  round:      {}", head.round_index);
            println!("  txs:        {}", head.tx_hashes.len());
        }
        None => println!("  empty"),
    }
    println!("  genesis ts: {}", context.genesis_timestamp());
    println!("Ledger digest: {}", context.ledger.digest()?);

    println!("Accounts:");
    for account in context.ledger.accounts() {
        println!(
            "  {}  balance {}  nonce {}",
            account.address, account.balance, account.nonce
        );
    }

    Ok(())
}
