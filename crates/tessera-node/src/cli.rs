use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tessera - A sharded chain block producer
#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera node and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single-node shard
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Signed transaction JSON files to queue at startup
        #[arg(long = "tx")]
        txs: Vec<PathBuf>,
    },

    /// Initialize a new node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the stored chain head and ledger accounts
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Generate signed transactions for testing
    Txgen {
        #[command(subcommand)]
        command: TxGenCommands,
    },
}

#[derive(Subcommand)]
pub enum TxGenCommands {
    /// Create a value transfer
    Transfer {
        /// Sender secret key hex
        #[arg(long)]
        from_secret: String,
        /// Receiver address hex
        #[arg(long)]
        to: String,
        /// Amount to send (decimal, arbitrary precision)
        #[arg(long)]
        amount: String,
        /// Sender account nonce
        #[arg(long)]
        nonce: u64,
        /// Opaque payload hex
        #[arg(long, default_value = "")]
        payload: String,
        /// Output file (JSON)
        #[arg(short, long)]
        out: PathBuf,
    },
}
