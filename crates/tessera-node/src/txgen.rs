use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use tessera_core::{Address, KeyPair, SecretKey, Transaction};

use crate::cli::TxGenCommands;

pub fn handle_txgen(command: TxGenCommands) -> Result<()> {
    match command {
        TxGenCommands::Transfer {
            from_secret,
            to,
            amount,
            nonce,
            payload,
            out,
        } => {
            let sender = KeyPair::from_secret(parse_secret(&from_secret)?);
            let tx = Transaction::new_signed(
                &sender,
                parse_address(&to)?,
                parse_amount(&amount)?,
                nonce,
                hex::decode(payload.trim())?,
            )?;
            write_tx(&tx, &out)?;
            println!("Transaction {} written to {}", tx.hash()?, out.display());
        }
    }

    Ok(())
}

pub fn read_tx(path: &Path) -> Result<Transaction> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_tx(tx: &Transaction, out: &PathBuf) -> Result<()> {
    let json = serde_json::to_string_pretty(tx)?;
    std::fs::write(out, json)?;
    Ok(())
}

fn parse_secret(hex_str: &str) -> Result<SecretKey> {
    SecretKey::from_hex(hex_str).map_err(|e| anyhow!(e))
}

fn parse_address(hex_str: &str) -> Result<Address> {
    Address::from_hex(hex_str).map_err(|e| anyhow!(e))
}

pub fn parse_amount(input: &str) -> Result<BigUint> {
    input
        .trim()
        .parse::<BigUint>()
        .map_err(|e| anyhow!("Invalid amount '{}': {}", input, e))
}
