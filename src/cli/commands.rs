//! CLI command handlers
//!
//! Each handler opens a `Node`, talks to it and prints a human-readable
//! report. Machine consumers should use the library API instead.

use crate::core::transaction::{Transaction, TxInput, TxOutput};
use crate::crypto::hash::{BlockHash, TxId};
use crate::crypto::keys::KeyPair;
use crate::node::{Node, NodeConfig};
use crate::params::{Network, COIN, COINBASE_MATURITY};
use chrono::DateTime;
use std::path::PathBuf;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Open (or initialize) the node on the chosen data directory.
pub fn open_node(network: Network, data_dir: PathBuf) -> CliResult<Node> {
    println!("📂 Opening {} chain state in {}...", network, data_dir.display());
    Ok(Node::open(NodeConfig::new(network, data_dir))?)
}

fn format_coins(amount: u64) -> String {
    format!("{}.{:08} SALO", amount / COIN, amount % COIN)
}

fn format_time(timestamp: u32) -> String {
    match DateTime::from_timestamp(timestamp as i64, 0) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => timestamp.to_string(),
    }
}

/// Initialize a fresh data directory (a no-op when one already exists).
pub async fn cmd_init(network: Network, data_dir: PathBuf) -> CliResult<()> {
    let node = open_node(network, data_dir)?;
    let info = node.chain_info().await;

    println!("✅ Chain ready");
    println!("  ├─ Network: {}", info.network);
    println!("  ├─ Height: {}", info.height);
    println!("  └─ Tip: {}", info.tip_hash);
    Ok(())
}

/// Print a chain status summary.
pub async fn cmd_info(node: &Node) -> CliResult<()> {
    let info = node.chain_info().await;

    println!("⛓️  Chain info");
    println!("  ├─ Network: {}", info.network);
    println!("  ├─ Height: {}", info.height);
    println!("  ├─ Tip: {}", info.tip_hash);
    println!("  ├─ Stored blocks: {}", info.stored_blocks);
    println!("  ├─ UTXO entries: {}", info.utxo_count);
    println!("  ├─ Chain work: {}", info.chain_work);
    println!("  └─ Next difficulty bits: 0x{:08x}", info.next_bits);
    Ok(())
}

/// Generate a key pair and print its address.
pub fn cmd_keygen(network: Network) -> CliResult<()> {
    let keypair = KeyPair::generate();

    println!("🔑 New key pair");
    println!("  ├─ Address: {}", keypair.address(network));
    println!("  ├─ Public key: {}", hex::encode(keypair.public_key_bytes()));
    println!("  └─ Secret key: {}", hex::encode(keypair.secret_key.secret_bytes()));
    println!();
    println!("⚠️  Keep the secret key safe. Anyone holding it can spend your coins.");
    Ok(())
}

/// Mine `count` blocks paying `address`.
pub async fn cmd_mine(node: &Node, address: &str, count: u64) -> CliResult<()> {
    println!("⛏️  Mining {} block(s) to {}...", count, address);
    let mined = node.mine_blocks(count, address).await?;

    for (index, hash) in mined.iter().enumerate() {
        let branch = if index + 1 == mined.len() { "└─" } else { "├─" };
        println!("  {} {}", branch, hash);
    }
    let info = node.chain_info().await;
    println!("✅ Chain height is now {}", info.height);
    println!("   Coinbase rewards mature after {} blocks", COINBASE_MATURITY);
    Ok(())
}

/// Show the spendable balance of an address.
pub async fn cmd_balance(node: &Node, address: &str) -> CliResult<()> {
    let balance = node.balance(address).await?;
    println!("💰 Balance of {}", address);
    println!("  └─ Spendable: {}", format_coins(balance));
    Ok(())
}

/// List the unspent outputs of an address.
pub async fn cmd_utxos(node: &Node, address: &str) -> CliResult<()> {
    let height = node.chain_info().await.height;
    let utxos = node.utxos(address).await?;

    println!("📦 {} unspent output(s) for {}", utxos.len(), address);
    for (index, (outpoint, utxo)) in utxos.iter().enumerate() {
        let branch = if index + 1 == utxos.len() { "└─" } else { "├─" };
        let maturity = if utxo.is_mature(height + 1) {
            "spendable"
        } else {
            "immature coinbase"
        };
        println!(
            "  {} {} {} ({}, height {})",
            branch,
            outpoint,
            format_coins(utxo.amount),
            maturity,
            utxo.height
        );
    }
    Ok(())
}

/// Build, sign and submit a payment from a raw secret key.
pub async fn cmd_send(
    node: &Node,
    secret_hex: &str,
    to: &str,
    amount: u64,
    fee: Option<u64>,
) -> CliResult<()> {
    let keypair = KeyPair::from_secret_bytes(&hex::decode(secret_hex)?)?;
    let from = keypair.address(node.network());
    let recipient = crate::crypto::keys::decode_address(node.network(), to)?;
    let fee = match fee {
        Some(fee) => fee,
        None => node.fee_estimates().await.normal.estimated_fee,
    };

    let height = node.chain_info().await.height;
    let mut spendable: Vec<_> = node
        .utxos(&from)
        .await?
        .into_iter()
        .filter(|(_, utxo)| utxo.is_mature(height + 1))
        .collect();
    spendable.sort_by(|a, b| b.1.amount.cmp(&a.1.amount));

    let needed = amount
        .checked_add(fee)
        .ok_or("amount plus fee overflows")?;
    let mut inputs = Vec::new();
    let mut gathered = 0u64;
    for (outpoint, utxo) in spendable {
        if gathered >= needed {
            break;
        }
        gathered += utxo.amount;
        inputs.push(TxInput::new(outpoint));
    }
    if gathered < needed {
        return Err(format!(
            "insufficient funds: have {}, need {}",
            format_coins(gathered),
            format_coins(needed)
        )
        .into());
    }

    let mut outputs = vec![TxOutput::new(amount, recipient)];
    let change = gathered - needed;
    if change > 0 {
        outputs.push(TxOutput::new(change, keypair.pubkey_hash()));
    }

    let mut tx = Transaction::new(inputs, outputs);
    tx.sign(&keypair)?;
    let txid = node.submit_transaction(tx).await?;

    println!("📤 Payment accepted into the mempool");
    println!("  ├─ Txid: {}", txid);
    println!("  ├─ Amount: {}", format_coins(amount));
    println!("  ├─ Fee: {}", format_coins(fee));
    println!("  └─ Change: {}", format_coins(change));
    Ok(())
}

/// Show a block by height or hash.
pub async fn cmd_block(node: &Node, selector: &str) -> CliResult<()> {
    let block = if let Ok(height) = selector.parse::<u64>() {
        node.block_at_height(height).await
    } else {
        node.block_by_hash(&selector.parse::<BlockHash>()?).await
    };
    let block = block.ok_or("block not found")?;

    println!("🧱 Block {}", block.hash());
    println!("  ├─ Previous: {}", block.header.previous_hash);
    println!("  ├─ Merkle root: {}", block.header.merkle_root);
    println!("  ├─ Time: {}", format_time(block.header.timestamp));
    println!("  ├─ Bits: 0x{:08x}", block.header.bits);
    println!("  ├─ Nonce: {}", block.header.nonce);
    println!("  ├─ Size: {} bytes", block.size());
    println!("  └─ Transactions: {}", block.transactions.len());
    for (index, tx) in block.transactions.iter().enumerate() {
        let branch = if index + 1 == block.transactions.len() {
            "└─"
        } else {
            "├─"
        };
        println!("     {} {}", branch, tx.txid());
    }
    Ok(())
}

/// Show where a transaction lives and what it pays.
pub async fn cmd_transaction(node: &Node, txid: &str) -> CliResult<()> {
    let txid: TxId = txid.parse()?;
    let status = node.transaction(&txid).await.ok_or("transaction not found")?;

    println!("🔎 Transaction {}", txid);
    match status.confirmations {
        Some(confirmations) => println!("  ├─ Confirmations: {}", confirmations),
        None => println!("  ├─ In mempool (unconfirmed)"),
    }
    println!("  ├─ Inputs: {}", status.tx.inputs.len());
    println!("  └─ Outputs:");
    for (index, output) in status.tx.outputs.iter().enumerate() {
        let branch = if index + 1 == status.tx.outputs.len() {
            "└─"
        } else {
            "├─"
        };
        println!(
            "     {} {} to {}",
            branch,
            format_coins(output.amount),
            output.pubkey_hash
        );
    }
    Ok(())
}

/// Show mempool statistics.
pub async fn cmd_mempool(node: &Node) -> CliResult<()> {
    let stats = node.mempool_stats().await;

    println!("🏊 Mempool");
    println!("  ├─ Transactions: {}", stats.tx_count);
    println!("  ├─ Total size: {} bytes", stats.total_size);
    println!("  ├─ Total fees: {}", format_coins(stats.total_fees));
    if stats.tx_count > 0 {
        println!(
            "  └─ Fee rates: {} to {} sat/byte",
            stats.min_fee_rate, stats.max_fee_rate
        );
    } else {
        println!("  └─ Fee rates: n/a");
    }
    Ok(())
}

/// Show fee recommendations.
pub async fn cmd_fees(node: &Node) -> CliResult<()> {
    let estimates = node.fee_estimates().await;

    println!("💸 Fee estimates (sat/byte)");
    println!(
        "  ├─ Fast (~{} block): {} ({} typical)",
        estimates.fast.target_blocks,
        estimates.fast.fee_rate,
        format_coins(estimates.fast.estimated_fee)
    );
    println!(
        "  ├─ Normal (~{} blocks): {} ({} typical)",
        estimates.normal.target_blocks,
        estimates.normal.fee_rate,
        format_coins(estimates.normal.estimated_fee)
    );
    println!(
        "  ├─ Economy (~{} blocks): {} ({} typical)",
        estimates.economy.target_blocks,
        estimates.economy.fee_rate,
        format_coins(estimates.economy.estimated_fee)
    );
    println!("  └─ Congestion factor: {:.2}", estimates.congestion);
    Ok(())
}

/// Re-validate the stored chain from genesis.
pub async fn cmd_verify(node: &Node) -> CliResult<()> {
    println!("🔍 Verifying chain...");
    let height = node.verify_chain().await?;
    println!("✅ Chain valid up to height {}", height);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_coins() {
        assert_eq!(format_coins(0), "0.00000000 SALO");
        assert_eq!(format_coins(COIN), "1.00000000 SALO");
        assert_eq!(format_coins(123 * COIN + 45), "123.00000045 SALO");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00 UTC");
    }
}
