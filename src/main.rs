//! salocoind: Salocoin node CLI
//!
//! Thin command-line front end over the node facade. All chain state
//! lives in the data directory as a single JSON chainstate file.

use clap::{Parser, Subcommand};
use salocoin_core::cli::commands::{self, CliResult};
use salocoin_core::params::Network;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "salocoind")]
#[command(version)]
#[command(about = "Salocoin validation and chain-state node", long_about = None)]
struct Cli {
    /// Data directory for chain state
    #[arg(short, long, default_value = ".salocoin")]
    data_dir: PathBuf,

    /// Network to run on: mainnet, testnet or regtest
    #[arg(short, long, default_value = "mainnet")]
    network: Network,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory with a genesis chain state
    Init,

    /// Show chain status
    Info,

    /// Generate a new key pair and address
    Keygen,

    /// Mine blocks paying a coinbase reward to an address
    Mine {
        /// Reward address
        address: String,

        /// Number of blocks to mine
        #[arg(short, long, default_value = "1")]
        count: u64,
    },

    /// Show the spendable balance of an address
    Balance {
        address: String,
    },

    /// List the unspent outputs of an address
    Utxos {
        address: String,
    },

    /// Build, sign and submit a payment
    Send {
        /// Sender secret key (hex)
        #[arg(short, long)]
        key: String,

        /// Recipient address
        to: String,

        /// Amount in satoshis
        amount: u64,

        /// Absolute fee in satoshis (defaults to the normal-tier estimate)
        #[arg(short, long)]
        fee: Option<u64>,
    },

    /// Show a block by height or hash
    Block {
        selector: String,
    },

    /// Show a transaction by txid
    Tx {
        txid: String,
    },

    /// Show mempool statistics
    Mempool,

    /// Show fee recommendations
    Fees,

    /// Re-validate the stored chain from genesis
    Verify,
}

fn main() -> CliResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> CliResult<()> {
    // Commands that don't need an open node
    match &cli.command {
        Commands::Init => return commands::cmd_init(cli.network, cli.data_dir).await,
        Commands::Keygen => return commands::cmd_keygen(cli.network),
        _ => {}
    }

    let node = commands::open_node(cli.network, cli.data_dir)?;
    match cli.command {
        Commands::Init | Commands::Keygen => unreachable!(),
        Commands::Info => commands::cmd_info(&node).await,
        Commands::Mine { address, count } => commands::cmd_mine(&node, &address, count).await,
        Commands::Balance { address } => commands::cmd_balance(&node, &address).await,
        Commands::Utxos { address } => commands::cmd_utxos(&node, &address).await,
        Commands::Send {
            key,
            to,
            amount,
            fee,
        } => commands::cmd_send(&node, &key, &to, amount, fee).await,
        Commands::Block { selector } => commands::cmd_block(&node, &selector).await,
        Commands::Tx { txid } => commands::cmd_transaction(&node, &txid).await,
        Commands::Mempool => commands::cmd_mempool(&node).await,
        Commands::Fees => commands::cmd_fees(&node).await,
        Commands::Verify => commands::cmd_verify(&node).await,
    }
}
