//! Salocoin core: validation and chain-state engine for a proof-of-work
//! cryptocurrency
//!
//! This crate provides the consensus-critical core of a Salocoin node:
//! - Proof of Work consensus with Dark Gravity Wave difficulty retargeting
//! - UTXO-based transaction model with coinbase maturity
//! - Full block and transaction validation (ECDSA over secp256k1)
//! - Fork tracking with bounded, atomic chain reorganizations
//! - First-seen mempool with fee-rate block template selection
//! - Three-tier fee estimation from confirmed rates and congestion
//! - Atomic JSON persistence with rotating backups
//!
//! # Example
//!
//! ```rust
//! use salocoin_core::core::block::Block;
//! use salocoin_core::crypto::keys::KeyPair;
//! use salocoin_core::params::{block_subsidy, Network};
//!
//! // Generate a key pair and derive its address
//! let keypair = KeyPair::generate();
//! println!("Address: {}", keypair.address(Network::Regtest));
//!
//! // Every network starts from a deterministic genesis block
//! let genesis = Block::genesis(Network::Regtest);
//! assert_eq!(genesis.transactions.len(), 1);
//! assert_eq!(genesis.transactions[0].total_output(), Some(block_subsidy(0)));
//! ```

pub mod cli;
pub mod consensus;
pub mod core;
pub mod crypto;
pub mod error;
pub mod mempool;
pub mod node;
pub mod params;
pub mod storage;

// Re-export commonly used types
pub use consensus::{ConsensusEngine, ConsensusError};
pub use core::{Block, BlockHeader, OutPoint, Transaction, TxOutput, Utxo, UtxoSet};
pub use crypto::KeyPair;
pub use error::{NodeError, Result};
pub use mempool::{FeeEstimator, Mempool};
pub use node::{Node, NodeConfig};
pub use params::Network;
pub use storage::{Storage, StorageConfig};
