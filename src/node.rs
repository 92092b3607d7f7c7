//! Node facade
//!
//! One handle over the consensus engine, the mempool, the fee estimator
//! and persistence. Shared state lives behind `Arc<RwLock<..>>`; writers
//! always take the locks in engine, mempool, fees order so the pieces
//! stay mutually consistent. A failed chain-state save halts the engine
//! permanently rather than letting memory and disk diverge.

use crate::consensus::difficulty::solve;
use crate::consensus::engine::{BlockStatus, ConsensusEngine};
use crate::core::block::Block;
use crate::core::transaction::{OutPoint, Transaction};
use crate::core::utxo::Utxo;
use crate::crypto::hash::{BlockHash, TxId};
use crate::crypto::keys::decode_address;
use crate::error::{NodeError, Result};
use crate::mempool::fee::{FeeEstimates, FeeEstimator};
use crate::mempool::pool::{Mempool, MempoolStats, DEFAULT_MAX_MEMPOOL_SIZE};
use crate::params::Network;
use crate::storage::{Storage, StorageConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Nonce budget for the built-in miner: the whole 32-bit space
const MAX_MINING_ATTEMPTS: u64 = u32::MAX as u64;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    pub mempool_max: usize,
}

impl NodeConfig {
    pub fn new(network: Network, data_dir: impl Into<PathBuf>) -> Self {
        NodeConfig {
            network,
            data_dir: data_dir.into(),
            mempool_max: DEFAULT_MAX_MEMPOOL_SIZE,
        }
    }
}

/// Snapshot of the chain for status displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub network: Network,
    pub height: u64,
    pub tip_hash: BlockHash,
    pub stored_blocks: usize,
    pub utxo_count: usize,
    /// Cumulative work as a hex string
    pub chain_work: String,
    pub next_bits: u32,
}

/// Where a transaction currently lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub tx: Transaction,
    /// Confirmation count when mined; None while in the mempool
    pub confirmations: Option<u64>,
    pub in_mempool: bool,
}

pub struct Node {
    config: NodeConfig,
    engine: Arc<RwLock<ConsensusEngine>>,
    mempool: Arc<RwLock<Mempool>>,
    fees: Arc<RwLock<FeeEstimator>>,
    storage: Storage,
}

impl Node {
    /// Open a node on the given data directory, loading the persisted
    /// chain state or creating a fresh one at genesis.
    pub fn open(config: NodeConfig) -> Result<Self> {
        let storage = Storage::new(StorageConfig::with_data_dir(&config.data_dir));
        let engine = if storage.exists() {
            storage.load()?
        } else {
            let engine = ConsensusEngine::new(config.network);
            storage.save(&engine)?;
            log::info!(
                "initialized {} chain, genesis {}",
                config.network,
                engine.tip_hash()
            );
            engine
        };

        let mempool = Mempool::new(config.mempool_max);
        Ok(Node {
            engine: Arc::new(RwLock::new(engine)),
            mempool: Arc::new(RwLock::new(mempool)),
            fees: Arc::new(RwLock::new(FeeEstimator::new())),
            storage,
            config,
        })
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Decode and submit a block received from the outside.
    pub async fn submit_block_bytes(&self, bytes: &[u8]) -> Result<BlockStatus> {
        let block = Block::decode(bytes)?;
        self.submit_block(block).await
    }

    /// Run a block through consensus and, on acceptance, reconcile the
    /// mempool and fee estimator and persist the new state.
    pub async fn submit_block(&self, block: Block) -> Result<BlockStatus> {
        let mut engine = self.engine.write().await;
        let accepted = engine.accept_block(block)?;

        {
            let mut pool = self.mempool.write().await;
            for connected in &accepted.connected {
                pool.on_block_connected(&connected.block);
            }
            // Reorg casualties go back into the pool when still valid;
            // losers of the new chain are silently dropped
            for tx in &accepted.disconnected {
                if let Err(e) = pool.accept(tx.clone(), engine.utxo(), engine.height()) {
                    log::debug!("disconnected tx not readmitted: {}", e);
                }
            }

            let mut fees = self.fees.write().await;
            for connected in &accepted.connected {
                fees.record_block(connected.height, &connected.tx_fees, connected.block.size());
            }
            fees.set_mempool_size(pool.len());
        }

        if let Err(e) = self.storage.save(&engine) {
            engine.halt();
            log::error!("chain state save failed, halting: {}", e);
            return Err(e.into());
        }
        Ok(accepted.status)
    }

    /// Decode and submit a transaction received from the outside.
    pub async fn submit_transaction_bytes(&self, bytes: &[u8]) -> Result<TxId> {
        let tx = Transaction::decode(bytes)?;
        self.submit_transaction(tx).await
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<TxId> {
        let engine = self.engine.read().await;
        let mut pool = self.mempool.write().await;
        let txid = pool.accept(tx, engine.utxo(), engine.height())?;
        self.fees.write().await.set_mempool_size(pool.len());
        Ok(txid)
    }

    // -------------------------------------------------------------------------
    // Mining
    // -------------------------------------------------------------------------

    /// Build a template on the current tip paying `address`, filled from
    /// the mempool.
    pub async fn block_template(&self, address: &str) -> Result<Block> {
        let payout = decode_address(self.config.network, address)?;
        let engine = self.engine.read().await;
        let pool = self.mempool.read().await;
        let (transactions, total_fees) = pool.select_for_block(engine.utxo(), engine.height());
        Ok(engine.block_template(payout, transactions, total_fees))
    }

    /// Template, solve and submit `count` blocks in sequence.
    pub async fn mine_blocks(&self, count: u64, address: &str) -> Result<Vec<BlockHash>> {
        let mut mined = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut block = self.block_template(address).await?;
            if !solve(&mut block.header, MAX_MINING_ATTEMPTS) {
                return Err(NodeError::MiningFailed(MAX_MINING_ATTEMPTS));
            }
            let hash = block.hash();
            self.submit_block(block).await?;
            mined.push(hash);
        }
        Ok(mined)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn chain_info(&self) -> ChainInfo {
        let engine = self.engine.read().await;
        ChainInfo {
            network: engine.network(),
            height: engine.height(),
            tip_hash: engine.tip_hash(),
            stored_blocks: engine.store().block_count(),
            utxo_count: engine.utxo().len(),
            chain_work: format!("{:x}", engine.chain_work()),
            next_bits: engine.next_difficulty_bits(),
        }
    }

    /// Spendable (mature) balance of an address.
    pub async fn balance(&self, address: &str) -> Result<u64> {
        let hash = decode_address(self.config.network, address)?;
        let engine = self.engine.read().await;
        Ok(engine.utxo().balance(&hash, engine.height()))
    }

    /// All unspent outputs locked to an address.
    pub async fn utxos(&self, address: &str) -> Result<Vec<(OutPoint, Utxo)>> {
        let hash = decode_address(self.config.network, address)?;
        let engine = self.engine.read().await;
        Ok(engine.utxo().outputs_for(&hash))
    }

    pub async fn block_at_height(&self, height: u64) -> Option<Block> {
        self.engine
            .read()
            .await
            .store()
            .block_at_height(height)
            .cloned()
    }

    pub async fn block_by_hash(&self, hash: &BlockHash) -> Option<Block> {
        self.engine.read().await.store().block(hash).cloned()
    }

    /// Find a transaction in the chain or the mempool.
    pub async fn transaction(&self, txid: &TxId) -> Option<TransactionStatus> {
        let engine = self.engine.read().await;
        if let Some((tx, height)) = engine.transaction(txid) {
            return Some(TransactionStatus {
                tx,
                confirmations: Some(engine.height() - height + 1),
                in_mempool: false,
            });
        }
        drop(engine);

        let pool = self.mempool.read().await;
        pool.get(txid).map(|entry| TransactionStatus {
            tx: entry.tx.clone(),
            confirmations: None,
            in_mempool: true,
        })
    }

    pub async fn fee_estimates(&self) -> FeeEstimates {
        self.fees.read().await.estimates()
    }

    pub async fn mempool_stats(&self) -> MempoolStats {
        self.mempool.read().await.stats()
    }

    /// Re-validate the stored main chain, for operator tooling.
    pub async fn verify_chain(&self) -> Result<u64> {
        let engine = self.engine.read().await;
        Ok(engine.verify_chain()?)
    }
}
