//! Consensus engine: block acceptance, fork choice and reorganization
//!
//! Owns the chain store, the UTXO set and the current tip. A submitted
//! block moves through header validation, then either extends the tip
//! (body validation plus an atomic UTXO apply) or is queued as a side
//! branch. When a side branch accumulates strictly more work than the
//! main chain the engine reorganizes: explicit rollback of the old
//! blocks, explicit connect of the new ones, with a full unwind back to
//! the old chain if any new block turns out to be invalid. Reorgs deeper
//! than `MAX_REORG_DEPTH` are refused outright.

use crate::consensus::difficulty::{
    self, block_work, meets_target, next_required_bits, serde_u256, U256,
};
use crate::consensus::store::ChainStore;
use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::core::utxo::{UtxoError, UtxoSet};
use crate::core::validator::{check_block_body, BlockBodyError};
use crate::crypto::hash::{BlockHash, PubKeyHash, TxId};
use crate::params::{self, Network, MAX_FUTURE_BLOCK_TIME, MAX_REORG_DEPTH};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Seconds since the Unix epoch
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Errors and outcomes
// =============================================================================

/// Header-level rejections, checked before the body is touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("unknown parent block {0}")]
    UnknownParent(BlockHash),
    #[error("timestamp too far in the future")]
    TimeTooFar,
    #[error("timestamp {timestamp} below median time past {median}")]
    TimeBeforeMedian { timestamp: u32, median: u32 },
    #[error("declared bits {declared:#010x} easier than required {required:#010x}")]
    BitsTooEasy { declared: u32, required: u32 },
    #[error("block hash does not meet its declared target")]
    InsufficientPow,
}

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("engine halted after an earlier fatal error")]
    Halted,
    #[error("duplicate block {0}")]
    Duplicate(BlockHash),
    #[error("invalid header: {0}")]
    Header(#[from] HeaderError),
    #[error("invalid body: {0}")]
    Body(#[from] BlockBodyError),
    #[error("reorganization depth {depth} exceeds limit {}", MAX_REORG_DEPTH)]
    ReorgTooDeep { depth: u64 },
    #[error("utxo inconsistency: {0}")]
    Utxo(#[from] UtxoError),
    #[error("internal chain state corruption: {0}")]
    Internal(String),
}

/// Terminal outcome of accepting a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    TipExtended { height: u64 },
    SideBranch { height: u64 },
    Reorganized {
        disconnected: u64,
        connected: u64,
        height: u64,
    },
}

/// A block newly connected to the main chain, with the fee data gathered
/// during its body validation
#[derive(Debug, Clone)]
pub struct ConnectedBlock {
    pub block: Block,
    pub height: u64,
    /// (fee, size) per non-coinbase transaction
    pub tx_fees: Vec<(u64, usize)>,
}

/// Everything callers need to react to an accepted block
#[derive(Debug, Clone)]
pub struct BlockAccepted {
    pub hash: BlockHash,
    pub status: BlockStatus,
    /// Blocks that joined the main chain, in ascending height order
    pub connected: Vec<ConnectedBlock>,
    /// Transactions knocked out of the chain by a reorganization,
    /// oldest block first so parents precede children
    pub disconnected: Vec<Transaction>,
}

// =============================================================================
// Chain state
// =============================================================================

/// The engine's view of the best chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainState {
    pub tip_hash: BlockHash,
    pub height: u64,
    #[serde(with = "serde_u256")]
    pub chain_work: U256,
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsensusEngine {
    network: Network,
    store: ChainStore,
    utxo: UtxoSet,
    state: ChainState,
    #[serde(skip)]
    halted: bool,
}

impl ConsensusEngine {
    /// Fresh engine holding only the network's genesis block.
    pub fn new(network: Network) -> Self {
        let genesis = Block::genesis(network);
        let mut utxo = UtxoSet::new();
        // Genesis is coinbase-only, the apply cannot fail
        utxo.apply(&genesis, 0)
            .expect("genesis block applies to an empty set");

        let mut store = ChainStore::new();
        let tip_hash = store.insert_genesis(genesis.clone());
        let state = ChainState {
            tip_hash,
            height: 0,
            chain_work: block_work(genesis.header.bits),
        };

        ConsensusEngine {
            network,
            store,
            utxo,
            state,
            halted: false,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn tip_hash(&self) -> BlockHash {
        self.state.tip_hash
    }

    pub fn height(&self) -> u64 {
        self.state.height
    }

    pub fn chain_work(&self) -> U256 {
        self.state.chain_work
    }

    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Put the engine into its terminal halted state. Every later
    /// submission fails with `Halted`. Queries keep working.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Rebuild volatile indexes after deserialization.
    pub fn rebuild_indexes(&mut self) {
        self.store.rebuild_indexes();
    }

    fn corrupt(&mut self, message: impl Into<String>) -> ConsensusError {
        self.halted = true;
        ConsensusError::Internal(message.into())
    }

    // -------------------------------------------------------------------------
    // Block acceptance
    // -------------------------------------------------------------------------

    /// Run a block through the full acceptance pipeline.
    pub fn accept_block(&mut self, block: Block) -> Result<BlockAccepted, ConsensusError> {
        if self.halted {
            return Err(ConsensusError::Halted);
        }

        let hash = block.hash();
        if self.store.contains(&hash) {
            return Err(ConsensusError::Duplicate(hash));
        }

        let parent_hash = block.header.previous_hash;
        let height = self.validate_header(&block, &hash)?;

        if parent_hash == self.state.tip_hash {
            self.extend_tip(block, hash, height)
        } else {
            self.queue_side_branch(block, hash, height)
        }
    }

    /// Contextual header checks. Returns the candidate's height.
    fn validate_header(&self, block: &Block, hash: &BlockHash) -> Result<u64, HeaderError> {
        let header = &block.header;
        let parent = self
            .store
            .entry(&header.previous_hash)
            .ok_or(HeaderError::UnknownParent(header.previous_hash))?;
        let height = parent.height + 1;

        if header.timestamp as u64 > unix_time() + MAX_FUTURE_BLOCK_TIME {
            return Err(HeaderError::TimeTooFar);
        }

        let median = self.store.median_time_past(&header.previous_hash);
        if header.timestamp < median {
            return Err(HeaderError::TimeBeforeMedian {
                timestamp: header.timestamp,
                median,
            });
        }

        // The declared target may be harder than required, never easier
        let required = next_required_bits(
            &self.store.retarget_headers(&header.previous_hash),
            header.timestamp,
            self.network,
        );
        if difficulty::bits_to_target(header.bits) > difficulty::bits_to_target(required) {
            return Err(HeaderError::BitsTooEasy {
                declared: header.bits,
                required,
            });
        }

        if !meets_target(hash, header.bits) {
            return Err(HeaderError::InsufficientPow);
        }

        Ok(height)
    }

    fn extend_tip(
        &mut self,
        block: Block,
        hash: BlockHash,
        height: u64,
    ) -> Result<BlockAccepted, ConsensusError> {
        let check = check_block_body(&block, &self.utxo, height)?;
        let undo = match self.utxo.apply(&block, height) {
            Ok(undo) => undo,
            // Body validation passed, so an apply failure means the two
            // disagree about the set
            Err(e) => return Err(self.corrupt(format!("apply after body check: {}", e))),
        };

        let parent_work = self.state.chain_work;
        self.store.insert(block.clone(), height, parent_work);
        self.store.connect_main(&hash, undo);
        self.state = ChainState {
            tip_hash: hash,
            height,
            chain_work: parent_work + block_work(block.header.bits),
        };
        self.store.prune(height);

        log::info!(
            "tip extended to height {} ({}, {} txs)",
            height,
            hash,
            block.transactions.len()
        );

        Ok(BlockAccepted {
            hash,
            status: BlockStatus::TipExtended { height },
            connected: vec![ConnectedBlock {
                block,
                height,
                tx_fees: check.tx_fees,
            }],
            disconnected: Vec::new(),
        })
    }

    fn queue_side_branch(
        &mut self,
        block: Block,
        hash: BlockHash,
        height: u64,
    ) -> Result<BlockAccepted, ConsensusError> {
        let parent_hash = block.header.previous_hash;
        let parent_work = match self.store.entry(&parent_hash) {
            Some(entry) => entry.chain_work,
            None => return Err(self.corrupt("side-branch parent vanished")),
        };
        self.store.insert(block, height, parent_work);
        self.store.note_side_tip(&hash, &parent_hash);

        let branch_work = match self.store.entry(&hash) {
            Some(entry) => entry.chain_work,
            None => return Err(self.corrupt("side-branch block vanished")),
        };

        // Fork choice: strictly more work wins, ties keep the incumbent
        if branch_work > self.state.chain_work {
            self.reorganize(hash)
        } else {
            log::info!("queued side-branch block {} at height {}", hash, height);
            Ok(BlockAccepted {
                hash,
                status: BlockStatus::SideBranch { height },
                connected: Vec::new(),
                disconnected: Vec::new(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Reorganization
    // -------------------------------------------------------------------------

    fn reorganize(&mut self, new_tip: BlockHash) -> Result<BlockAccepted, ConsensusError> {
        let (fork_hash, fork_height, connect_path) = match self.store.fork_path(&new_tip) {
            Some(found) => found,
            None => return Err(self.corrupt("side branch does not reach the main chain")),
        };

        let depth = self.state.height - fork_height;
        if depth > MAX_REORG_DEPTH {
            // The branch is refused regardless of its work
            self.store.remove_branch(&new_tip);
            return Err(ConsensusError::ReorgTooDeep { depth });
        }

        // Phase 1: disconnect the old chain down to the fork point. The
        // rolled-back transactions are captured here because pruning at
        // commit time may drop the losing branch from the store.
        let mut old_hashes = Vec::new();
        let mut old_txs: Vec<Vec<Transaction>> = Vec::new();
        let mut cursor = self.state.tip_hash;
        while cursor != fork_hash {
            let entry = match self.store.entry(&cursor) {
                Some(entry) => entry.clone(),
                None => return Err(self.corrupt("main-chain block missing during rollback")),
            };
            let undo = match self.store.disconnect_main(&cursor) {
                Some(undo) => undo,
                None => return Err(self.corrupt("undo data missing inside reorg horizon")),
            };
            self.utxo.rollback(&entry.block, &undo)?;
            old_hashes.push(cursor);
            old_txs.push(entry.block.transactions[1..].to_vec());
            cursor = entry.block.header.previous_hash;
        }

        // Phase 2: connect the new branch, validating each body against
        // the state it will actually see
        let mut connected = Vec::new();
        let mut failure: Option<BlockBodyError> = None;
        for hash in &connect_path {
            let entry = match self.store.entry(hash) {
                Some(entry) => entry.clone(),
                None => return Err(self.corrupt("branch block missing during connect")),
            };
            match check_block_body(&entry.block, &self.utxo, entry.height) {
                Ok(check) => {
                    let undo = match self.utxo.apply(&entry.block, entry.height) {
                        Ok(undo) => undo,
                        Err(e) => {
                            return Err(self.corrupt(format!("apply during reorg: {}", e)))
                        }
                    };
                    self.store.connect_main(hash, undo);
                    connected.push(ConnectedBlock {
                        block: entry.block,
                        height: entry.height,
                        tx_fees: check.tx_fees,
                    });
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            self.unwind_to_old_chain(&connected, &old_hashes)?;
            self.store.remove_branch(&new_tip);
            log::warn!("reorganization abandoned, branch invalid: {}", err);
            return Err(ConsensusError::Body(err));
        }

        // Phase 3: commit. The old tip becomes a side branch.
        self.store.remove_side_tip(&new_tip);
        if let Some(old_tip) = old_hashes.first() {
            self.store.add_side_tip(*old_tip);
        }
        let tip_entry = match self.store.entry(&new_tip) {
            Some(entry) => entry.clone(),
            None => return Err(self.corrupt("new tip missing after connect")),
        };
        self.state = ChainState {
            tip_hash: new_tip,
            height: tip_entry.height,
            chain_work: tip_entry.chain_work,
        };
        self.store.prune(self.state.height);

        // Transactions orphaned by the switch, candidates for the mempool.
        // Oldest block first so readmission sees parents before children.
        let kept: HashSet<TxId> = connected
            .iter()
            .flat_map(|c| c.block.transactions.iter().map(|tx| tx.txid()))
            .collect();
        let mut disconnected_txs = Vec::new();
        for txs in old_txs.iter().rev() {
            for tx in txs {
                if !kept.contains(&tx.txid()) {
                    disconnected_txs.push(tx.clone());
                }
            }
        }

        log::warn!(
            "reorganized: disconnected {} blocks, connected {}, new tip {} at height {}",
            old_hashes.len(),
            connect_path.len(),
            new_tip,
            self.state.height
        );

        Ok(BlockAccepted {
            hash: new_tip,
            status: BlockStatus::Reorganized {
                disconnected: old_hashes.len() as u64,
                connected: connect_path.len() as u64,
                height: self.state.height,
            },
            connected,
            disconnected: disconnected_txs,
        })
    }

    /// Undo a partially connected branch and restore the previous main
    /// chain exactly as it was.
    fn unwind_to_old_chain(
        &mut self,
        connected: &[ConnectedBlock],
        old_hashes: &[BlockHash],
    ) -> Result<(), ConsensusError> {
        for item in connected.iter().rev() {
            let hash = item.block.hash();
            let undo = match self.store.disconnect_main(&hash) {
                Some(undo) => undo,
                None => return Err(self.corrupt("undo data missing during unwind")),
            };
            self.utxo.rollback(&item.block, &undo)?;
        }
        for hash in old_hashes.iter().rev() {
            let entry = match self.store.entry(hash) {
                Some(entry) => entry.clone(),
                None => return Err(self.corrupt("old chain block missing during unwind")),
            };
            let undo = match self.utxo.apply(&entry.block, entry.height) {
                Ok(undo) => undo,
                Err(e) => return Err(self.corrupt(format!("re-apply during unwind: {}", e))),
            };
            self.store.connect_main(hash, undo);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Templates and queries
    // -------------------------------------------------------------------------

    /// Assemble an unsolved block on the current tip from pre-selected
    /// transactions and their total fees.
    pub fn block_template(
        &self,
        payout: PubKeyHash,
        transactions: Vec<Transaction>,
        total_fees: u64,
    ) -> Block {
        let height = self.state.height + 1;
        let median = self.store.median_time_past(&self.state.tip_hash);
        let timestamp = (unix_time() as u32).max(median);
        let bits = next_required_bits(
            &self.store.retarget_headers(&self.state.tip_hash),
            timestamp,
            self.network,
        );

        let coinbase = Transaction::coinbase(
            height,
            params::block_subsidy(height) + total_fees,
            payout,
            "",
        );
        let mut all = Vec::with_capacity(transactions.len() + 1);
        all.push(coinbase);
        all.extend(transactions);

        let mut block = Block {
            header: crate::core::block::BlockHeader {
                version: 1,
                previous_hash: self.state.tip_hash,
                merkle_root: crate::crypto::hash::Hash256::ZERO,
                timestamp,
                bits,
                nonce: 0,
            },
            transactions: all,
        };
        block.header.merkle_root = block.compute_merkle_root();
        block
    }

    /// Required bits for a block arriving on the current tip right now.
    pub fn next_difficulty_bits(&self) -> u32 {
        next_required_bits(
            &self.store.retarget_headers(&self.state.tip_hash),
            unix_time() as u32,
            self.network,
        )
    }

    /// Main-chain transaction lookup with the height it was confirmed at.
    pub fn transaction(&self, txid: &TxId) -> Option<(Transaction, u64)> {
        let (block_hash, height) = self.store.transaction_location(txid)?;
        let block = self.store.block(&block_hash)?;
        block
            .transactions
            .iter()
            .find(|tx| tx.txid() == *txid)
            .map(|tx| (tx.clone(), height))
    }

    /// Re-validate the stored main chain from genesis: parent links,
    /// merkle commitments and proof of work. Returns the tip height.
    pub fn verify_chain(&self) -> Result<u64, ConsensusError> {
        let mut previous = None;
        for height in 0..=self.state.height {
            let hash = self.store.hash_at_height(height).ok_or_else(|| {
                ConsensusError::Internal(format!("missing main-chain block at height {}", height))
            })?;
            let block = self.store.block(&hash).ok_or_else(|| {
                ConsensusError::Internal(format!("unindexed block at height {}", height))
            })?;

            if let Some(previous) = previous {
                if block.header.previous_hash != previous {
                    return Err(ConsensusError::Internal(format!(
                        "broken parent link at height {}",
                        height
                    )));
                }
            }
            if block.compute_merkle_root() != block.header.merkle_root {
                return Err(ConsensusError::Internal(format!(
                    "merkle mismatch at height {}",
                    height
                )));
            }
            // Genesis predates the difficulty rules
            if height > 0 && !meets_target(&hash, block.header.bits) {
                return Err(ConsensusError::Internal(format!(
                    "insufficient work at height {}",
                    height
                )));
            }
            previous = Some(hash);
        }
        Ok(self.state.height)
    }
}
