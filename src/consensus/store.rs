//! Block storage and chain topology
//!
//! Every accepted block lives here, main chain and side branches alike.
//! The height index names the main chain; everything else is reachable
//! only by hash. Undo data is retained for main-chain blocks within the
//! reorganization horizon and side branches are pruned once their fork
//! point falls below it.

use crate::consensus::difficulty::{block_work, serde_u256, U256};
use crate::core::block::{Block, BlockHeader};
use crate::core::utxo::BlockUndo;
use crate::crypto::hash::{BlockHash, TxId};
use crate::params::{DGW_PAST_BLOCKS, MAX_REORG_DEPTH, MTP_BLOCK_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A stored block with its height and cumulative branch work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEntry {
    pub block: Block,
    pub height: u64,
    #[serde(with = "serde_u256")]
    pub chain_work: U256,
}

/// Persistent block storage plus the indexes that define the main chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainStore {
    blocks: HashMap<BlockHash, BlockEntry>,
    /// Main chain only: height to hash
    height_index: BTreeMap<u64, BlockHash>,
    /// Undo data for main-chain blocks inside the reorg horizon
    undo: HashMap<BlockHash, BlockUndo>,
    /// Tips of side branches still inside the horizon
    side_tips: Vec<BlockHash>,
    /// Main-chain transaction locations, rebuilt on load
    #[serde(skip)]
    tx_index: HashMap<TxId, BlockHash>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn entry(&self, hash: &BlockHash) -> Option<&BlockEntry> {
        self.blocks.get(hash)
    }

    pub fn block(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash).map(|e| &e.block)
    }

    pub fn hash_at_height(&self, height: u64) -> Option<BlockHash> {
        self.height_index.get(&height).copied()
    }

    pub fn block_at_height(&self, height: u64) -> Option<&Block> {
        self.hash_at_height(height).and_then(|h| self.block(&h))
    }

    pub fn is_main(&self, hash: &BlockHash) -> bool {
        match self.blocks.get(hash) {
            Some(entry) => self.height_index.get(&entry.height) == Some(hash),
            None => false,
        }
    }

    /// Main-chain block containing a transaction, with its height.
    pub fn transaction_location(&self, txid: &TxId) -> Option<(BlockHash, u64)> {
        let hash = self.tx_index.get(txid)?;
        let entry = self.blocks.get(hash)?;
        Some((*hash, entry.height))
    }

    pub fn side_tips(&self) -> &[BlockHash] {
        self.side_tips.as_slice()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    // -------------------------------------------------------------------------
    // Insertion and main-chain bookkeeping
    // -------------------------------------------------------------------------

    /// Store a block whose parent is already present, computing its
    /// cumulative work from the parent entry. Genesis passes zero parent
    /// work via `insert_genesis`.
    pub fn insert(&mut self, block: Block, height: u64, parent_work: U256) -> BlockHash {
        let hash = block.hash();
        let chain_work = parent_work + block_work(block.header.bits);
        self.blocks.insert(
            hash,
            BlockEntry {
                block,
                height,
                chain_work,
            },
        );
        hash
    }

    pub fn insert_genesis(&mut self, block: Block) -> BlockHash {
        let hash = self.insert(block, 0, U256::zero());
        self.connect_main(&hash, BlockUndo::default());
        hash
    }

    /// Mark a stored block as part of the main chain and retain its undo
    /// data.
    pub fn connect_main(&mut self, hash: &BlockHash, undo: BlockUndo) {
        let entry = match self.blocks.get(hash) {
            Some(entry) => entry,
            None => return,
        };
        self.height_index.insert(entry.height, *hash);
        for tx in &entry.block.transactions {
            self.tx_index.insert(tx.txid(), *hash);
        }
        self.undo.insert(*hash, undo);
        self.side_tips.retain(|t| t != hash);
    }

    /// Remove a block from the main chain indexes, returning its undo
    /// data. The block itself stays stored.
    pub fn disconnect_main(&mut self, hash: &BlockHash) -> Option<BlockUndo> {
        let entry = self.blocks.get(hash)?;
        if self.height_index.get(&entry.height) == Some(hash) {
            self.height_index.remove(&entry.height);
        }
        for tx in &entry.block.transactions {
            self.tx_index.remove(&tx.txid());
        }
        self.undo.remove(hash)
    }

    /// Record a new side-branch block, replacing its parent as the
    /// branch tip when the parent was one.
    pub fn note_side_tip(&mut self, hash: &BlockHash, parent: &BlockHash) {
        self.side_tips.retain(|t| t != parent);
        if !self.side_tips.contains(hash) {
            self.side_tips.push(*hash);
        }
    }

    pub fn add_side_tip(&mut self, hash: BlockHash) {
        if !self.side_tips.contains(&hash) {
            self.side_tips.push(hash);
        }
    }

    pub fn remove_side_tip(&mut self, hash: &BlockHash) {
        self.side_tips.retain(|t| t != hash);
    }

    /// Drop a branch from the store, walking parent links from `tip`
    /// until a main-chain block (or unknown parent) is reached.
    pub fn remove_branch(&mut self, tip: &BlockHash) {
        self.remove_side_tip(tip);
        let mut cursor = *tip;
        while let Some(entry) = self.blocks.get(&cursor) {
            if self.is_main(&cursor) {
                break;
            }
            let parent = entry.block.header.previous_hash;
            self.blocks.remove(&cursor);
            self.undo.remove(&cursor);
            cursor = parent;
        }
    }

    // -------------------------------------------------------------------------
    // Branch walking
    // -------------------------------------------------------------------------

    /// Up to `count` headers ending at `tip`, in ascending height order.
    pub fn branch_headers(&self, tip: &BlockHash, count: usize) -> Vec<BlockHeader> {
        let mut headers = Vec::with_capacity(count);
        let mut cursor = *tip;
        while headers.len() < count {
            match self.blocks.get(&cursor) {
                Some(entry) => {
                    headers.push(entry.block.header);
                    cursor = entry.block.header.previous_hash;
                }
                None => break,
            }
        }
        headers.reverse();
        headers
    }

    /// Headers feeding the retarget rule for a child of `tip`.
    pub fn retarget_headers(&self, tip: &BlockHash) -> Vec<BlockHeader> {
        self.branch_headers(tip, DGW_PAST_BLOCKS + 1)
    }

    /// Median time past of the branch ending at `tip`: the median of the
    /// last eleven timestamps, or fewer on a young chain.
    pub fn median_time_past(&self, tip: &BlockHash) -> u32 {
        let mut timestamps: Vec<u32> = self
            .branch_headers(tip, MTP_BLOCK_COUNT)
            .iter()
            .map(|h| h.timestamp)
            .collect();
        if timestamps.is_empty() {
            return 0;
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }

    /// Walk from a side tip back to the main chain. Returns the fork
    /// point (a main-chain block) with its height, and the branch hashes
    /// from the fork point's child up to the tip, ascending.
    pub fn fork_path(&self, side_tip: &BlockHash) -> Option<(BlockHash, u64, Vec<BlockHash>)> {
        let mut path = Vec::new();
        let mut cursor = *side_tip;
        loop {
            if self.is_main(&cursor) {
                let height = self.blocks.get(&cursor)?.height;
                path.reverse();
                return Some((cursor, height, path));
            }
            let entry = self.blocks.get(&cursor)?;
            path.push(cursor);
            cursor = entry.block.header.previous_hash;
        }
    }

    // -------------------------------------------------------------------------
    // Pruning and recovery
    // -------------------------------------------------------------------------

    /// Discard undo data below the reorg horizon and side branches whose
    /// fork point can no longer be reached.
    pub fn prune(&mut self, best_height: u64) {
        let horizon = best_height.saturating_sub(MAX_REORG_DEPTH);

        let stale: Vec<BlockHash> = self
            .side_tips
            .clone()
            .into_iter()
            .filter(|tip| match self.fork_path(tip) {
                Some((_, fork_height, _)) => fork_height < horizon,
                None => true,
            })
            .collect();
        for tip in stale {
            self.remove_branch(&tip);
        }

        let old: Vec<BlockHash> = self
            .undo
            .keys()
            .filter(|hash| match self.blocks.get(hash) {
                Some(entry) => entry.height < horizon,
                None => true,
            })
            .copied()
            .collect();
        for hash in old {
            self.undo.remove(&hash);
        }
    }

    pub fn undo_for(&self, hash: &BlockHash) -> Option<&BlockUndo> {
        self.undo.get(hash)
    }

    /// Rebuild the volatile transaction index after deserialization.
    pub fn rebuild_indexes(&mut self) {
        self.tx_index.clear();
        for hash in self.height_index.values() {
            if let Some(entry) = self.blocks.get(hash) {
                for tx in &entry.block.transactions {
                    self.tx_index.insert(tx.txid(), *hash);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::BlockHeader;
    use crate::core::transaction::Transaction;
    use crate::crypto::hash::{Hash256, PubKeyHash};
    use crate::params::Network;

    fn child_of(parent: &Block, height: u64, timestamp: u32) -> Block {
        let coinbase = Transaction::coinbase(height, 1_000, PubKeyHash([height as u8; 20]), "");
        let mut block = Block {
            header: BlockHeader {
                version: 1,
                previous_hash: parent.hash(),
                merkle_root: Hash256::ZERO,
                timestamp,
                bits: 0x207f_ffff,
                nonce: 0,
            },
            transactions: vec![coinbase],
        };
        block.header.merkle_root = block.compute_merkle_root();
        block
    }

    fn store_with_chain(length: u64) -> (ChainStore, Vec<Block>) {
        let mut store = ChainStore::new();
        let genesis = Block::genesis(Network::Regtest);
        store.insert_genesis(genesis.clone());

        let mut blocks = vec![genesis];
        for height in 1..=length {
            let parent = blocks.last().unwrap().clone();
            let block = child_of(&parent, height, 1_768_147_700 + height as u32 * 150);
            let parent_work = store.entry(&parent.hash()).unwrap().chain_work;
            let hash = store.insert(block.clone(), height, parent_work);
            store.connect_main(&hash, BlockUndo::default());
            blocks.push(block);
        }
        (store, blocks)
    }

    #[test]
    fn test_main_chain_indexing() {
        let (store, blocks) = store_with_chain(5);
        assert_eq!(store.hash_at_height(3), Some(blocks[3].hash()));
        assert!(store.is_main(&blocks[5].hash()));
        assert_eq!(store.block_count(), 6);

        let txid = blocks[2].transactions[0].txid();
        let (hash, height) = store.transaction_location(&txid).unwrap();
        assert_eq!(hash, blocks[2].hash());
        assert_eq!(height, 2);
    }

    #[test]
    fn test_chain_work_accumulates() {
        let (store, blocks) = store_with_chain(3);
        let w1 = store.entry(&blocks[1].hash()).unwrap().chain_work;
        let w3 = store.entry(&blocks[3].hash()).unwrap().chain_work;
        assert!(w3 > w1);
    }

    #[test]
    fn test_disconnect_removes_from_indexes() {
        let (mut store, blocks) = store_with_chain(3);
        let tip = blocks[3].hash();
        store.disconnect_main(&tip);

        assert!(store.contains(&tip), "block itself stays stored");
        assert!(!store.is_main(&tip));
        assert_eq!(store.hash_at_height(3), None);
        assert!(store
            .transaction_location(&blocks[3].transactions[0].txid())
            .is_none());
    }

    #[test]
    fn test_branch_headers_ascending() {
        let (store, blocks) = store_with_chain(5);
        let headers = store.branch_headers(&blocks[5].hash(), 3);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], blocks[3].header);
        assert_eq!(headers[2], blocks[5].header);
    }

    #[test]
    fn test_median_time_past() {
        let (store, blocks) = store_with_chain(12);
        // Eleven blocks ending at the tip: heights 2..=12, median at 7
        let mtp = store.median_time_past(&blocks[12].hash());
        assert_eq!(mtp, blocks[7].header.timestamp);

        // Young chain uses however many blocks exist
        let short = store.median_time_past(&blocks[2].hash());
        assert_eq!(short, blocks[1].header.timestamp);
    }

    #[test]
    fn test_fork_path() {
        let (mut store, blocks) = store_with_chain(5);

        // Side branch of two blocks forking off height 3
        let side_a = child_of(&blocks[3], 4, 1_768_200_000);
        let side_b = child_of(&side_a, 5, 1_768_200_150);
        let parent_work = store.entry(&blocks[3].hash()).unwrap().chain_work;
        store.insert(side_a.clone(), 4, parent_work);
        let work_a = store.entry(&side_a.hash()).unwrap().chain_work;
        store.insert(side_b.clone(), 5, work_a);
        store.add_side_tip(side_b.hash());

        let (fork, fork_height, path) = store.fork_path(&side_b.hash()).unwrap();
        assert_eq!(fork, blocks[3].hash());
        assert_eq!(fork_height, 3);
        assert_eq!(path, vec![side_a.hash(), side_b.hash()]);
    }

    #[test]
    fn test_prune_drops_deep_side_branches() {
        let (mut store, blocks) = store_with_chain(5);
        let side = child_of(&blocks[1], 2, 1_768_200_000);
        let parent_work = store.entry(&blocks[1].hash()).unwrap().chain_work;
        store.insert(side.clone(), 2, parent_work);
        store.add_side_tip(side.hash());

        // Horizon far above the fork point: branch survives
        store.prune(5);
        assert!(store.contains(&side.hash()));

        // Fork point below the horizon: branch is dropped
        store.prune(MAX_REORG_DEPTH + 10);
        assert!(!store.contains(&side.hash()));
        assert!(store.side_tips().is_empty());
    }

    #[test]
    fn test_rebuild_indexes_after_roundtrip() {
        let (store, blocks) = store_with_chain(3);
        let json = serde_json::to_string(&store).unwrap();
        let mut restored: ChainStore = serde_json::from_str(&json).unwrap();

        let txid = blocks[2].transactions[0].txid();
        assert!(restored.transaction_location(&txid).is_none());
        restored.rebuild_indexes();
        assert_eq!(
            restored.transaction_location(&txid).unwrap().0,
            blocks[2].hash()
        );
    }
}
