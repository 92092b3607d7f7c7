//! Transaction mempool
//!
//! Holds validated, unconfirmed transactions waiting for a block.
//! Admission is first-seen-wins: a transaction spending an outpoint
//! already claimed by a pool entry is refused, never replaced. When the
//! pool is full the lowest fee-rate entry is evicted in favor of a
//! better-paying newcomer, together with any entries chained on it.

use crate::consensus::unix_time;
use crate::core::transaction::{OutPoint, Transaction};
use crate::core::utxo::{OverlayView, UtxoView};
use crate::core::validator::{check_transaction, TxRejectReason};
use crate::crypto::hash::TxId;
use crate::params::{MAX_BLOCK_SIZE, MIN_FEE_RATE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Default capacity in transactions
pub const DEFAULT_MAX_MEMPOOL_SIZE: usize = 5_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction {0} already in mempool")]
    Duplicate(TxId),
    #[error("input {outpoint} already claimed by mempool transaction {existing}")]
    Conflict { outpoint: OutPoint, existing: TxId },
    #[error("transaction rejected: {0}")]
    Rejected(#[from] TxRejectReason),
    #[error("fee rate {rate} below minimum {minimum} sat/byte")]
    FeeTooLow { rate: u64, minimum: u64 },
    #[error("mempool full and fee rate {rate} does not beat the floor {floor}")]
    PoolFull { rate: u64, floor: u64 },
}

/// A pooled transaction with its precomputed admission data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: TxId,
    pub fee: u64,
    pub size: usize,
    /// Integer satoshis per byte
    pub fee_rate: u64,
    pub added_time: u64,
}

/// Aggregate statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolStats {
    pub tx_count: usize,
    pub total_size: usize,
    pub total_fees: u64,
    pub min_fee_rate: u64,
    pub max_fee_rate: u64,
}

#[derive(Debug, Clone)]
pub struct Mempool {
    entries: HashMap<TxId, MempoolEntry>,
    /// Outpoint claims for first-seen conflict detection
    by_outpoint: HashMap<OutPoint, TxId>,
    max_size: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMPOOL_SIZE)
    }
}

impl Mempool {
    pub fn new(max_size: usize) -> Self {
        Mempool {
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &TxId) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Validate and admit a transaction against the confirmed view.
    /// `tip_height` is the current chain height; validation runs in the
    /// context of the next block.
    pub fn accept(
        &mut self,
        tx: Transaction,
        view: &impl UtxoView,
        tip_height: u64,
    ) -> Result<TxId, MempoolError> {
        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::Duplicate(txid));
        }
        if tx.is_coinbase() {
            return Err(MempoolError::Rejected(TxRejectReason::BadStructure));
        }

        // First-seen-wins: any claimed input is a hard conflict
        for input in &tx.inputs {
            if let Some(existing) = self.by_outpoint.get(&input.outpoint) {
                return Err(MempoolError::Conflict {
                    outpoint: input.outpoint,
                    existing: *existing,
                });
            }
        }

        // Validate against the confirmed view plus the pool itself, so
        // chains of unconfirmed transactions are admissible
        let mut overlay = OverlayView::new(view);
        for entry in self.entries.values() {
            overlay.connect(&entry.tx, tip_height + 1, false);
        }
        let fee = check_transaction(&tx, &overlay, tip_height + 1)?;
        let size = tx.size();
        let fee_rate = fee / size.max(1) as u64;
        if fee_rate < MIN_FEE_RATE {
            return Err(MempoolError::FeeTooLow {
                rate: fee_rate,
                minimum: MIN_FEE_RATE,
            });
        }

        if self.entries.len() >= self.max_size {
            self.evict_for(fee_rate)?;
        }

        for input in &tx.inputs {
            self.by_outpoint.insert(input.outpoint, txid);
        }
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                txid,
                fee,
                size,
                fee_rate,
                added_time: unix_time(),
            },
        );
        log::debug!("mempool accepted {} ({} sat/byte)", txid, fee_rate);
        Ok(txid)
    }

    /// Make room for a newcomer at `fee_rate` by evicting the cheapest
    /// entry, or refuse if the newcomer does not beat it.
    fn evict_for(&mut self, fee_rate: u64) -> Result<(), MempoolError> {
        let cheapest = self
            .entries
            .values()
            .min_by_key(|e| (e.fee_rate, std::cmp::Reverse(e.added_time)))
            .map(|e| (e.txid, e.fee_rate));
        match cheapest {
            Some((victim, floor)) if fee_rate > floor => {
                log::debug!("mempool full, evicting {} ({} sat/byte)", victim, floor);
                self.evict_cascade(victim);
                Ok(())
            }
            Some((_, floor)) => Err(MempoolError::PoolFull {
                rate: fee_rate,
                floor,
            }),
            None => Ok(()),
        }
    }

    /// Evict an entry together with every in-pool descendant chained on
    /// its outputs; without their parent those could never be mined.
    fn evict_cascade(&mut self, txid: TxId) {
        let mut queue = vec![txid];
        while let Some(victim) = queue.pop() {
            if let Some(entry) = self.remove(&victim) {
                for index in 0..entry.tx.outputs.len() as u32 {
                    if let Some(child) = self.by_outpoint.get(&OutPoint::new(victim, index)) {
                        queue.push(*child);
                    }
                }
            }
        }
    }

    /// Remove an entry and release its outpoint claims.
    pub fn remove(&mut self, txid: &TxId) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.inputs {
            if self.by_outpoint.get(&input.outpoint) == Some(txid) {
                self.by_outpoint.remove(&input.outpoint);
            }
        }
        Some(entry)
    }

    // -------------------------------------------------------------------------
    // Chain reconciliation
    // -------------------------------------------------------------------------

    /// Drop entries confirmed by a connected block, plus any entry that
    /// conflicts with an outpoint the block spent.
    pub fn on_block_connected(&mut self, block: &crate::core::block::Block) {
        for tx in &block.transactions {
            self.remove(&tx.txid());
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                if let Some(conflicting) = self.by_outpoint.get(&input.outpoint).copied() {
                    log::debug!(
                        "dropping {} conflicting with confirmed spend of {}",
                        conflicting,
                        input.outpoint
                    );
                    self.remove(&conflicting);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Template selection
    // -------------------------------------------------------------------------

    /// Pick transactions for a block template: highest fee rate first,
    /// each revalidated against an overlay so chained entries are only
    /// included after their parents. Returns the selection in a valid
    /// order with the total fees.
    pub fn select_for_block(
        &self,
        view: &impl UtxoView,
        tip_height: u64,
    ) -> (Vec<Transaction>, u64) {
        let mut candidates: Vec<&MempoolEntry> = self.entries.values().collect();
        candidates.sort_by(|a, b| b.fee_rate.cmp(&a.fee_rate).then(a.added_time.cmp(&b.added_time)));

        let budget = MAX_BLOCK_SIZE - 1_000;
        let height = tip_height + 1;
        let mut overlay = OverlayView::new(view);
        let mut selected = Vec::new();
        let mut total_fees = 0u64;
        let mut used = 0usize;

        // Two passes so a child skipped before its parent gets another chance
        for _ in 0..2 {
            for entry in &candidates {
                if selected.iter().any(|(txid, _)| *txid == entry.txid) {
                    continue;
                }
                if used + entry.size > budget {
                    continue;
                }
                if check_transaction(&entry.tx, &overlay, height).is_ok() {
                    overlay.connect(&entry.tx, height, false);
                    used += entry.size;
                    total_fees += entry.fee;
                    selected.push((entry.txid, entry.tx.clone()));
                }
            }
        }

        (selected.into_iter().map(|(_, tx)| tx).collect(), total_fees)
    }

    pub fn stats(&self) -> MempoolStats {
        let rates: Vec<u64> = self.entries.values().map(|e| e.fee_rate).collect();
        MempoolStats {
            tx_count: self.entries.len(),
            total_size: self.entries.values().map(|e| e.size).sum(),
            total_fees: self.entries.values().map(|e| e.fee).sum(),
            min_fee_rate: rates.iter().copied().min().unwrap_or(0),
            max_fee_rate: rates.iter().copied().max().unwrap_or(0),
        }
    }

    /// (fee, size) pairs for the fee estimator's congestion inputs.
    pub fn fee_data(&self) -> Vec<(u64, usize)> {
        self.entries.values().map(|e| (e.fee, e.size)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{Block, BlockHeader};
    use crate::core::transaction::{TxInput, TxOutput};
    use crate::core::utxo::UtxoSet;
    use crate::crypto::hash::{Hash256, PubKeyHash};
    use crate::crypto::keys::KeyPair;
    use crate::params::COINBASE_MATURITY;

    struct Harness {
        set: UtxoSet,
        keypair: KeyPair,
        outpoints: Vec<OutPoint>,
        tip_height: u64,
    }

    /// Confirmed set with several mature outputs owned by one key.
    fn harness(outputs: usize) -> Harness {
        let keypair = KeyPair::generate();
        let mut set = UtxoSet::new();
        let mut outpoints = Vec::new();
        for i in 0..outputs {
            let cb = Transaction::coinbase(
                i as u64,
                1_000_000,
                keypair.pubkey_hash(),
                &format!("funding {}", i),
            );
            let mut block = Block {
                header: BlockHeader {
                    version: 1,
                    previous_hash: Hash256::ZERO,
                    merkle_root: Hash256::ZERO,
                    timestamp: 0,
                    bits: 0x207f_ffff,
                    nonce: 0,
                },
                transactions: vec![cb.clone()],
            };
            block.header.merkle_root = block.compute_merkle_root();
            set.apply(&block, i as u64).unwrap();
            outpoints.push(OutPoint::new(cb.txid(), 0));
        }
        Harness {
            set,
            keypair,
            outpoints,
            tip_height: COINBASE_MATURITY + outputs as u64,
        }
    }

    fn spend(h: &Harness, outpoint: OutPoint, fee: u64) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxInput::new(outpoint)],
            vec![TxOutput::new(1_000_000 - fee, PubKeyHash([9u8; 20]))],
        );
        tx.sign(&h.keypair).unwrap();
        tx
    }

    #[test]
    fn test_accept_and_stats() {
        let h = harness(1);
        let mut pool = Mempool::default();
        let tx = spend(&h, h.outpoints[0], 1_000);
        let size = tx.size();

        let txid = pool.accept(tx, &h.set, h.tip_height).unwrap();
        assert!(pool.contains(&txid));

        let stats = pool.stats();
        assert_eq!(stats.tx_count, 1);
        assert_eq!(stats.total_fees, 1_000);
        assert_eq!(stats.total_size, size);
    }

    #[test]
    fn test_duplicate_rejected() {
        let h = harness(1);
        let mut pool = Mempool::default();
        let tx = spend(&h, h.outpoints[0], 1_000);
        pool.accept(tx.clone(), &h.set, h.tip_height).unwrap();
        assert!(matches!(
            pool.accept(tx, &h.set, h.tip_height),
            Err(MempoolError::Duplicate(_))
        ));
    }

    #[test]
    fn test_first_seen_wins() {
        let h = harness(1);
        let mut pool = Mempool::default();
        let first = spend(&h, h.outpoints[0], 1_000);
        let first_id = pool.accept(first, &h.set, h.tip_height).unwrap();

        // Same outpoint, much higher fee: still refused
        let rival = spend(&h, h.outpoints[0], 100_000);
        match pool.accept(rival, &h.set, h.tip_height) {
            Err(MempoolError::Conflict { existing, .. }) => assert_eq!(existing, first_id),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_invalid_transaction_rejected() {
        let h = harness(1);
        let mut pool = Mempool::default();
        let tx = spend(&h, OutPoint::new(crate::crypto::hash::sha256d(b"void"), 0), 1_000);
        assert!(matches!(
            pool.accept(tx, &h.set, h.tip_height),
            Err(MempoolError::Rejected(TxRejectReason::MissingInput))
        ));
    }

    #[test]
    fn test_zero_fee_rejected() {
        let h = harness(1);
        let mut pool = Mempool::default();
        let tx = spend(&h, h.outpoints[0], 0);
        assert!(matches!(
            pool.accept(tx, &h.set, h.tip_height),
            Err(MempoolError::FeeTooLow { .. })
        ));
    }

    #[test]
    fn test_coinbase_never_pooled() {
        let h = harness(1);
        let mut pool = Mempool::default();
        let cb = Transaction::coinbase(1, 100, PubKeyHash::ZERO, "");
        assert!(matches!(
            pool.accept(cb, &h.set, h.tip_height),
            Err(MempoolError::Rejected(TxRejectReason::BadStructure))
        ));
    }

    #[test]
    fn test_eviction_when_full() {
        let h = harness(3);
        let mut pool = Mempool::new(2);
        let cheap = spend(&h, h.outpoints[0], 300);
        let mid = spend(&h, h.outpoints[1], 5_000);
        let cheap_id = pool.accept(cheap, &h.set, h.tip_height).unwrap();
        pool.accept(mid, &h.set, h.tip_height).unwrap();

        // Richer transaction evicts the cheapest
        let rich = spend(&h, h.outpoints[2], 50_000);
        let rich_id = pool.accept(rich, &h.set, h.tip_height).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&cheap_id));
        assert!(pool.contains(&rich_id));
    }

    #[test]
    fn test_eviction_cascades_to_descendants() {
        let h = harness(2);
        let mut pool = Mempool::new(2);

        // Cheap parent re-locks to the harness key, child chains on it
        let mut parent = Transaction::new(
            vec![TxInput::new(h.outpoints[0])],
            vec![TxOutput::new(999_000, h.keypair.pubkey_hash())],
        );
        parent.sign(&h.keypair).unwrap();
        let mut child = Transaction::new(
            vec![TxInput::new(OutPoint::new(parent.txid(), 0))],
            vec![TxOutput::new(900_000, PubKeyHash([9u8; 20]))],
        );
        child.sign(&h.keypair).unwrap();
        pool.accept(parent.clone(), &h.set, h.tip_height).unwrap();
        pool.accept(child.clone(), &h.set, h.tip_height).unwrap();

        // Evicting the cheap parent takes its now-unminable child along
        let rich = spend(&h, h.outpoints[1], 50_000);
        let rich_id = pool.accept(rich, &h.set, h.tip_height).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&rich_id));
        assert!(!pool.contains(&parent.txid()));
        assert!(!pool.contains(&child.txid()));
    }

    #[test]
    fn test_full_pool_refuses_cheaper() {
        let h = harness(3);
        let mut pool = Mempool::new(2);
        pool.accept(spend(&h, h.outpoints[0], 5_000), &h.set, h.tip_height)
            .unwrap();
        pool.accept(spend(&h, h.outpoints[1], 5_000), &h.set, h.tip_height)
            .unwrap();

        let cheap = spend(&h, h.outpoints[2], 300);
        assert!(matches!(
            pool.accept(cheap, &h.set, h.tip_height),
            Err(MempoolError::PoolFull { .. })
        ));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_block_connection_clears_confirmed_and_conflicts() {
        let h = harness(2);
        let mut pool = Mempool::default();
        let confirmed = spend(&h, h.outpoints[0], 1_000);
        let conflicted = spend(&h, h.outpoints[1], 1_000);
        let confirmed_id = pool.accept(confirmed.clone(), &h.set, h.tip_height).unwrap();
        let conflicted_id = pool.accept(conflicted, &h.set, h.tip_height).unwrap();

        // The block confirms `confirmed` and spends the other outpoint
        // through a different transaction
        let rival = spend(&h, h.outpoints[1], 2_000);
        let mut block = Block {
            header: BlockHeader {
                version: 1,
                previous_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                timestamp: 0,
                bits: 0x207f_ffff,
                nonce: 0,
            },
            transactions: vec![
                Transaction::coinbase(h.tip_height + 1, 100, PubKeyHash::ZERO, ""),
                confirmed,
                rival,
            ],
        };
        block.header.merkle_root = block.compute_merkle_root();

        pool.on_block_connected(&block);
        assert!(!pool.contains(&confirmed_id));
        assert!(!pool.contains(&conflicted_id));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_selection_orders_by_fee_rate_and_respects_chains() {
        let h = harness(2);
        let mut pool = Mempool::default();

        // A chain: parent re-locks to the harness key, child spends it
        let mut parent = Transaction::new(
            vec![TxInput::new(h.outpoints[0])],
            vec![TxOutput::new(990_000, h.keypair.pubkey_hash())],
        );
        parent.sign(&h.keypair).unwrap();
        let mut child = Transaction::new(
            vec![TxInput::new(OutPoint::new(parent.txid(), 0))],
            vec![TxOutput::new(900_000, PubKeyHash([9u8; 20]))],
        );
        child.sign(&h.keypair).unwrap();
        let plain = spend(&h, h.outpoints[1], 2_000);

        // A child arriving before its parent has no resolvable input
        assert!(matches!(
            pool.accept(child.clone(), &h.set, h.tip_height),
            Err(MempoolError::Rejected(TxRejectReason::MissingInput))
        ));
        pool.accept(parent.clone(), &h.set, h.tip_height).unwrap();
        pool.accept(child.clone(), &h.set, h.tip_height).unwrap();
        pool.accept(plain.clone(), &h.set, h.tip_height).unwrap();

        let (selected, fees) = pool.select_for_block(&h.set, h.tip_height);
        assert_eq!(selected.len(), 3);
        assert_eq!(fees, 10_000 + 90_000 + 2_000);
        // The parent must precede the child in the selection
        let ids: Vec<TxId> = selected.iter().map(|t| t.txid()).collect();
        let parent_pos = ids.iter().position(|id| *id == parent.txid()).unwrap();
        let child_pos = ids.iter().position(|id| *id == child.txid()).unwrap();
        assert!(parent_pos < child_pos);
    }

    #[test]
    fn test_remove_releases_outpoints() {
        let h = harness(1);
        let mut pool = Mempool::default();
        let tx = spend(&h, h.outpoints[0], 1_000);
        let txid = pool.accept(tx, &h.set, h.tip_height).unwrap();
        pool.remove(&txid);

        // The outpoint is free again
        let again = spend(&h, h.outpoints[0], 2_000);
        pool.accept(again, &h.set, h.tip_height).unwrap();
    }
}
