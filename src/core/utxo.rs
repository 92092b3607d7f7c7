//! UTXO set with undo-based rollback
//!
//! The authoritative spendable-output map for the best chain. Applying a
//! block is atomic: all inputs are resolved in a read pass before any
//! write happens, and the consumed entries are captured in a `BlockUndo`
//! so the block can later be disconnected exactly.

use crate::core::block::Block;
use crate::core::transaction::{OutPoint, Transaction};
use crate::crypto::hash::PubKeyHash;
use crate::params::COINBASE_MATURITY;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Internal-consistency errors while mutating the set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UtxoError {
    #[error("input {0} not found in UTXO set")]
    MissingUtxo(OutPoint),
    #[error("input {0} spent twice within a block")]
    DoubleSpend(OutPoint),
}

// =============================================================================
// Utxo
// =============================================================================

/// A single unspent output plus the context needed for validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub amount: u64,
    pub pubkey_hash: PubKeyHash,
    /// Height of the block that created this output
    pub height: u64,
    pub is_coinbase: bool,
}

impl Utxo {
    /// Whether this output may be spent by a block at `spend_height`.
    /// Coinbase outputs need 100 confirmations first.
    pub fn is_mature(&self, spend_height: u64) -> bool {
        !self.is_coinbase || spend_height >= self.height + COINBASE_MATURITY
    }
}

/// Read access to unspent outputs. Implemented by the confirmed set and
/// by overlays that track in-flight spends on top of it.
pub trait UtxoView {
    fn get_utxo(&self, outpoint: &OutPoint) -> Option<Utxo>;

    /// True when the view knows the outpoint was consumed by something
    /// not yet in the base set. Lets validation distinguish a double
    /// spend from an output that never existed.
    fn is_spent(&self, _outpoint: &OutPoint) -> bool {
        false
    }
}

// =============================================================================
// BlockUndo
// =============================================================================

/// Everything needed to disconnect one block: the UTXOs it consumed from
/// the prior set. Outputs both created and spent inside the same block
/// net out and are not recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockUndo {
    pub spent: Vec<(OutPoint, Utxo)>,
}

// =============================================================================
// UtxoSet
// =============================================================================

/// The confirmed UTXO set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, Utxo>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    /// Total value of all unspent outputs
    pub fn total_value(&self) -> u64 {
        self.utxos.values().map(|u| u.amount).sum()
    }

    /// Apply a fully validated block at `height`. Either every spend and
    /// every new output lands, or the set is untouched and an error
    /// comes back with the offending outpoint.
    pub fn apply(&mut self, block: &Block, height: u64) -> Result<BlockUndo, UtxoError> {
        // Read pass: resolve all inputs against the set and against
        // outputs created earlier in this same block.
        let mut created: HashMap<OutPoint, Utxo> = HashMap::new();
        let mut consumed: Vec<(OutPoint, Utxo)> = Vec::new();
        let mut seen: HashSet<OutPoint> = HashSet::new();

        for (index, tx) in block.transactions.iter().enumerate() {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let outpoint = input.outpoint;
                    if !seen.insert(outpoint) {
                        return Err(UtxoError::DoubleSpend(outpoint));
                    }
                    if created.remove(&outpoint).is_some() {
                        // Spent an output created earlier in this block
                        continue;
                    }
                    match self.utxos.get(&outpoint) {
                        Some(utxo) => consumed.push((outpoint, *utxo)),
                        None => return Err(UtxoError::MissingUtxo(outpoint)),
                    }
                }
            }
            let txid = tx.txid();
            for (vout, output) in tx.outputs.iter().enumerate() {
                created.insert(
                    OutPoint::new(txid, vout as u32),
                    Utxo {
                        amount: output.amount,
                        pubkey_hash: output.pubkey_hash,
                        height,
                        is_coinbase: index == 0,
                    },
                );
            }
        }

        // Write pass: cannot fail
        for (outpoint, _) in &consumed {
            self.utxos.remove(outpoint);
        }
        for (outpoint, utxo) in created {
            self.utxos.insert(outpoint, utxo);
        }

        Ok(BlockUndo { spent: consumed })
    }

    /// Disconnect a block previously applied with `apply`, restoring the
    /// set to its prior state.
    pub fn rollback(&mut self, block: &Block, undo: &BlockUndo) -> Result<(), UtxoError> {
        for tx in &block.transactions {
            let txid = tx.txid();
            for vout in 0..block_outputs(tx) {
                // In-block-spent outputs are simply absent already
                self.utxos.remove(&OutPoint::new(txid, vout));
            }
        }
        for (outpoint, utxo) in &undo.spent {
            self.utxos.insert(*outpoint, *utxo);
        }
        Ok(())
    }

    /// Spendable balance of a locking hash as of `current_height`,
    /// counting only mature outputs.
    pub fn balance(&self, pubkey_hash: &PubKeyHash, current_height: u64) -> u64 {
        self.utxos
            .values()
            .filter(|u| u.pubkey_hash == *pubkey_hash && u.is_mature(current_height + 1))
            .map(|u| u.amount)
            .sum()
    }

    /// All outputs locked to a hash, mature or not.
    pub fn outputs_for(&self, pubkey_hash: &PubKeyHash) -> Vec<(OutPoint, Utxo)> {
        let mut found: Vec<_> = self
            .utxos
            .iter()
            .filter(|(_, u)| u.pubkey_hash == *pubkey_hash)
            .map(|(op, u)| (*op, *u))
            .collect();
        found.sort_by_key(|(op, _)| *op);
        found
    }
}

fn block_outputs(tx: &Transaction) -> u32 {
    tx.outputs.len() as u32
}

impl UtxoView for UtxoSet {
    fn get_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.get(outpoint).copied()
    }
}

// =============================================================================
// OverlayView
// =============================================================================

/// A view layered over a base view, tracking outputs created and spent
/// by transactions that are not yet in the base. Used for in-block
/// chaining during validation and for block template assembly.
pub struct OverlayView<'a, V: UtxoView> {
    base: &'a V,
    created: HashMap<OutPoint, Utxo>,
    spent: HashSet<OutPoint>,
}

impl<'a, V: UtxoView> OverlayView<'a, V> {
    pub fn new(base: &'a V) -> Self {
        OverlayView {
            base,
            created: HashMap::new(),
            spent: HashSet::new(),
        }
    }

    /// Record a validated transaction's effects in the overlay.
    pub fn connect(&mut self, tx: &Transaction, height: u64, is_coinbase: bool) {
        if !is_coinbase {
            for input in &tx.inputs {
                self.created.remove(&input.outpoint);
                self.spent.insert(input.outpoint);
            }
        }
        let txid = tx.txid();
        for (vout, output) in tx.outputs.iter().enumerate() {
            self.created.insert(
                OutPoint::new(txid, vout as u32),
                Utxo {
                    amount: output.amount,
                    pubkey_hash: output.pubkey_hash,
                    height,
                    is_coinbase,
                },
            );
        }
    }
}

impl<'a, V: UtxoView> UtxoView for OverlayView<'a, V> {
    fn get_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        if self.spent.contains(outpoint) {
            return None;
        }
        if let Some(utxo) = self.created.get(outpoint) {
            return Some(*utxo);
        }
        self.base.get_utxo(outpoint)
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains(outpoint) || self.base.is_spent(outpoint)
    }
}
