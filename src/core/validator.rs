//! Stateless and contextual transaction validation
//!
//! `check_transaction` validates a single non-coinbase transaction
//! against a UTXO view for inclusion at a given height and returns its
//! fee. `check_block_body` runs the full body check for a block:
//! coinbase placement, merkle commitment, per-transaction rules with
//! in-block chaining, and the coinbase value bound.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::core::utxo::{OverlayView, UtxoView};
use crate::crypto::hash::{hash160, TxId};
use crate::crypto::keys::verify_signature;
use crate::params::{block_subsidy, MAX_BLOCK_SIZE, MAX_TX_SIZE};
use std::collections::HashSet;
use thiserror::Error;

/// Why a transaction was rejected. These reason strings cross the node
/// boundary unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxRejectReason {
    #[error("missing-input")]
    MissingInput,
    #[error("already-spent")]
    AlreadySpent,
    #[error("bad-signature")]
    BadSignature,
    #[error("value-overflow")]
    ValueOverflow,
    #[error("immature-coinbase-spend")]
    ImmatureCoinbaseSpend,
    #[error("excess-coinbase")]
    ExcessCoinbase,
    #[error("bad-structure")]
    BadStructure,
}

/// Why a block body failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockBodyError {
    #[error("block exceeds maximum size")]
    OversizedBlock,
    #[error("block has no transactions")]
    EmptyBlock,
    #[error("first transaction is not a coinbase")]
    MissingCoinbase,
    #[error("coinbase outside the first position")]
    MisplacedCoinbase,
    #[error("merkle root does not commit to the block body")]
    MerkleMismatch,
    #[error("coinbase claims more than subsidy plus fees")]
    ExcessCoinbase,
    #[error("transaction {txid} rejected: {reason}")]
    Transaction { txid: TxId, reason: TxRejectReason },
}

/// Per-transaction fee data gathered during body validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyCheck {
    pub total_fees: u64,
    /// (fee, size) for every non-coinbase transaction, in block order
    pub tx_fees: Vec<(u64, usize)>,
}

// =============================================================================
// Single transaction
// =============================================================================

/// Validate a non-coinbase transaction for inclusion at `height` against
/// the given view. Returns the transaction fee.
pub fn check_transaction(
    tx: &Transaction,
    view: &impl UtxoView,
    height: u64,
) -> Result<u64, TxRejectReason> {
    if tx.is_coinbase() || tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TxRejectReason::BadStructure);
    }
    if tx.size() > MAX_TX_SIZE {
        return Err(TxRejectReason::BadStructure);
    }

    // Duplicate outpoints within one transaction are a self-double-spend
    let mut seen = HashSet::new();
    for input in &tx.inputs {
        if !seen.insert(input.outpoint) {
            return Err(TxRejectReason::AlreadySpent);
        }
    }

    let digest = *tx.sighash().as_bytes();
    let mut input_total: u64 = 0;
    for input in &tx.inputs {
        let utxo = match view.get_utxo(&input.outpoint) {
            Some(utxo) => utxo,
            None if view.is_spent(&input.outpoint) => {
                return Err(TxRejectReason::AlreadySpent)
            }
            None => return Err(TxRejectReason::MissingInput),
        };

        if !utxo.is_mature(height) {
            return Err(TxRejectReason::ImmatureCoinbaseSpend);
        }

        // Ownership: public key must hash to the locking hash and the
        // signature must verify over the signing digest
        if hash160(&input.public_key) != utxo.pubkey_hash {
            return Err(TxRejectReason::BadSignature);
        }
        if !verify_signature(&input.public_key, &digest, &input.signature) {
            return Err(TxRejectReason::BadSignature);
        }

        input_total = input_total
            .checked_add(utxo.amount)
            .ok_or(TxRejectReason::ValueOverflow)?;
    }

    let output_total = tx.total_output().ok_or(TxRejectReason::ValueOverflow)?;
    if output_total > input_total {
        return Err(TxRejectReason::ValueOverflow);
    }

    Ok(input_total - output_total)
}

// =============================================================================
// Block body
// =============================================================================

/// Validate a block body against the parent chain state's view. The
/// header is assumed already validated; `height` is the block's height.
pub fn check_block_body(
    block: &Block,
    parent_view: &impl UtxoView,
    height: u64,
) -> Result<BodyCheck, BlockBodyError> {
    if block.size() > MAX_BLOCK_SIZE {
        return Err(BlockBodyError::OversizedBlock);
    }
    if block.transactions.is_empty() {
        return Err(BlockBodyError::EmptyBlock);
    }
    if !block.transactions[0].is_coinbase() {
        return Err(BlockBodyError::MissingCoinbase);
    }
    if block.compute_merkle_root() != block.header.merkle_root {
        return Err(BlockBodyError::MerkleMismatch);
    }

    let coinbase = &block.transactions[0];
    if coinbase.outputs.is_empty() {
        return Err(BlockBodyError::Transaction {
            txid: coinbase.txid(),
            reason: TxRejectReason::BadStructure,
        });
    }

    let mut overlay = OverlayView::new(parent_view);
    overlay.connect(coinbase, height, true);

    let mut check = BodyCheck::default();
    for tx in &block.transactions[1..] {
        if tx.is_coinbase() {
            return Err(BlockBodyError::MisplacedCoinbase);
        }
        let fee = check_transaction(tx, &overlay, height).map_err(|reason| {
            BlockBodyError::Transaction {
                txid: tx.txid(),
                reason,
            }
        })?;
        check.total_fees = check.total_fees.checked_add(fee).ok_or(
            BlockBodyError::Transaction {
                txid: tx.txid(),
                reason: TxRejectReason::ValueOverflow,
            },
        )?;
        check.tx_fees.push((fee, tx.size()));
        overlay.connect(tx, height, false);
    }

    // Coinbase may claim at most subsidy plus collected fees
    let allowed = block_subsidy(height)
        .checked_add(check.total_fees)
        .ok_or(BlockBodyError::ExcessCoinbase)?;
    let claimed = coinbase
        .total_output()
        .ok_or(BlockBodyError::ExcessCoinbase)?;
    if claimed > allowed {
        return Err(BlockBodyError::ExcessCoinbase);
    }

    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{Block, BlockHeader};
    use crate::core::transaction::{OutPoint, TxInput, TxOutput};
    use crate::core::utxo::UtxoSet;
    use crate::crypto::hash::{sha256d, Hash256, PubKeyHash};
    use crate::crypto::keys::KeyPair;
    use crate::params::{block_subsidy, COINBASE_MATURITY};

    struct Fixture {
        set: UtxoSet,
        keypair: KeyPair,
        funding: OutPoint,
    }

    /// A UTXO set holding one mature coinbase output of 1000 owned by
    /// the fixture key, created at height 0.
    fn fixture() -> Fixture {
        let keypair = KeyPair::generate();
        let mut set = UtxoSet::new();
        let cb = Transaction::coinbase(0, 1_000, keypair.pubkey_hash(), "");
        let block = body(vec![cb.clone()]);
        set.apply(&block, 0).unwrap();
        Fixture {
            set,
            funding: OutPoint::new(cb.txid(), 0),
            keypair,
        }
    }

    fn body(transactions: Vec<Transaction>) -> Block {
        let mut block = Block {
            header: BlockHeader {
                version: 1,
                previous_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                timestamp: 0,
                bits: 0x207f_ffff,
                nonce: 0,
            },
            transactions,
        };
        block.header.merkle_root = block.compute_merkle_root();
        block
    }

    fn spend(fx: &Fixture, amount: u64) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxInput::new(fx.funding)],
            vec![TxOutput::new(amount, PubKeyHash([9u8; 20]))],
        );
        tx.sign(&fx.keypair).unwrap();
        tx
    }

    const SPEND_HEIGHT: u64 = COINBASE_MATURITY;

    #[test]
    fn test_valid_spend_returns_fee() {
        let fx = fixture();
        let tx = spend(&fx, 900);
        let fee = check_transaction(&tx, &fx.set, SPEND_HEIGHT).unwrap();
        assert_eq!(fee, 100);
    }

    #[test]
    fn test_missing_input() {
        let fx = fixture();
        let mut tx = Transaction::new(
            vec![TxInput::new(OutPoint::new(sha256d(b"void"), 0))],
            vec![TxOutput::new(1, PubKeyHash::ZERO)],
        );
        tx.sign(&fx.keypair).unwrap();
        assert_eq!(
            check_transaction(&tx, &fx.set, SPEND_HEIGHT),
            Err(TxRejectReason::MissingInput)
        );
    }

    #[test]
    fn test_immature_coinbase_spend() {
        let fx = fixture();
        let tx = spend(&fx, 900);
        assert_eq!(
            check_transaction(&tx, &fx.set, COINBASE_MATURITY - 1),
            Err(TxRejectReason::ImmatureCoinbaseSpend)
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let fx = fixture();
        let mut tx = Transaction::new(
            vec![TxInput::new(fx.funding)],
            vec![TxOutput::new(900, PubKeyHash([9u8; 20]))],
        );
        tx.sign(&KeyPair::generate()).unwrap();
        assert_eq!(
            check_transaction(&tx, &fx.set, SPEND_HEIGHT),
            Err(TxRejectReason::BadSignature)
        );
    }

    #[test]
    fn test_tampered_output_invalidates_signature() {
        let fx = fixture();
        let mut tx = spend(&fx, 900);
        tx.outputs[0].amount = 1;
        assert_eq!(
            check_transaction(&tx, &fx.set, SPEND_HEIGHT),
            Err(TxRejectReason::BadSignature)
        );
    }

    #[test]
    fn test_outputs_exceeding_inputs() {
        let fx = fixture();
        let tx = spend(&fx, 1_001);
        assert_eq!(
            check_transaction(&tx, &fx.set, SPEND_HEIGHT),
            Err(TxRejectReason::ValueOverflow)
        );
    }

    #[test]
    fn test_duplicate_input_in_one_tx() {
        let fx = fixture();
        let mut tx = Transaction::new(
            vec![TxInput::new(fx.funding), TxInput::new(fx.funding)],
            vec![TxOutput::new(100, PubKeyHash::ZERO)],
        );
        tx.sign(&fx.keypair).unwrap();
        assert_eq!(
            check_transaction(&tx, &fx.set, SPEND_HEIGHT),
            Err(TxRejectReason::AlreadySpent)
        );
    }

    #[test]
    fn test_body_valid_block() {
        let fx = fixture();
        let tx = spend(&fx, 900);
        let coinbase = Transaction::coinbase(
            SPEND_HEIGHT,
            block_subsidy(SPEND_HEIGHT) + 100,
            PubKeyHash([1u8; 20]),
            "",
        );
        let block = body(vec![coinbase, tx]);

        let check = check_block_body(&block, &fx.set, SPEND_HEIGHT).unwrap();
        assert_eq!(check.total_fees, 100);
        assert_eq!(check.tx_fees.len(), 1);
    }

    #[test]
    fn test_body_in_block_double_spend() {
        let fx = fixture();
        let first = spend(&fx, 900);
        let mut second = Transaction::new(
            vec![TxInput::new(fx.funding)],
            vec![TxOutput::new(800, PubKeyHash([8u8; 20]))],
        );
        second.sign(&fx.keypair).unwrap();
        let coinbase =
            Transaction::coinbase(SPEND_HEIGHT, block_subsidy(SPEND_HEIGHT), PubKeyHash::ZERO, "");
        let block = body(vec![coinbase, first, second]);

        match check_block_body(&block, &fx.set, SPEND_HEIGHT) {
            Err(BlockBodyError::Transaction { reason, .. }) => {
                assert_eq!(reason, TxRejectReason::AlreadySpent)
            }
            other => panic!("expected already-spent, got {:?}", other),
        }
    }

    #[test]
    fn test_body_in_block_chaining_is_valid() {
        let fx = fixture();
        // First spend re-locks to the fixture key so the second can spend it
        let mut first = Transaction::new(
            vec![TxInput::new(fx.funding)],
            vec![TxOutput::new(900, fx.keypair.pubkey_hash())],
        );
        first.sign(&fx.keypair).unwrap();
        let mut second = Transaction::new(
            vec![TxInput::new(OutPoint::new(first.txid(), 0))],
            vec![TxOutput::new(800, PubKeyHash([8u8; 20]))],
        );
        second.sign(&fx.keypair).unwrap();

        let coinbase = Transaction::coinbase(
            SPEND_HEIGHT,
            block_subsidy(SPEND_HEIGHT) + 200,
            PubKeyHash::ZERO,
            "",
        );
        let block = body(vec![coinbase, first, second]);
        let check = check_block_body(&block, &fx.set, SPEND_HEIGHT).unwrap();
        assert_eq!(check.total_fees, 200);
    }

    #[test]
    fn test_body_excess_coinbase() {
        let fx = fixture();
        let coinbase = Transaction::coinbase(
            SPEND_HEIGHT,
            block_subsidy(SPEND_HEIGHT) + 1,
            PubKeyHash::ZERO,
            "",
        );
        let block = body(vec![coinbase]);
        assert_eq!(
            check_block_body(&block, &fx.set, SPEND_HEIGHT),
            Err(BlockBodyError::ExcessCoinbase)
        );
    }

    #[test]
    fn test_body_missing_coinbase() {
        let fx = fixture();
        let tx = spend(&fx, 900);
        let block = body(vec![tx]);
        assert_eq!(
            check_block_body(&block, &fx.set, SPEND_HEIGHT),
            Err(BlockBodyError::MissingCoinbase)
        );
    }

    #[test]
    fn test_body_second_coinbase_rejected() {
        let fx = fixture();
        let cb1 = Transaction::coinbase(SPEND_HEIGHT, block_subsidy(SPEND_HEIGHT), PubKeyHash::ZERO, "a");
        let cb2 = Transaction::coinbase(SPEND_HEIGHT, 1, PubKeyHash::ZERO, "b");
        let block = body(vec![cb1, cb2]);
        assert_eq!(
            check_block_body(&block, &fx.set, SPEND_HEIGHT),
            Err(BlockBodyError::MisplacedCoinbase)
        );
    }

    #[test]
    fn test_body_merkle_mismatch() {
        let fx = fixture();
        let coinbase =
            Transaction::coinbase(SPEND_HEIGHT, block_subsidy(SPEND_HEIGHT), PubKeyHash::ZERO, "");
        let mut block = body(vec![coinbase]);
        block.header.merkle_root = sha256d(b"wrong");
        assert_eq!(
            check_block_body(&block, &fx.set, SPEND_HEIGHT),
            Err(BlockBodyError::MerkleMismatch)
        );
    }
}
