//! Core data model and validation
//!
//! Canonical encodings, transactions, blocks, the UTXO set and the
//! transaction validator.

pub mod block;
pub mod encode;
pub mod transaction;
pub mod utxo;
pub mod validator;

pub use block::{Block, BlockHeader};
pub use encode::{DecodeError, Reader};
pub use transaction::{OutPoint, Transaction, TransactionError, TxInput, TxOutput};
pub use utxo::{BlockUndo, OverlayView, Utxo, UtxoError, UtxoSet, UtxoView};
pub use validator::{
    check_block_body, check_transaction, BlockBodyError, BodyCheck, TxRejectReason,
};
