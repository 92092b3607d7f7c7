//! Top-level error type for the node facade

use crate::consensus::engine::ConsensusError;
use crate::core::encode::DecodeError;
use crate::crypto::keys::KeyError;
use crate::mempool::pool::MempoolError;
use crate::storage::StorageError;
use thiserror::Error;

/// Everything that can go wrong at the node boundary
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("malformed encoding: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("unknown block or transaction: {0}")]
    NotFound(String),
    #[error("no valid nonce found within {0} attempts")]
    MiningFailed(u64),
}

pub type Result<T> = std::result::Result<T, NodeError>;
