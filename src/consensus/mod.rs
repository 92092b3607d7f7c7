//! Consensus: difficulty, block storage and the chain engine

pub mod difficulty;
pub mod engine;
pub mod store;

pub use difficulty::{bits_to_target, block_work, meets_target, next_required_bits, solve, U256};
pub use engine::{
    unix_time, BlockAccepted, BlockStatus, ChainState, ConnectedBlock, ConsensusEngine,
    ConsensusError, HeaderError,
};
pub use store::{BlockEntry, ChainStore};
