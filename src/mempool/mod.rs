//! Unconfirmed transactions and fee estimation

pub mod fee;
pub mod pool;

pub use fee::{FeeEstimate, FeeEstimates, FeeEstimator, FeePriority};
pub use pool::{Mempool, MempoolEntry, MempoolError, MempoolStats, DEFAULT_MAX_MEMPOOL_SIZE};
