//! Fee estimation
//!
//! Three-tier recommendations derived from recently confirmed fee rates
//! and current mempool congestion. The base rate is the median confirmed
//! rate over the lookback window, floored by the minimum relay rate
//! scaled with a congestion factor; tiers multiply the base and clamp
//! into the protocol's rate bounds.

use crate::params::{
    FEE_LOOKBACK_BLOCKS, MAX_BLOCK_SIZE, MAX_FEE_RATE, MIN_FEE_RATE, MIN_TX_FEE, TYPICAL_TX_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Mempool size where congestion starts to bite
const BASELINE_MEMPOOL_TXS: usize = 100;

/// Block fill fraction above which fullness adds congestion
const FILL_PRESSURE_THRESHOLD: f64 = 0.8;

/// Priority tier for a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePriority {
    Fast,
    Normal,
    Economy,
}

impl FeePriority {
    fn multiplier(&self) -> f64 {
        match self {
            FeePriority::Fast => 2.0,
            FeePriority::Normal => 1.0,
            FeePriority::Economy => 0.5,
        }
    }

    /// Rough confirmation target in blocks
    pub fn target_blocks(&self) -> u32 {
        match self {
            FeePriority::Fast => 1,
            FeePriority::Normal => 3,
            FeePriority::Economy => 10,
        }
    }
}

/// One tier's recommendation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// Satoshis per byte
    pub fee_rate: u64,
    /// Absolute fee for a typical transaction, floored at the protocol
    /// minimum
    pub estimated_fee: u64,
    pub target_blocks: u32,
}

/// The full three-tier answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEstimates {
    pub fast: FeeEstimate,
    pub normal: FeeEstimate,
    pub economy: FeeEstimate,
    /// Congestion factor that shaped these numbers
    pub congestion: f64,
}

/// Confirmed fee observations from one block
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlockFeeRecord {
    height: u64,
    /// Fee rates of the block's non-coinbase transactions
    rates: Vec<u64>,
    /// Serialized size over the block size limit
    fill: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeEstimator {
    recent: VecDeque<BlockFeeRecord>,
    mempool_txs: usize,
}

impl FeeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block that joined the main chain.
    pub fn record_block(&mut self, height: u64, tx_fees: &[(u64, usize)], block_size: usize) {
        let rates = tx_fees
            .iter()
            .map(|(fee, size)| fee / (*size).max(1) as u64)
            .collect();
        self.recent.push_back(BlockFeeRecord {
            height,
            rates,
            fill: block_size as f64 / MAX_BLOCK_SIZE as f64,
        });
        while self.recent.len() > FEE_LOOKBACK_BLOCKS {
            self.recent.pop_front();
        }
    }

    /// Keep the congestion inputs current.
    pub fn set_mempool_size(&mut self, txs: usize) {
        self.mempool_txs = txs;
    }

    /// Blocks observed so far, for monitoring.
    pub fn observed_blocks(&self) -> usize {
        self.recent.len()
    }

    fn congestion_factor(&self) -> f64 {
        let mut factor = 1.0;
        if self.mempool_txs > BASELINE_MEMPOOL_TXS {
            factor += (self.mempool_txs - BASELINE_MEMPOOL_TXS) as f64
                / BASELINE_MEMPOOL_TXS as f64;
        }
        if !self.recent.is_empty() {
            let avg_fill: f64 =
                self.recent.iter().map(|r| r.fill).sum::<f64>() / self.recent.len() as f64;
            if avg_fill > FILL_PRESSURE_THRESHOLD {
                factor += (avg_fill - FILL_PRESSURE_THRESHOLD) * 5.0;
            }
        }
        factor
    }

    fn median_confirmed_rate(&self) -> Option<u64> {
        let mut rates: Vec<u64> = self.recent.iter().flat_map(|r| r.rates.iter().copied()).collect();
        if rates.is_empty() {
            return None;
        }
        rates.sort_unstable();
        Some(rates[rates.len() / 2])
    }

    fn base_rate(&self) -> (f64, f64) {
        let congestion = self.congestion_factor();
        let floor = MIN_FEE_RATE as f64 * congestion;
        let base = match self.median_confirmed_rate() {
            Some(median) => (median as f64).max(floor),
            None => floor,
        };
        (base, congestion)
    }

    fn tier(&self, base: f64, priority: FeePriority) -> FeeEstimate {
        let rate = (base * priority.multiplier())
            .round()
            .clamp(MIN_FEE_RATE as f64, MAX_FEE_RATE as f64) as u64;
        FeeEstimate {
            fee_rate: rate,
            estimated_fee: (rate * TYPICAL_TX_SIZE as u64).max(MIN_TX_FEE),
            target_blocks: priority.target_blocks(),
        }
    }

    /// Current recommendations for all three tiers.
    pub fn estimates(&self) -> FeeEstimates {
        let (base, congestion) = self.base_rate();
        FeeEstimates {
            fast: self.tier(base, FeePriority::Fast),
            normal: self.tier(base, FeePriority::Normal),
            economy: self.tier(base, FeePriority::Economy),
            congestion,
        }
    }
}
