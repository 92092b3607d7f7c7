//! Consensus parameters for the Salocoin networks
//!
//! One canonical parameter set per network. Everything here is fixed at
//! compile time; nothing is runtime-configurable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Monetary constants
// =============================================================================

/// Satoshis per SALO (8 decimal places)
pub const COIN: u64 = 100_000_000;

/// Maximum documented supply: 39,000,000 SALO
pub const MAX_SUPPLY: u64 = 39_000_000 * COIN;

/// Initial block reward: 100 SALO
pub const INITIAL_BLOCK_REWARD: u64 = 100 * COIN;

/// Tail reward floor: 0.1 SALO. Emission never fully stops.
pub const MIN_BLOCK_REWARD: u64 = COIN / 10;

/// Halving every 210,000 blocks
pub const HALVING_INTERVAL: u64 = 210_000;

// =============================================================================
// Block and timestamp rules
// =============================================================================

/// Target block interval in seconds
pub const BLOCK_TIME_TARGET: u64 = 150;

/// Confirmations before a coinbase output may be spent
pub const COINBASE_MATURITY: u64 = 100;

/// Deepest reorganization the node will perform
pub const MAX_REORG_DEPTH: u64 = 100;

/// Number of blocks in the median-time-past window
pub const MTP_BLOCK_COUNT: usize = 11;

/// Maximum allowed block timestamp drift into the future (seconds)
pub const MAX_FUTURE_BLOCK_TIME: u64 = 7200;

/// Maximum serialized block size in bytes
pub const MAX_BLOCK_SIZE: usize = 2_000_000;

/// Maximum serialized transaction size in bytes
pub const MAX_TX_SIZE: usize = 100_000;

// =============================================================================
// Difficulty (Dark Gravity Wave, recomputed every block)
// =============================================================================

/// Number of past blocks in the retarget window
pub const DGW_PAST_BLOCKS: usize = 24;

/// Per-step retarget bound: at most a 2x easing or halving
pub const MAX_DIFFICULTY_ADJUSTMENT: u64 = 2;

/// Seconds without a block before emergency easing kicks in
pub const EMERGENCY_DIFFICULTY_THRESHOLD: u64 = BLOCK_TIME_TARGET * 4;

/// Target multiplier per full emergency period
pub const EMERGENCY_DIFFICULTY_REDUCTION: u64 = 2;

// =============================================================================
// Fees
// =============================================================================

/// Minimum relay fee rate (satoshis per byte)
pub const MIN_FEE_RATE: u64 = 1;

/// Maximum fee rate the estimator will ever recommend (satoshis per byte)
pub const MAX_FEE_RATE: u64 = 1000;

/// Absolute protocol minimum fee in satoshis
pub const MIN_TX_FEE: u64 = 250;

/// Typical transaction size used for absolute fee recommendations
pub const TYPICAL_TX_SIZE: usize = 250;

/// Blocks of history the fee estimator looks back over
pub const FEE_LOOKBACK_BLOCKS: usize = 10;

// =============================================================================
// Genesis
// =============================================================================

/// Genesis block timestamp (January 11, 2026)
pub const GENESIS_TIMESTAMP: u32 = 1_768_147_700;

/// Message embedded in the genesis coinbase
pub const GENESIS_MESSAGE: &str = "SALOCOIN v2.0 - Fresh Start January 2026";

// =============================================================================
// Networks
// =============================================================================

/// Which chain this node follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Compact bits of the easiest allowed target. Also the genesis bits.
    pub fn pow_limit_bits(&self) -> u32 {
        match self {
            Network::Mainnet => 0x1e0f_ffff,
            Network::Testnet => 0x1e0f_ffff,
            // Effectively trivial PoW so tests can mine real blocks
            Network::Regtest => 0x207f_ffff,
        }
    }

    /// Whether difficulty retargets. Regtest keeps the fixed trivial
    /// target so tests can mine at full speed.
    pub fn retargets(&self) -> bool {
        !matches!(self, Network::Regtest)
    }

    /// Base58Check version byte for P2PKH addresses ('S' prefix on mainnet)
    pub fn address_version(&self) -> u8 {
        match self {
            Network::Mainnet => 63,
            Network::Testnet | Network::Regtest => 111,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

/// Block subsidy at a given height: standard halving with a tail floor.
pub fn block_subsidy(height: u64) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return MIN_BLOCK_REWARD;
    }
    (INITIAL_BLOCK_REWARD >> halvings).max(MIN_BLOCK_REWARD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsidy_schedule() {
        assert_eq!(block_subsidy(0), 100 * COIN);
        assert_eq!(block_subsidy(209_999), 100 * COIN);
        assert_eq!(block_subsidy(210_000), 50 * COIN);
        assert_eq!(block_subsidy(419_999), 50 * COIN);
        assert_eq!(block_subsidy(420_000), 25 * COIN);
    }

    #[test]
    fn test_subsidy_floor() {
        // After enough halvings the tail floor takes over
        assert_eq!(block_subsidy(210_000 * 12), MIN_BLOCK_REWARD);
        assert_eq!(block_subsidy(u64::MAX), MIN_BLOCK_REWARD);
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("regtest".parse::<Network>().unwrap(), Network::Regtest);
        assert!("bogus".parse::<Network>().is_err());
    }
}
