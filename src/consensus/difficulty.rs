//! Difficulty targets, work arithmetic and the retarget rule
//!
//! Targets travel in the 32-bit compact "bits" form: one exponent byte
//! and a 23-bit mantissa. The retarget rule is a Dark-Gravity-Wave
//! style rolling average recomputed every block over a 24-block window,
//! with the measured timespan clamped to half/double the expected span.
//! When no block arrives for a while an emergency rule doubles the
//! target per full idle period so the chain cannot stall. Regtest never
//! retargets; it stays at its trivial proof-of-work limit.

use crate::core::block::BlockHeader;
use crate::crypto::hash::Hash256;
use crate::params::{
    Network, BLOCK_TIME_TARGET, DGW_PAST_BLOCKS, EMERGENCY_DIFFICULTY_REDUCTION,
    EMERGENCY_DIFFICULTY_THRESHOLD, MAX_DIFFICULTY_ADJUSTMENT,
};
use uint::construct_uint;

construct_uint! {
    /// 256-bit unsigned integer for targets and cumulative work
    pub struct U256(4);
}

construct_uint! {
    struct U512(8);
}

// =============================================================================
// Compact bits codec
// =============================================================================

/// Expand compact bits into a full 256-bit target.
pub fn bits_to_target(bits: u32) -> U256 {
    let exponent = (bits >> 24) as usize;
    let mantissa = U256::from(bits & 0x007f_ffff);
    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        let shift = 8 * (exponent - 3);
        if shift > 255 {
            return U256::MAX;
        }
        let target = mantissa << shift;
        // Round-trip check catches mantissa bits shifted off the top
        if target >> shift != mantissa {
            U256::MAX
        } else {
            target
        }
    }
}

/// Compress a target back into compact bits. Lossy: only the top three
/// bytes of precision survive, matching how headers declare difficulty.
pub fn target_to_bits(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        target.low_u64() << (8 * (3 - size))
    } else {
        (target >> (8 * (size - 3))).low_u64()
    } as u32;
    // Avoid a mantissa that would read as negative in the legacy format
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    ((size as u32) << 24) | (compact & 0x007f_ffff)
}

// =============================================================================
// Work
// =============================================================================

/// Expected hashes to find a block at the given bits: 2^256 / (target+1).
pub fn block_work(bits: u32) -> U256 {
    let target = bits_to_target(bits);
    if target == U256::MAX {
        return U256::one();
    }
    // 2^256 / (t+1) without 512-bit division
    (!target / (target + U256::one())) + U256::one()
}

/// Numeric value of a block hash for target comparison.
pub fn hash_value(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash.as_bytes())
}

/// Proof-of-work check: the hash value must be strictly below the target.
pub fn meets_target(hash: &Hash256, bits: u32) -> bool {
    hash_value(hash) < bits_to_target(bits)
}

/// Grind nonces until the header meets its own declared bits. Returns
/// false if `max_attempts` nonces were exhausted.
pub fn solve(header: &mut BlockHeader, max_attempts: u64) -> bool {
    let target = bits_to_target(header.bits);
    for _ in 0..max_attempts {
        if hash_value(&header.hash()) < target {
            return true;
        }
        header.nonce = header.nonce.wrapping_add(1);
    }
    false
}

// =============================================================================
// Retarget
// =============================================================================

/// Compute the required bits for a block arriving at `candidate_time` on
/// top of the branch whose most recent headers are given in ascending
/// order. Callers pass up to `DGW_PAST_BLOCKS + 1` headers ending at the
/// branch tip; with fewer the chain is too young to retarget and the
/// proof-of-work limit applies.
pub fn next_required_bits(headers: &[BlockHeader], candidate_time: u32, network: Network) -> u32 {
    if !network.retargets() {
        return network.pow_limit_bits();
    }
    let pow_limit = bits_to_target(network.pow_limit_bits());

    let mut target = if headers.len() < DGW_PAST_BLOCKS + 1 {
        pow_limit
    } else {
        let window = &headers[headers.len() - (DGW_PAST_BLOCKS + 1)..];

        // Rolling average of the window's targets. Summed at 512-bit
        // width: near the proof-of-work limit a single target approaches
        // 2^255, so the running sum does not fit in a U256.
        let mut sum = U512::zero();
        for header in &window[1..] {
            sum = sum + widen(bits_to_target(header.bits));
        }
        let average = narrow(sum / U512::from(DGW_PAST_BLOCKS), pow_limit);

        // Measured span across the window, clamped to [span/2, span*2]
        let expected_span = BLOCK_TIME_TARGET * DGW_PAST_BLOCKS as u64;
        let first = window[0].timestamp as i64;
        let last = window[DGW_PAST_BLOCKS].timestamp as i64;
        let actual_span = (last - first).clamp(
            (expected_span / MAX_DIFFICULTY_ADJUSTMENT) as i64,
            (expected_span * MAX_DIFFICULTY_ADJUSTMENT) as i64,
        ) as u64;

        mul_div(average, actual_span, expected_span, pow_limit)
    };

    // Emergency easing: double the target per full idle period since the
    // branch tip, measured against the candidate's own timestamp
    if let Some(tip) = headers.last() {
        let elapsed = (candidate_time as u64).saturating_sub(tip.timestamp as u64);
        if elapsed > EMERGENCY_DIFFICULTY_THRESHOLD {
            let periods = elapsed / EMERGENCY_DIFFICULTY_THRESHOLD;
            for _ in 0..periods {
                if target >= pow_limit {
                    break;
                }
                target = target * U256::from(EMERGENCY_DIFFICULTY_REDUCTION);
            }
        }
    }

    if target > pow_limit {
        target = pow_limit;
    }
    if target.is_zero() {
        target = U256::one();
    }
    target_to_bits(target)
}

/// value * numerator / denominator at 512-bit width, clamped to `max`.
fn mul_div(value: U256, numerator: u64, denominator: u64, max: U256) -> U256 {
    narrow(
        widen(value) * U512::from(numerator) / U512::from(denominator),
        max,
    )
}

fn widen(value: U256) -> U512 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    U512::from_big_endian(&buf)
}

/// Bring a 512-bit intermediate back to target width, clamped to `max`.
fn narrow(wide: U512, max: U256) -> U256 {
    let mut out = [0u8; 64];
    wide.to_big_endian(&mut out);
    if out[..32].iter().any(|b| *b != 0) {
        return max;
    }
    U256::from_big_endian(&out[32..]).min(max)
}

// =============================================================================
// Serde for work values
// =============================================================================

/// Serialize a U256 as big-endian hex, for cumulative-work fields.
pub mod serde_u256 {
    use super::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        serializer.serialize_str(&hex::encode(buf))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("expected 32 bytes of work"));
        }
        Ok(U256::from_big_endian(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::Hash256;
    use crate::params::GENESIS_TIMESTAMP;

    const MAINNET_LIMIT: u32 = 0x1e0f_ffff;

    fn window(count: usize, bits: u32, interval: u32) -> Vec<BlockHeader> {
        (0..count)
            .map(|i| BlockHeader {
                version: 1,
                previous_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                timestamp: GENESIS_TIMESTAMP + i as u32 * interval,
                bits,
                nonce: 0,
            })
            .collect()
    }

    #[test]
    fn test_bits_roundtrip_at_limits() {
        for bits in [MAINNET_LIMIT, 0x207f_ffff, 0x1d00_ffff] {
            assert_eq!(target_to_bits(bits_to_target(bits)), bits);
        }
    }

    #[test]
    fn test_bits_to_target_known_value() {
        // 0x1d00ffff is the classic value: 0xffff << (8 * (0x1d - 3))
        let target = bits_to_target(0x1d00_ffff);
        assert_eq!(target, U256::from(0xffffu64) << (8 * 0x1a));
    }

    #[test]
    fn test_target_to_bits_normalizes_high_mantissa() {
        // A mantissa with the top bit set must be shifted down a byte
        let target = U256::from(0x80u64) << 16;
        let bits = target_to_bits(target);
        assert_eq!(bits >> 24, 4);
        assert_eq!(bits & 0x007f_ffff, 0x0000_8000);
    }

    #[test]
    fn test_harder_target_means_more_work() {
        assert!(block_work(0x1c0f_ffff) > block_work(MAINNET_LIMIT));
        assert!(block_work(MAINNET_LIMIT) > block_work(0x207f_ffff));
    }

    #[test]
    fn test_meets_target_is_strict() {
        // A zero hash always passes; an all-ones hash never does
        assert!(meets_target(&Hash256::ZERO, MAINNET_LIMIT));
        assert!(!meets_target(&Hash256([0xff; 32]), MAINNET_LIMIT));
    }

    #[test]
    fn test_young_chain_uses_pow_limit() {
        let headers = window(5, MAINNET_LIMIT, BLOCK_TIME_TARGET as u32);
        let next = headers.last().unwrap().timestamp + BLOCK_TIME_TARGET as u32;
        assert_eq!(
            next_required_bits(&headers, next, Network::Mainnet),
            MAINNET_LIMIT
        );
    }

    #[test]
    fn test_on_schedule_blocks_keep_difficulty() {
        let headers = window(DGW_PAST_BLOCKS + 1, 0x1d10_0000, BLOCK_TIME_TARGET as u32);
        let next = headers.last().unwrap().timestamp + BLOCK_TIME_TARGET as u32;
        let bits = next_required_bits(&headers, next, Network::Mainnet);
        assert_eq!(bits, 0x1d10_0000);
    }

    #[test]
    fn test_fast_blocks_tighten_target() {
        // Window mined at a third of the target interval
        let headers = window(
            DGW_PAST_BLOCKS + 1,
            0x1d10_0000,
            BLOCK_TIME_TARGET as u32 / 3,
        );
        let next = headers.last().unwrap().timestamp + BLOCK_TIME_TARGET as u32 / 3;
        let bits = next_required_bits(&headers, next, Network::Mainnet);
        assert!(
            bits_to_target(bits) < bits_to_target(0x1d10_0000),
            "target should shrink"
        );
        // The clamp limits tightening to half the previous target
        assert!(bits_to_target(bits) >= bits_to_target(0x1d10_0000) / 2);
    }

    #[test]
    fn test_slow_blocks_ease_target() {
        let headers = window(
            DGW_PAST_BLOCKS + 1,
            0x1d10_0000,
            BLOCK_TIME_TARGET as u32 * 3,
        );
        let next = headers.last().unwrap().timestamp + BLOCK_TIME_TARGET as u32;
        let bits = next_required_bits(&headers, next, Network::Mainnet);
        assert!(bits_to_target(bits) > bits_to_target(0x1d10_0000));
        assert!(bits_to_target(bits) <= bits_to_target(0x1d10_0000) * 2);
    }

    #[test]
    fn test_emergency_easing_per_period() {
        let headers = window(DGW_PAST_BLOCKS + 1, 0x1d10_0000, BLOCK_TIME_TARGET as u32);
        let tip_time = headers.last().unwrap().timestamp;

        // One full idle period doubles the target once (on top of the
        // DGW result, which is unchanged for an on-schedule window)
        let one = next_required_bits(
            &headers,
            tip_time + EMERGENCY_DIFFICULTY_THRESHOLD as u32 + 1,
            Network::Mainnet,
        );
        let two = next_required_bits(
            &headers,
            tip_time + 2 * EMERGENCY_DIFFICULTY_THRESHOLD as u32 + 1,
            Network::Mainnet,
        );
        assert_eq!(bits_to_target(one), bits_to_target(0x1d10_0000) * 2);
        assert_eq!(bits_to_target(two), bits_to_target(0x1d10_0000) * 4);
    }

    #[test]
    fn test_full_window_of_huge_targets() {
        // Targets near 2^255 overflow a 256-bit running sum; the widened
        // average must come back clamped to the network limit instead of
        // panicking.
        let headers = window(DGW_PAST_BLOCKS + 1, 0x207f_ffff, BLOCK_TIME_TARGET as u32);
        let next = headers.last().unwrap().timestamp + BLOCK_TIME_TARGET as u32;
        let bits = next_required_bits(&headers, next, Network::Testnet);
        assert_eq!(bits, Network::Testnet.pow_limit_bits());
    }

    #[test]
    fn test_regtest_never_retargets() {
        // A burst of instant blocks would tighten a retargeting network
        let headers = window(DGW_PAST_BLOCKS + 1, 0x207f_ffff, 0);
        let next = headers.last().unwrap().timestamp;
        assert_eq!(
            next_required_bits(&headers, next, Network::Regtest),
            Network::Regtest.pow_limit_bits()
        );
    }

    #[test]
    fn test_emergency_easing_clamped_at_pow_limit() {
        let headers = window(DGW_PAST_BLOCKS + 1, MAINNET_LIMIT, BLOCK_TIME_TARGET as u32);
        let tip_time = headers.last().unwrap().timestamp;
        let bits = next_required_bits(&headers, tip_time + 1_000_000, Network::Mainnet);
        assert_eq!(bits, MAINNET_LIMIT);
    }

    #[test]
    fn test_solve_finds_trivial_pow() {
        let mut header = window(1, 0x207f_ffff, 0)[0];
        assert!(solve(&mut header, 10_000));
        assert!(meets_target(&header.hash(), header.bits));
    }

    #[test]
    fn test_work_serde_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrapper {
            #[serde(with = "serde_u256")]
            work: U256,
        }
        let w = Wrapper {
            work: block_work(MAINNET_LIMIT) * U256::from(12345u64),
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(w.work, back.work);
    }
}
