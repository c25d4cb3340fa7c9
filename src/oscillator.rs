//! Timestamp-driven bisection that maps a wall-clock day boundary onto a
//! block height.
//!
//! Grounded on `original_source/src/oscillator.py`'s `BlockOscillator`.
//! The oscillation-break condition is corrected per SPEC_FULL.md §9: the
//! original compares the new jump only against the jump from two
//! iterations ago, which misses a sign-flipping two-cycle where the
//! *magnitude* repeats but with alternating sign at every step; this
//! version remembers the last two *signed* jumps and breaks if the new
//! one matches either.
//!
//! Block-jump estimates round half to even, matching Python's `round()`,
//! since `f64::round` rounds half away from zero and would disagree with
//! the original at exact tie points (e.g. a timestamp delta of exactly
//! half a block's worth of seconds).

use crate::error::Result;
use crate::rpc::ChainSource;

const BLOCKS_PER_DAY: i64 = 144;
const SECONDS_IN_DAY: i64 = 86_400;
const JUMP_CONVERGED: i64 = 6;

/// Round-half-to-even, matching Python's `round()` (the original's
/// rounding behavior), rather than `f64::round`'s round-half-away-from-zero.
fn round_half_to_even(x: f64) -> i64 {
    let floor = x.floor();
    let diff = x - floor;
    let floor_i = floor as i64;

    if diff < 0.5 {
        floor_i
    } else if diff > 0.5 {
        floor_i + 1
    } else if floor_i % 2 == 0 {
        floor_i
    } else {
        floor_i + 1
    }
}

fn estimate_block_jump(timestamp_delta: i64) -> i64 {
    let blocks = BLOCKS_PER_DAY as f64 * timestamp_delta as f64 / SECONDS_IN_DAY as f64;
    round_half_to_even(blocks)
}

/// Find the lowest block height whose timestamp is `>= target_timestamp`
/// (midnight UTC of the target day), seeded from the chain tip.
pub async fn find_price_day_block<C: ChainSource>(
    rpc: &C,
    tip_height: u64,
    tip_timestamp: u64,
    target_timestamp: u64,
) -> Result<u64> {
    let mut height = (tip_height as i64
        - estimate_block_jump(tip_timestamp as i64 - target_timestamp as i64))
    .max(0) as u64;

    let (mut time, mut jump) = fetch_and_estimate(rpc, height, target_timestamp).await?;

    let mut last_jump = 0i64;
    let mut last_last_jump = 0i64;

    while jump.abs() > JUMP_CONVERGED && jump != last_jump && jump != last_last_jump {
        last_last_jump = last_jump;
        last_jump = jump;

        height = (height as i64 - jump).max(0) as u64;
        let next = fetch_and_estimate(rpc, height, target_timestamp).await?;
        time = next.0;
        jump = next.1;
    }

    if time as i64 > target_timestamp as i64 {
        while time as i64 > target_timestamp as i64 && height > 0 {
            height -= 1;
            time = rpc.block_time(rpc.block_hash(height).await?).await?;
        }
        height += 1;
    } else if (time as i64) < target_timestamp as i64 {
        while (time as i64) < target_timestamp as i64 && height < tip_height {
            height += 1;
            time = rpc.block_time(rpc.block_hash(height).await?).await?;
        }
    }

    Ok(height)
}

async fn fetch_and_estimate<C: ChainSource>(
    rpc: &C,
    height: u64,
    target_timestamp: u64,
) -> Result<(u64, i64)> {
    let hash = rpc.block_hash(height).await?;
    let time = rpc.block_time(hash).await?;
    let jump = estimate_block_jump(time as i64 - target_timestamp as i64);
    Ok((time, jump))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rpc::BlockOutputs;
    use bitcoincore_rpc::bitcoin::hashes::Hash;
    use bitcoincore_rpc::bitcoin::BlockHash;
    use std::collections::HashMap;

    #[test]
    fn test_estimate_block_jump_one_day() {
        assert_eq!(estimate_block_jump(SECONDS_IN_DAY), BLOCKS_PER_DAY);
        assert_eq!(estimate_block_jump(-SECONDS_IN_DAY), -BLOCKS_PER_DAY);
        assert_eq!(estimate_block_jump(0), 0);
    }

    #[test]
    fn test_estimate_block_jump_rounds_half_to_even() {
        // Exactly half a block's worth of seconds is a tie; round-half-to-even
        // rounds it to 0 (the nearest even integer), matching Python's round().
        let half_block_seconds = SECONDS_IN_DAY / BLOCKS_PER_DAY / 2;
        assert_eq!(estimate_block_jump(half_block_seconds), 0);

        // One and a half blocks' worth is also a tie; nearest even is 2.
        let one_and_half_block_seconds = half_block_seconds * 3;
        assert_eq!(estimate_block_jump(one_and_half_block_seconds), 2);
    }

    /// An in-memory chain used to check the oscillator's convergence
    /// property without a live node: `times[height]` is that height's
    /// block timestamp.
    struct FakeChain {
        times: Vec<u64>,
        hash_to_height: HashMap<BlockHash, u64>,
    }

    impl FakeChain {
        fn new(times: Vec<u64>) -> Self {
            let hash_to_height = (0..times.len() as u64)
                .map(|h| (BlockHash::hash(&h.to_le_bytes()), h))
                .collect();
            FakeChain {
                times,
                hash_to_height,
            }
        }
    }

    impl ChainSource for FakeChain {
        async fn tip_height(&self) -> Result<u64> {
            Ok(self.times.len() as u64 - 1)
        }

        async fn block_hash(&self, height: u64) -> Result<BlockHash> {
            Ok(BlockHash::hash(&height.to_le_bytes()))
        }

        async fn block_time(&self, hash: BlockHash) -> Result<u64> {
            let height = self.hash_to_height[&hash];
            Ok(self.times[height as usize])
        }

        async fn block_hashes(&self, heights: &[u64]) -> Result<Vec<(u64, BlockHash)>> {
            let mut out = Vec::with_capacity(heights.len());
            for &height in heights {
                out.push((height, self.block_hash(height).await?));
            }
            Ok(out)
        }

        async fn blocks(&self, refs: &[(u64, BlockHash)]) -> Result<Vec<BlockOutputs>> {
            let mut out = Vec::with_capacity(refs.len());
            for &(height, _) in refs {
                out.push(BlockOutputs {
                    height,
                    time: self.times[height as usize],
                    amounts_btc: Vec::new(),
                });
            }
            Ok(out)
        }
    }

    /// Property #1: the oscillator returns h* such that header(h*).time
    /// >= T and header(h*-1).time < T, for a chain that mines roughly
    /// one block every 600 seconds starting at a fixed genesis time.
    #[tokio::test]
    async fn test_oscillator_converges_to_day_boundary() {
        let genesis = 1_600_000_000u64;
        let times: Vec<u64> = (0..5000).map(|h| genesis + h as u64 * 600).collect();
        let chain = FakeChain::new(times.clone());
        let tip_height = (times.len() - 1) as u64;
        let tip_timestamp = times[tip_height as usize];

        // Target a timestamp safely inside the simulated chain's range.
        let target_timestamp = times[2500] + 37;

        let result = find_price_day_block(&chain, tip_height, tip_timestamp, target_timestamp)
            .await
            .unwrap();

        assert!(times[result as usize] >= target_timestamp);
        if result > 0 {
            assert!(times[result as usize - 1] < target_timestamp);
        }
    }

    #[tokio::test]
    async fn test_oscillator_handles_target_at_genesis() {
        let genesis = 1_600_000_000u64;
        let times: Vec<u64> = (0..1000).map(|h| genesis + h as u64 * 600).collect();
        let chain = FakeChain::new(times.clone());
        let tip_height = (times.len() - 1) as u64;
        let tip_timestamp = times[tip_height as usize];

        let result = find_price_day_block(&chain, tip_height, tip_timestamp, genesis)
            .await
            .unwrap();

        assert_eq!(result, 0);
    }
}
