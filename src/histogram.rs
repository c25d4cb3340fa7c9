//! Log-spaced histogram of transaction output amounts.
//!
//! Grounded on `original_source/src/bins.py`'s `PriceBins`: bin-edge
//! generation, outlier clipping, round-BTC smoothing and normalization
//! are a direct port of that class's arithmetic, restructured as plain
//! data + free functions rather than a stateful object (see SPEC_FULL.md
//! §9, "Dataclass bundles").

use chrono::{DateTime, Datelike};

use crate::error::{OracleError, Result};
use crate::rpc::{BlockOutputs, ChainSource};

pub const FIRST_BIN_EXPONENT: i32 = -6;
pub const LAST_BIN_EXPONENT: i32 = 6;
pub const BINS_PER_DECADE: usize = 200;

pub const LOWER_BOUND: usize = 201;
pub const UPPER_BOUND: usize = 1601;

/// Number of blocks fetched before `price_day_block` when building the
/// window handed to the histogram.
const WINDOW_BEFORE: i64 = 50;
/// Number of blocks fetched after `price_day_block`.
const WINDOW_AFTER: i64 = 175;

/// Bin indices that sit on round-BTC amounts and need neighbor smoothing
/// to suppress round-BTC clustering contaminating the round-USD signal.
const ROUND_BTC_BINS: [usize; 18] = [
    201, 401, 461, 496, 540, 601, 661, 696, 740, 801, 861, 896, 940, 1001, 1061, 1096, 1140, 1201,
];

/// A log-spaced histogram over output amounts, in BTC.
#[derive(Debug, Clone)]
pub struct Histogram {
    pub bins: Vec<f64>,
    pub counts: Vec<f64>,
}

impl Histogram {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Build the (unfilled) bin edges: `bins[0] = 0.0`, then
    /// `10^(FIRST_BIN_EXPONENT + k/BINS_PER_DECADE)` for
    /// `k = 0..(LAST_BIN_EXPONENT - FIRST_BIN_EXPONENT) * BINS_PER_DECADE`.
    fn new_empty() -> Self {
        let mut bins = Vec::with_capacity(
            1 + ((LAST_BIN_EXPONENT - FIRST_BIN_EXPONENT) as usize) * BINS_PER_DECADE,
        );
        bins.push(0.0);

        for exponent in FIRST_BIN_EXPONENT..LAST_BIN_EXPONENT {
            for b in 0..BINS_PER_DECADE {
                bins.push(10f64.powf(exponent as f64 + b as f64 / BINS_PER_DECADE as f64));
            }
        }

        let counts = vec![0.0; bins.len()];
        Histogram { bins, counts }
    }

    /// Find the bin `b` such that `bins[b] <= amount < bins[b + 1]`.
    ///
    /// Seeds an estimate from the log-linear position of `amount` on the
    /// axis, then walks forward to correct for floating-point rounding —
    /// exactly the two-step scheme in the teacher's `_parse_outputs`.
    fn bin_for_amount(&self, amount: f64) -> usize {
        let amount_log = amount.log10();
        let range = (LAST_BIN_EXPONENT - FIRST_BIN_EXPONENT) as f64;
        let fraction = (amount_log - FIRST_BIN_EXPONENT as f64) / range;
        let mut estimate = (fraction * self.len() as f64) as i64;

        if estimate < 0 {
            estimate = 0;
        }
        let mut estimate = estimate as usize;

        while estimate < self.bins.len() && self.bins[estimate] <= amount {
            estimate += 1;
        }

        estimate - 1
    }

    fn record(&mut self, amount: f64) {
        if amount <= 1e-6 || amount >= 1e6 {
            return;
        }
        let bin = self.bin_for_amount(amount);
        self.counts[bin] += 1.0;
    }

    fn clip_outliers(&mut self) {
        for count in &mut self.counts[..LOWER_BOUND] {
            *count = 0.0;
        }
        for count in &mut self.counts[UPPER_BOUND..] {
            *count = 0.0;
        }
    }

    fn smooth_round_btc_bins(&mut self) {
        for &r in &ROUND_BTC_BINS {
            self.counts[r] = 0.5 * (self.counts[r - 1] + self.counts[r + 1]);
        }
    }

    fn normalize(&mut self) -> Result<()> {
        let sum: f64 = self.counts[LOWER_BOUND..UPPER_BOUND].iter().sum();
        if sum <= 0.0 {
            return Err(OracleError::Logic(
                "histogram window is empty after outlier clipping".to_string(),
            ));
        }

        for count in &mut self.counts[LOWER_BOUND..UPPER_BOUND] {
            *count = (*count / sum).min(0.008);
        }

        Ok(())
    }
}

/// Day-of-month (UTC) of a Unix timestamp, as used to filter the block
/// window down to the target calendar day.
pub fn day_of_month_utc(timestamp: u64) -> u32 {
    DateTime::from_timestamp(timestamp as i64, 0)
        .expect("timestamp in range")
        .day()
}

/// Fetch the block window around `price_day_block`, retain only blocks
/// that fall on the same UTC day-of-month as `price_day_block` itself,
/// and accumulate + post-process the output-amount histogram.
pub async fn build<C: ChainSource>(rpc: &C, price_day_block: u64) -> Result<Histogram> {
    let start = (price_day_block as i64 - WINDOW_BEFORE).max(0) as u64;
    let heights: Vec<u64> = (0..(WINDOW_BEFORE + WINDOW_AFTER) as u64)
        .map(|offset| start + offset)
        .collect();

    let refs = rpc.block_hashes(&heights).await?;
    let mut blocks = rpc.blocks(&refs).await?;
    blocks.sort_by_key(|b| b.height);

    let target_index = (price_day_block - start) as usize;
    let target_block = blocks.get(target_index).ok_or_else(|| {
        OracleError::Logic("price_day_block fell outside the fetched window".to_string())
    })?;
    let target_day = day_of_month_utc(target_block.time);

    let mut histogram = Histogram::new_empty();
    for block in blocks.iter().filter(|b| day_of_month_utc(b.time) == target_day) {
        accumulate_block(&mut histogram, block);
    }

    histogram.clip_outliers();
    histogram.smooth_round_btc_bins();
    histogram.normalize()?;

    Ok(histogram)
}

fn accumulate_block(histogram: &mut Histogram, block: &BlockOutputs) {
    for &amount in &block.amounts_btc {
        histogram.record(amount);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bins_len_and_shape() {
        let histogram = Histogram::new_empty();
        assert_eq!(histogram.len(), 2401);
        assert_eq!(histogram.bins[0], 0.0);
        assert!(histogram.bins.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bin_for_amount_bracket() {
        let histogram = Histogram::new_empty();
        for amount in [1e-5, 0.001, 0.01, 0.5, 1.0, 10.0, 50000.0] {
            let bin = histogram.bin_for_amount(amount);
            assert!(histogram.bins[bin] <= amount, "amount {amount}");
            assert!(amount < histogram.bins[bin + 1], "amount {amount}");
        }
    }

    #[test]
    fn test_record_skips_tiny_and_huge_amounts() {
        let mut histogram = Histogram::new_empty();
        histogram.record(1e-7);
        histogram.record(1e7);
        assert!(histogram.counts.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_record_is_commutative_under_permutation() {
        let amounts = vec![0.01, 0.5, 100.0, 0.25, 0.0001, 3.0, 0.01, 0.01];

        let mut forward = Histogram::new_empty();
        for &a in &amounts {
            forward.record(a);
        }

        let mut reversed = Histogram::new_empty();
        for &a in amounts.iter().rev() {
            reversed.record(a);
        }

        assert_eq!(forward.counts, reversed.counts);
    }

    #[test]
    fn test_normalize_bounds_and_clamp() {
        let mut histogram = Histogram::new_empty();
        // Dump a large, lopsided mass into a single bin inside the window.
        for _ in 0..10_000 {
            histogram.record(0.01);
        }
        for _ in 0..5 {
            histogram.record(1.5);
        }

        histogram.clip_outliers();
        histogram.smooth_round_btc_bins();
        histogram.normalize().unwrap();

        let window = &histogram.counts[LOWER_BOUND..UPPER_BOUND];
        assert!(window.iter().all(|&c| (0.0..=0.008).contains(&c)));
        let sum: f64 = window.iter().sum();
        assert!(sum <= 1.0 + 1e-9);
    }

    #[test]
    fn test_normalize_idempotent_on_already_normalized_histogram() {
        let mut histogram = Histogram::new_empty();
        for amount in [0.01, 0.02, 0.5, 1.0, 2.0] {
            histogram.record(amount);
        }
        histogram.clip_outliers();
        histogram.smooth_round_btc_bins();
        histogram.normalize().unwrap();

        let once = histogram.counts.clone();
        histogram.clip_outliers();
        histogram.smooth_round_btc_bins();
        histogram.normalize().unwrap();

        for (a, b) in once.iter().zip(histogram.counts.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_empty_histogram_is_logic_error() {
        let mut histogram = Histogram::new_empty();
        histogram.clip_outliers();
        histogram.smooth_round_btc_bins();
        assert!(matches!(histogram.normalize(), Err(OracleError::Logic(_))));
    }

    #[test]
    fn test_day_of_month_utc() {
        // 2021-01-01T00:00:00Z
        assert_eq!(day_of_month_utc(1609459200), 1);
        // 2021-01-31T23:59:59Z
        assert_eq!(day_of_month_utc(1612137599), 31);
    }
}
