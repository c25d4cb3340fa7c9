//! Round-USD stencil matching: cross-correlate the output histogram
//! against a fixed pattern of weights at bins corresponding to round USD
//! denominations, and convert the best-scoring shift into a price.
//!
//! Grounded on `original_source/src/stencil.py`'s `Stencil` class. The
//! three dataclass bundles there (`StencilValues`, `Bounds`,
//! `BitcoinDailyPriceValues`) collapse here into `StencilBounds`
//! (constants) plus borrowed references into the caller's `Histogram`
//! (SPEC_FULL.md §9).

use crate::error::{OracleError, Result};
use crate::histogram::{Histogram, LOWER_BOUND};

const MIN_SLIDE: i32 = -200;
const MAX_SLIDE: i32 = 200;
const BTC_BOUND: usize = 1401;

/// The 40-entry sparse round-USD weight table (SPEC_FULL.md §6),
/// authoritative and not to be "cleaned up": several clusters carry
/// extra adjacent bins to catch transaction-fee tails, and bin 939 is
/// intentionally below its $500 cluster's 940/941 pair (see SPEC_FULL.md
/// §9, open question).
const STENCIL_VALUES: [(usize, f64); 40] = [
    (401, 5.957955691168063e-4),
    (402, 4.454790662303128e-4),
    (429, 1.763099393598914e-4),
    (430, 1.851801497144573e-4),
    (461, 6.205616481885794e-4),
    (462, 5.985696860584984e-4),
    (496, 6.919505728046619e-4),
    (497, 8.912933078342840e-4),
    (540, 9.372916238804205e-4),
    (541, 1.7125522985034724e-3),
    (600, 2.1702347223143030e-3),
    (601, 3.7018622326411380e-3),
    (602, 2.7322168706743802e-3),
    (603, 1.6268322583097678e-3),
    (604, 1.2601953416497664e-3),
    (661, 4.1425242880295460e-3),
    (662, 3.9247767475640830e-3),
    (696, 3.2399441632017228e-3),
    (697, 3.7112959007355585e-3),
    (740, 4.9921908828370000e-3),
    (741, 7.0636869018197105e-3),
    (801, 8.0000000000000000e-3),
    (802, 6.5431388282424440e-3),
    (803, 4.4279509203361735e-3),
    (861, 4.6132440551747015e-3),
    (862, 4.3647851395531140e-3),
    (896, 3.1980892880846567e-3),
    (897, 3.4237641632481910e-3),
    (939, 2.5995335505435034e-3),
    (940, 3.2631930982226645e-3),
    (941, 4.2753262790881080e-3),
    (1001, 3.7699501474772350e-3),
    (1002, 3.0872891064215764e-3),
    (1003, 2.3237040836798163e-3),
    (1061, 2.3671764210889895e-3),
    (1062, 2.0106877104798474e-3),
    (1140, 9.099214128654502e-4),
    (1141, 1.2008546799361498e-3),
    (1201, 7.862586076341524e-4),
    (1202, 6.900048077192579e-4),
];

/// Dense stencil weights, zero outside the sparse support above.
pub struct Stencil {
    weights: Vec<f64>,
}

/// The outcome of a stencil sweep, before converting to a final price,
/// exposed for diagnostics/testing.
#[derive(Debug, Clone, Copy)]
pub struct SlideResult {
    pub best_slide: i32,
    pub best_slide_score: f64,
    pub neighbor_score: f64,
    pub neighbor_direction: i32,
    pub total_score: f64,
    pub number_of_scores: u32,
}

impl Stencil {
    pub fn new(bin_count: usize) -> Self {
        let mut weights = vec![0.0; bin_count];
        for &(index, weight) in STENCIL_VALUES.iter() {
            weights[index] = weight;
        }
        Stencil { weights }
    }

    /// Zero everywhere except the 40 specified indices in [401, 1202].
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn score_at(&self, histogram: &Histogram, slide: i32) -> f64 {
        (0..(BTC_BOUND - LOWER_BOUND))
            .map(|n| {
                let count_index = (LOWER_BOUND as i32 + slide + n as i32) as usize;
                let weight_index = LOWER_BOUND + n;
                histogram.counts[count_index] * self.weights[weight_index]
            })
            .sum()
    }

    /// Sweep every shift in [-200, 200), tracking the best-scoring slide
    /// and the running average needed for the blend weights.
    fn sweep(&self, histogram: &Histogram) -> (i32, f64, f64, u32) {
        let mut best_slide = 0;
        let mut best_slide_score = 0.0f64;
        let mut total_score = 0.0;
        let mut number_of_scores = 0u32;

        for slide in MIN_SLIDE..MAX_SLIDE {
            let score = self.score_at(histogram, slide);
            total_score += score;
            number_of_scores += 1;

            if score > best_slide_score {
                best_slide_score = score;
                best_slide = slide;
            }
        }

        (best_slide, best_slide_score, total_score, number_of_scores)
    }

    /// Run the full stencil algorithm: sweep, pick the best neighbor,
    /// and return everything needed to blend a price estimate.
    pub fn run(&self, histogram: &Histogram) -> Result<SlideResult> {
        let bounds_ok = LOWER_BOUND + (BTC_BOUND - LOWER_BOUND) <= histogram.len()
            && (LOWER_BOUND as i32 + MIN_SLIDE) >= 0
            && (BTC_BOUND as i32 + MAX_SLIDE) <= histogram.len() as i32;
        if !bounds_ok {
            return Err(OracleError::Logic(
                "histogram too small for the stencil sweep bounds".to_string(),
            ));
        }

        let (best_slide, best_slide_score, total_score, number_of_scores) =
            self.sweep(histogram);

        let up = self.score_at(histogram, best_slide + 1);
        let down = self.score_at(histogram, best_slide - 1);
        let (neighbor_score, neighbor_direction) = if up > down { (up, 1) } else { (down, -1) };

        Ok(SlideResult {
            best_slide,
            best_slide_score,
            neighbor_score,
            neighbor_direction,
            total_score,
            number_of_scores,
        })
    }
}

/// Implied USD/BTC rate if `bins[801 + offset]` is the "$100 bin".
fn implied_price(histogram: &Histogram, offset: i32) -> Result<f64> {
    let index = (801 + offset) as usize;
    let btc = *histogram
        .bins
        .get(index)
        .ok_or_else(|| OracleError::Logic("stencil slide shifted outside the bin table".to_string()))?;
    if btc <= 0.0 {
        return Err(OracleError::Logic(
            "stencil price bin has non-positive BTC value".to_string(),
        ));
    }
    Ok(100.0 / btc)
}

/// Blend the best slide's price with its best neighbor's, weighted by
/// how far each slide's score sits from the sweep's average score.
pub fn blend_price(histogram: &Histogram, result: &SlideResult) -> Result<i64> {
    let avg_score = result.total_score / result.number_of_scores as f64;
    let a1 = result.best_slide_score - avg_score;
    let a2 = (result.neighbor_score - avg_score).abs();

    let price_best = implied_price(histogram, result.best_slide)?;
    let price_neighbor = implied_price(histogram, result.best_slide + result.neighbor_direction)?;

    let total = a1 + a2;
    if total <= 0.0 {
        return Err(OracleError::Logic(
            "stencil slide scores carry no discriminating signal".to_string(),
        ));
    }

    let w1 = a1 / total;
    let w2 = a2 / total;

    Ok((w1 * price_best + w2 * price_neighbor).trunc() as i64)
}

/// Run the stencil end to end: sweep, blend, return the integer price.
pub fn estimate_price(histogram: &Histogram) -> Result<i64> {
    let stencil = Stencil::new(histogram.len());
    let result = stencil.run(histogram)?;
    blend_price(histogram, &result)
}
