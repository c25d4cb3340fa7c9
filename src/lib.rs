//! Estimate the USD/BTC exchange rate for a given UTC day from the
//! distribution of on-chain transaction output amounts.
//!
//! The coordinator (`DailyPriceEstimator`) ties together the four
//! subsystems the teacher's `BlockSample`/`BlockStatistics` pair used to
//! tie together sampling and analysis: validate the request, locate the
//! day's blocks (`oscillator`), build the amount histogram
//! (`histogram`), and cross-correlate it against the round-USD stencil
//! (`stencil`).

pub mod config;
pub mod error;
pub mod histogram;
pub mod oscillator;
pub mod rpc;
pub mod stencil;

use chrono::{NaiveDate, TimeZone, Utc};

use error::{OracleError, Result};
use rpc::ChainSource;

/// Earliest date this pipeline is willing to estimate. The stencil and
/// histogram constants are tuned against on-chain behavior after this
/// point; earlier days are out of scope (SPEC_FULL.md §1).
pub const EARLIEST_SUPPORTED_DATE: (i32, u32, u32) = (2020, 7, 26);

/// One day to estimate, validated up front so the rest of the pipeline
/// can assume a well-formed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimationRequest {
    pub date: NaiveDate,
}

impl EstimationRequest {
    pub fn new(date: NaiveDate) -> Self {
        EstimationRequest { date }
    }

    fn midnight_utc_timestamp(&self) -> i64 {
        Utc.from_utc_datetime(&self.date.and_hms_opt(0, 0, 0).expect("valid midnight"))
            .timestamp()
    }
}

/// Snapshot of node state taken once at the start of a request, handed
/// immutably to the oscillator and builder rather than re-fetched or
/// threaded through as mutable shared state (SPEC_FULL.md §9).
#[derive(Debug, Clone, Copy)]
pub struct ChainView {
    pub tip_height: u64,
    pub tip_timestamp: u64,
}

impl ChainView {
    pub async fn fetch<C: ChainSource>(rpc: &C) -> Result<Self> {
        let tip_height = rpc.tip_height().await?;
        let tip_hash = rpc.block_hash(tip_height).await?;
        let tip_timestamp = rpc.block_time(tip_hash).await?;
        Ok(ChainView {
            tip_height,
            tip_timestamp,
        })
    }

    fn tip_day(&self) -> NaiveDate {
        Utc.timestamp_opt(self.tip_timestamp as i64, 0)
            .single()
            .expect("valid tip timestamp")
            .date_naive()
    }
}

/// Final result of an estimation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceEstimate {
    pub date: NaiveDate,
    pub usd_per_btc: i64,
}

/// Validate `request` against `chain`: date must be on or after
/// [`EARLIEST_SUPPORTED_DATE`] and strictly before the chain tip's
/// calendar day.
fn validate(request: &EstimationRequest, chain: &ChainView) -> Result<()> {
    let (year, month, day) = EARLIEST_SUPPORTED_DATE;
    let earliest = NaiveDate::from_ymd_opt(year, month, day).expect("valid constant date");

    if request.date < earliest {
        return Err(OracleError::Validation(format!(
            "date {} is before the earliest supported date {earliest}",
            request.date
        )));
    }

    if request.date >= chain.tip_day() {
        return Err(OracleError::Validation(format!(
            "date {} is not strictly before the chain tip's day ({})",
            request.date,
            chain.tip_day()
        )));
    }

    Ok(())
}

/// Runs the full pipeline — validate, locate the day's blocks, build the
/// histogram, cross-correlate against the stencil — against a shared
/// chain source.
pub struct DailyPriceEstimator<'a, C: ChainSource> {
    rpc: &'a C,
}

impl<'a, C: ChainSource> DailyPriceEstimator<'a, C> {
    pub fn new(rpc: &'a C) -> Self {
        DailyPriceEstimator { rpc }
    }

    pub async fn estimate(&self, request: EstimationRequest) -> Result<PriceEstimate> {
        let chain = ChainView::fetch(self.rpc).await?;
        validate(&request, &chain)?;

        tracing::info!(date = %request.date, "validated request, locating day's blocks");

        let target_timestamp = request.midnight_utc_timestamp() as u64;
        let price_day_block = oscillator::find_price_day_block(
            self.rpc,
            chain.tip_height,
            chain.tip_timestamp,
            target_timestamp,
        )
        .await?;

        tracing::info!(date = %request.date, price_day_block, "building output histogram");
        let histogram = histogram::build(self.rpc, price_day_block).await?;

        tracing::info!(date = %request.date, "cross-correlating round-USD stencil");
        let usd_per_btc = stencil::estimate_price(&histogram)?;

        tracing::info!(date = %request.date, usd_per_btc, "estimate complete");

        Ok(PriceEstimate {
            date: request.date,
            usd_per_btc,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chain_view(tip_day: NaiveDate) -> ChainView {
        let tip_timestamp = Utc
            .from_utc_datetime(&tip_day.and_hms_opt(12, 0, 0).unwrap())
            .timestamp() as u64;
        ChainView {
            tip_height: 800_000,
            tip_timestamp,
        }
    }

    #[test]
    fn test_earliest_supported_date_accepted() {
        let (y, m, d) = EARLIEST_SUPPORTED_DATE;
        let request = EstimationRequest::new(NaiveDate::from_ymd_opt(y, m, d).unwrap());
        let chain = chain_view(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert!(validate(&request, &chain).is_ok());
    }

    #[test]
    fn test_day_before_earliest_supported_date_rejected() {
        let request = EstimationRequest::new(NaiveDate::from_ymd_opt(2020, 7, 25).unwrap());
        let chain = chain_view(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert!(matches!(
            validate(&request, &chain),
            Err(OracleError::Validation(_))
        ));
    }

    #[test]
    fn test_tip_day_rejected() {
        let tip_day = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
        let request = EstimationRequest::new(tip_day);
        let chain = chain_view(tip_day);
        assert!(matches!(
            validate(&request, &chain),
            Err(OracleError::Validation(_))
        ));
    }

    #[test]
    fn test_day_before_tip_day_accepted() {
        let tip_day = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
        let request = EstimationRequest::new(tip_day.pred_opt().unwrap());
        let chain = chain_view(tip_day);
        assert!(validate(&request, &chain).is_ok());
    }
}
