use std::error::Error;

use btc_price_oracle::config::{default_config_path, load_client_config};
use btc_price_oracle::error::OracleError;
use btc_price_oracle::rpc::RpcClient;
use btc_price_oracle::{DailyPriceEstimator, EstimationRequest, PriceEstimate};
use chrono::NaiveDate;
use clap::Parser;
use tabled::{Header, Table, Tabled};
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Tabled)]
struct EstimateRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "USD / BTC")]
    usd_per_btc: i64,
}

impl From<PriceEstimate> for EstimateRow {
    fn from(estimate: PriceEstimate) -> Self {
        EstimateRow {
            date: estimate.date.to_string(),
            usd_per_btc: estimate.usd_per_btc,
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, Box<dyn Error>> {
    Ok(NaiveDate::parse_from_str(raw, "%Y-%m-%d")?)
}

/// Build the list of dates to estimate from the CLI arguments: a single
/// `--date`, an inclusive `--start`/`--end` range, or (absent both)
/// yesterday (UTC).
fn resolve_dates(args: &cli::Args) -> Result<Vec<NaiveDate>, Box<dyn Error>> {
    if let Some(date) = &args.date {
        return Ok(vec![parse_date(date)?]);
    }

    match (&args.start, &args.end) {
        (Some(start), Some(end)) => {
            let start = parse_date(start)?;
            let end = parse_date(end)?;
            let mut dates = Vec::new();
            let mut current = start;
            while current <= end {
                dates.push(current);
                current = current.succ_opt().ok_or("date range overflowed")?;
            }
            Ok(dates)
        }
        (None, None) => {
            let yesterday = (chrono::Utc::now().date_naive())
                .pred_opt()
                .ok_or("could not compute yesterday")?;
            Ok(vec![yesterday])
        }
        _ => Err("--start and --end must be provided together".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = cli::Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let dates = resolve_dates(&args)?;

    let client_config = load_client_config(&config_path)?;
    tracing::info!(host = %client_config.host, "connecting to bitcoind");
    let rpc = RpcClient::connect(&client_config)?;
    let estimator = DailyPriceEstimator::new(&rpc);

    let mut results = Vec::new();
    for date in dates {
        let request = EstimationRequest::new(date);
        match estimator.estimate(request).await {
            Ok(estimate) => results.push(estimate),
            Err(OracleError::Validation(reason)) => {
                tracing::error!(%date, %reason, "skipping day");
            }
            Err(OracleError::Rpc(err)) => {
                tracing::error!(%date, %err, "RPC failure, skipping day");
            }
            Err(err @ OracleError::Logic(_)) => {
                tracing::error!(%date, %err, "internal invariant violated");
                return Err(Box::new(err));
            }
            Err(err) => return Err(Box::new(err)),
        }
    }

    if results.len() > 1 {
        let rows: Vec<EstimateRow> = results.into_iter().map(EstimateRow::from).collect();
        let table = Table::new(rows).with(Header("Daily USD/BTC Estimates"));
        println!("{}", table);
    } else if let Some(estimate) = results.into_iter().next() {
        println!("{}: {} USD/BTC", estimate.date, estimate.usd_per_btc);
    }

    Ok(())
}
