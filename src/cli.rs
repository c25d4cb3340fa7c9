use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "btc-price-oracle")]
#[clap(author = "Tanveer Wahid <tan@wahid.email>")]
#[clap(version = "1.0")]
#[clap(about = "Estimate the USD/BTC exchange rate for a UTC day from on-chain output amounts", long_about = None)]
pub struct Args {
    /// Path to bitcoind's config file
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Estimate a single day (YYYY-MM-DD)
    #[clap(short, long)]
    pub date: Option<String>,

    /// Start of an inclusive date range (YYYY-MM-DD), used with --end
    #[clap(short, long)]
    pub start: Option<String>,

    /// End of an inclusive date range (YYYY-MM-DD), used with --start
    #[clap(short, long)]
    pub end: Option<String>,
}
