use std::path::PathBuf;

use chrono::{Duration as ChronoDuration, NaiveDate};
use clap::{Args, Parser, Subcommand};

use krx_collector::models::DateRange;
use krx_collector::utils::parse_compact_date;
use krx_collector::vendors::Vendor;
use krx_collector::Result;

/// Look-back used when no start date is given.
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

#[derive(Parser)]
#[command(name = "krx-collector")]
#[command(about = "Collect KRX stock listings and daily quotes through the Kiwoom and KIS open APIs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON configuration file; environment variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch the KOSPI/KOSDAQ listing and save it as CSV and JSON
    Listing {
        #[arg(short, long, default_value = "kiwoom")]
        vendor: Vendor,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Fetch daily quotes for listed stocks and save them as one CSV
    Quotes(QuotesArgs),

    /// Show the cached token for a vendor
    TokenStatus {
        #[arg(short, long, default_value = "kis")]
        vendor: Vendor,

        /// Issue a token first when none is usable
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(Args)]
pub struct QuotesArgs {
    /// Vendor serving the daily charts
    #[arg(short, long, default_value = "kis")]
    pub vendor: Vendor,

    /// Vendor serving the stock listing
    #[arg(long, default_value = "kiwoom")]
    pub listing_vendor: Vendor,

    /// Collect only these codes instead of the full listing
    #[arg(long, value_delimiter = ',')]
    pub codes: Vec<String>,

    /// Single trading date (YYYYMMDD); overrides the range options
    #[arg(long, value_parser = parse_compact_date)]
    pub date: Option<NaiveDate>,

    /// First date (YYYYMMDD), default 30 days before the end date
    #[arg(long, value_parser = parse_compact_date)]
    pub start_date: Option<NaiveDate>,

    /// Last date (YYYYMMDD), default today in Korea
    #[arg(long, value_parser = parse_compact_date)]
    pub end_date: Option<NaiveDate>,

    /// Stop after this many stocks from the listing
    #[arg(long)]
    pub max_stocks: Option<usize>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Deadline for the whole batch
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

impl Commands {
    /// Vendors whose credentials the command needs. Every command validates
    /// the rest of the configuration regardless.
    pub fn credentialed_vendors(&self) -> Vec<Vendor> {
        match self {
            Commands::Listing { vendor, .. } => vec![*vendor],
            Commands::Quotes(args) => {
                let mut vendors = vec![args.vendor];
                if args.codes.is_empty() && args.listing_vendor != args.vendor {
                    vendors.push(args.listing_vendor);
                }
                vendors
            }
            Commands::TokenStatus { vendor, refresh } if *refresh => vec![*vendor],
            Commands::TokenStatus { .. } => Vec::new(),
        }
    }
}

impl QuotesArgs {
    pub fn date_range(&self, today: NaiveDate) -> Result<DateRange> {
        if let Some(date) = self.date {
            return Ok(DateRange::single(date));
        }
        let end = self.end_date.unwrap_or(today);
        let start = self
            .start_date
            .unwrap_or(end - ChronoDuration::days(DEFAULT_LOOKBACK_DAYS));
        DateRange::new(start, end)
    }
}
