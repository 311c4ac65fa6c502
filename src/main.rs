mod cli;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use cli::{Cli, Commands, QuotesArgs};
use krx_collector::collect::{CollectionOptions, WorkItem};
use krx_collector::config::{load_config, Config, ProcessEnv};
use krx_collector::records::Records;
use krx_collector::services::QuoteService;
use krx_collector::utils::normalize_stock_code;
use krx_collector::utils::time::today_kst;
use krx_collector::vendors::Vendor;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref(), &ProcessEnv)
        .context("Failed to load configuration")?;
    config.validate_for(&cli.command.credentialed_vendors())?;

    match cli.command {
        Commands::Listing { vendor, output_dir } => {
            let records = records_for(&config, output_dir);
            let service = QuoteService::from_config(config)?;
            let result = save_listing(&service, &records, vendor).await;
            service.shutdown().await;
            result?;
        }
        Commands::Quotes(args) => {
            let records = records_for(&config, args.output_dir.clone());
            let service = QuoteService::from_config(config)?;
            let result = collect_quotes(&service, &records, &args).await;
            service.shutdown().await;
            result?;
        }
        Commands::TokenStatus { vendor, refresh } => {
            let service = QuoteService::from_config(config)?;
            let status = if refresh {
                service.authenticate(vendor).await?
            } else {
                service.get_token_status(vendor).await?
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
            service.shutdown().await;
        }
    }

    Ok(())
}

fn records_for(config: &Config, output_dir: Option<PathBuf>) -> Records {
    Records::new(output_dir.unwrap_or_else(|| config.paths.data_dir.clone()))
}

async fn save_listing(service: &QuoteService, records: &Records, vendor: Vendor) -> Result<()> {
    let stocks = service.fetch_listing(vendor).await?;
    let path = records.save_listing(&stocks, today_kst())?;
    println!("Saved {} stocks to {}", stocks.len(), path.display());
    Ok(())
}

async fn collect_quotes(
    service: &QuoteService,
    records: &Records,
    args: &QuotesArgs,
) -> Result<()> {
    let range = args.date_range(today_kst())?;
    info!("Collecting {} daily quotes for {}", args.vendor, range);

    let mut items = if args.codes.is_empty() {
        let stocks = service.fetch_listing(args.listing_vendor).await?;
        service.work_items(args.vendor, &stocks, range)
    } else {
        let mut items = Vec::with_capacity(args.codes.len());
        for raw in &args.codes {
            match normalize_stock_code(raw) {
                Some(code) => items.push(WorkItem::new(args.vendor, code, range)),
                None => warn!("Ignoring malformed stock code `{}`", raw),
            }
        }
        items
    };

    if let Some(max) = args.max_stocks {
        if items.len() > max {
            warn!("{} stocks listed; only the first {} will be collected", items.len(), max);
            items.truncate(max);
        }
    }
    if items.is_empty() {
        anyhow::bail!("No stocks to collect");
    }

    let defaults = service.default_options();
    let options = CollectionOptions {
        concurrency: args.concurrency.unwrap_or(defaults.concurrency),
        timeout: args
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
    };

    let total = items.len();
    let job = service.spawn_quotes(items, options);
    let progress = job.progress_counter();
    let cancel = job.cancel_handle();
    let finished = job.wait();
    tokio::pin!(finished);

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.tick().await;
    let report = loop {
        tokio::select! {
            result = &mut finished => break result?,
            _ = ticker.tick() => {
                info!("Progress: {}/{}", progress.load(Ordering::SeqCst), total);
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; in-flight stocks will finish, the rest are cancelled");
                cancel.store(true, Ordering::SeqCst);
            }
        }
    };

    info!(
        "Collection finished in {:.1}s: {} succeeded, {} failed, {} timed out, {} cancelled",
        report.elapsed.as_secs_f64(),
        report.succeeded,
        report.failed,
        report.timed_out,
        report.cancelled
    );

    if let Some(path) = records.save_failures(&report)? {
        warn!("Failed stocks written to {}", path.display());
    }

    let rows = report.records().count();
    if rows == 0 {
        anyhow::bail!("No quote rows were collected");
    }
    let path = records.save_quotes(report.records(), range)?;
    println!(
        "Saved {} rows for {} stocks to {}",
        rows,
        report.succeeded,
        path.display()
    );
    Ok(())
}
