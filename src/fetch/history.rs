//! Daily price history for one stock, following continuation pages.

use log::{debug, warn};

use crate::error::Result;
use crate::models::{DateRange, QuoteRecord};
use crate::vendors::{self, Operation, Vendor};

use super::client::ResilientClient;

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSeries {
    pub stock_code: String,
    pub stock_name: Option<String>,
    /// Bars inside the requested range, oldest first, one per date.
    pub records: Vec<QuoteRecord>,
    pub pages: usize,
    pub attempts: u32,
}

pub async fn fetch_daily_quotes(
    client: &ResilientClient,
    vendor: Vendor,
    stock_code: &str,
    stock_name: Option<&str>,
    range: DateRange,
) -> Result<QuoteSeries> {
    let max_pages = client.vendor_config(vendor)?.max_pages;
    let operation = Operation::DailyChart {
        stock_code: stock_code.to_string(),
        range,
    };

    let mut name = stock_name
        .map(str::to_string)
        .filter(|name| !name.is_empty());
    let mut records: Vec<QuoteRecord> = Vec::new();
    let mut cursor = None;
    let mut pages = 0;
    let mut attempts = 0;

    loop {
        let payload = client
            .request_page(vendor, &operation, cursor.as_ref())
            .await?;
        pages += 1;
        attempts += payload.attempts;

        let page = vendors::decode_daily_chart(vendor, stock_code, &payload.body)?;
        if name.is_none() {
            name = page.stock_name;
        }

        // Pages run newest to oldest; once a bar predates the range the rest is irrelevant.
        let exhausted = page.records.is_empty();
        let passed_start = page.records.iter().any(|bar| bar.date < range.start);
        records.extend(
            page.records
                .into_iter()
                .filter(|bar| range.contains(bar.date)),
        );
        if exhausted || passed_start {
            break;
        }

        match vendors::next_page(vendor, &payload.headers) {
            Some(next) if pages < max_pages => cursor = Some(next),
            Some(_) => {
                warn!(
                    "{} daily chart for {} still has pages after {}; stopping",
                    vendor, stock_code, max_pages
                );
                break;
            }
            None => break,
        }
    }

    records.sort_by(|a, b| a.date.cmp(&b.date));
    records.dedup_by(|a, b| a.date == b.date);

    let display_name = name.clone().unwrap_or_default();
    for bar in &mut records {
        bar.stock_name.clone_from(&display_name);
    }

    debug!(
        "{} {}: {} bars over {} page(s)",
        vendor,
        stock_code,
        records.len(),
        pages
    );

    Ok(QuoteSeries {
        stock_code: stock_code.to_string(),
        stock_name: name,
        records,
        pages,
        attempts,
    })
}
