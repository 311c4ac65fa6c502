//! Listed stocks per market, following continuation pages.

use std::collections::HashSet;

use log::{info, warn};

use crate::error::Result;
use crate::models::{Market, Stock};
use crate::vendors::{self, Operation, Vendor};

use super::client::ResilientClient;

pub async fn fetch_stock_list(
    client: &ResilientClient,
    vendor: Vendor,
    market: Market,
) -> Result<Vec<Stock>> {
    let operation = Operation::StockList { market };
    vendors::ensure_supported(vendor, &operation)?;
    let max_pages = client.vendor_config(vendor)?.max_pages;

    let mut stocks = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = None;
    let mut pages = 0;

    loop {
        let payload = client
            .request_page(vendor, &operation, cursor.as_ref())
            .await?;
        pages += 1;

        for stock in vendors::decode_stock_list(vendor, market, &payload.body)? {
            if seen.insert(stock.code.clone()) {
                stocks.push(stock);
            }
        }

        match vendors::next_page(vendor, &payload.headers) {
            Some(next) if pages < max_pages => cursor = Some(next),
            Some(_) => {
                warn!("{} {} listing truncated at {} pages", vendor, market, max_pages);
                break;
            }
            None => break,
        }
    }

    info!("{} {} listing: {} stocks", vendor, market, stocks.len());
    Ok(stocks)
}
