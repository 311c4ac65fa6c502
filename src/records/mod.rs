use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::collect::{BatchReport, OutcomeStatus};
use crate::error::{Context, Result};
use crate::models::{DateRange, QuoteRecord, Stock};
use crate::utils::{ensure_dir, format_compact_date, snapshot_timestamp_slug, write_atomic};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const QUOTE_COLUMNS: [&str; 11] = [
    "종목코드", "종목명", "날짜", "시가", "고가", "저가", "종가", "거래량", "거래대금", "락구분",
    "분할비율",
];

/// Facade over everything written to the data directory.
///
/// Files are UTF-8 with a byte-order mark so spreadsheet tools pick up the
/// Korean headers, and every write goes through a temp file and rename.
pub struct Records {
    data_dir: PathBuf,
}

impl Records {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn prepare(&self) -> Result<()> {
        ensure_dir(&self.data_dir)
    }

    pub fn quotes_path(&self, range: DateRange) -> PathBuf {
        self.data_dir.join(format!("stock_prices_{}.csv", range))
    }

    pub fn listing_path(&self, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(format!("stock_list_{}.csv", format_compact_date(date)))
    }

    /// Persist quote rows in collection order.
    pub fn save_quotes<'a, I>(&self, records: I, range: DateRange) -> Result<PathBuf>
    where
        I: IntoIterator<Item = &'a QuoteRecord>,
    {
        self.prepare()?;
        let mut writer = csv_writer();
        writer.write_record(QUOTE_COLUMNS)?;

        for record in records {
            writer.write_record([
                record.stock_code.as_str(),
                record.stock_name.as_str(),
                format_compact_date(record.date).as_str(),
                record.open.to_string().as_str(),
                record.high.to_string().as_str(),
                record.low.to_string().as_str(),
                record.close.to_string().as_str(),
                record.volume.to_string().as_str(),
                record.trading_value.to_string().as_str(),
                record.lock_code.as_deref().unwrap_or(""),
                record.split_rate.as_deref().unwrap_or(""),
            ])?;
        }

        let path = self.quotes_path(range);
        finish(writer, &path)?;
        Ok(path)
    }

    /// Persist a listing as CSV plus a JSON copy next to it.
    pub fn save_listing(&self, stocks: &[Stock], date: NaiveDate) -> Result<PathBuf> {
        self.prepare()?;
        let mut writer = csv_writer();
        writer.write_record(["code", "name", "market", "lastPrice", "state"])?;

        for stock in stocks {
            writer.write_record([
                stock.code.as_str(),
                stock.name.as_str(),
                stock.market.label(),
                stock
                    .last_price
                    .map(|price| price.to_string())
                    .unwrap_or_default()
                    .as_str(),
                stock.state.as_deref().unwrap_or(""),
            ])?;
        }

        let path = self.listing_path(date);
        finish(writer, &path)?;

        let json = serde_json::to_vec_pretty(stocks)?;
        write_atomic(path.with_extension("json"), &json)?;
        Ok(path)
    }

    /// Items that did not succeed, with their status and last error.
    /// Returns `None` when the whole batch succeeded.
    pub fn save_failures(&self, report: &BatchReport) -> Result<Option<PathBuf>> {
        let failed: Vec<_> = report
            .outcomes
            .iter()
            .filter(|outcome| outcome.status != OutcomeStatus::Succeeded)
            .collect();
        if failed.is_empty() {
            return Ok(None);
        }

        self.prepare()?;
        let mut writer = csv_writer();
        writer.write_record(["code", "vendor", "status", "attempts", "error"])?;
        for outcome in failed {
            writer.write_record([
                outcome.item.stock_code.as_str(),
                outcome.item.vendor.slug(),
                format!("{:?}", outcome.status).as_str(),
                outcome.attempts.to_string().as_str(),
                outcome.error.as_deref().unwrap_or(""),
            ])?;
        }

        let path = self
            .data_dir
            .join(format!("failures_{}.csv", snapshot_timestamp_slug()));
        finish(writer, &path)?;
        Ok(Some(path))
    }
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::Writer::from_writer(UTF8_BOM.to_vec())
}

fn finish(writer: csv::Writer<Vec<u8>>, path: &Path) -> Result<()> {
    let bytes = writer
        .into_inner()
        .map_err(|err| err.into_error())
        .with_context(|| format!("Failed to encode {}", path.display()))?;
    write_atomic(path, &bytes)
}
