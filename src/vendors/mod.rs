//! Vendor identity and the wire formats of each brokerage API.
//!
//! Everything vendor-specific (URLs, headers, body codes, continuation
//! markers, payload shapes) lives below this module; the client, token
//! manager and collector only deal in [`Operation`]s and decoded models.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::token::Token;
use crate::config::VendorConfig;
use crate::error::{AppError, Result};
use crate::fetch::transport::{ApiRequest, ApiResponse};
use crate::models::{DateRange, Market, QuoteRecord, Stock};

pub mod kis;
pub mod kiwoom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Vendor {
    #[serde(rename = "kiwoom")]
    Kiwoom,
    #[serde(rename = "kis")]
    KoreaInvestment,
}

impl Vendor {
    pub const ALL: [Vendor; 2] = [Vendor::Kiwoom, Vendor::KoreaInvestment];

    /// Short identifier used in file names and on the command line.
    pub fn slug(self) -> &'static str {
        match self {
            Vendor::Kiwoom => "kiwoom",
            Vendor::KoreaInvestment => "kis",
        }
    }

    /// Prefix of the environment variables carrying this vendor's settings.
    pub fn env_prefix(self) -> &'static str {
        match self {
            Vendor::Kiwoom => "KIWOOM",
            Vendor::KoreaInvestment => "KIS",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Vendor::Kiwoom => "Kiwoom",
            Vendor::KoreaInvestment => "KIS",
        })
    }
}

impl FromStr for Vendor {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kiwoom" => Ok(Vendor::Kiwoom),
            "kis" | "korea-investment" | "koreainvestment" => Ok(Vendor::KoreaInvestment),
            other => Err(AppError::message(format!(
                "unknown vendor `{other}` (expected `kiwoom` or `kis`)"
            ))),
        }
    }
}

/// A read-only data call, independent of how a vendor spells it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    StockList { market: Market },
    DailyChart { stock_code: String, range: DateRange },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::StockList { .. } => "stock listing",
            Operation::DailyChart { .. } => "daily chart",
        }
    }
}

/// Continuation state handed back by a vendor for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Kiwoom `next-key`; empty for KIS, which only flags that more data exists.
    pub next_key: String,
}

/// One decoded page of daily bars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartPage {
    pub stock_name: Option<String>,
    pub records: Vec<QuoteRecord>,
}

pub fn supports(vendor: Vendor, operation: &Operation) -> bool {
    !matches!(
        (vendor, operation),
        (Vendor::KoreaInvestment, Operation::StockList { .. })
    )
}

pub fn ensure_supported(vendor: Vendor, operation: &Operation) -> Result<()> {
    if supports(vendor, operation) {
        Ok(())
    } else {
        Err(AppError::Unsupported {
            vendor,
            operation: operation.name(),
        })
    }
}

pub fn token_request(vendor: Vendor, config: &VendorConfig) -> ApiRequest {
    let request = match vendor {
        Vendor::Kiwoom => kiwoom::token_request(config),
        Vendor::KoreaInvestment => kis::token_request(config),
    };
    request.with_timeout(config.request_timeout)
}

pub fn parse_token(vendor: Vendor, body: &Value, issued_at: DateTime<Utc>) -> Result<Token> {
    match vendor {
        Vendor::Kiwoom => kiwoom::parse_token(body, issued_at),
        Vendor::KoreaInvestment => kis::parse_token(body, issued_at),
    }
}

pub fn build_request(
    vendor: Vendor,
    config: &VendorConfig,
    token: &Token,
    operation: &Operation,
    cursor: Option<&PageCursor>,
) -> Result<ApiRequest> {
    ensure_supported(vendor, operation)?;
    let request = match (vendor, operation) {
        (Vendor::Kiwoom, Operation::StockList { market }) => {
            kiwoom::stock_list_request(config, token, *market, cursor)
        }
        (Vendor::Kiwoom, Operation::DailyChart { stock_code, range }) => {
            kiwoom::daily_chart_request(config, token, stock_code, range, cursor)
        }
        (Vendor::KoreaInvestment, Operation::DailyChart { stock_code, range }) => {
            kis::daily_chart_request(config, token, stock_code, range, cursor)
        }
        (Vendor::KoreaInvestment, Operation::StockList { .. }) => {
            return Err(AppError::Unsupported {
                vendor,
                operation: operation.name(),
            })
        }
    };
    Ok(request.with_timeout(config.request_timeout))
}

/// Vendor error carried in a parsed body, if any.
pub fn check_body(vendor: Vendor, body: &Value) -> Option<AppError> {
    match vendor {
        Vendor::Kiwoom => kiwoom::check_body(body),
        Vendor::KoreaInvestment => kis::check_body(body),
    }
}

/// Turn a raw response into a JSON body or a classified error.
///
/// Precedence: 401, 429, vendor token/rate codes (which KIS also sends with
/// 5xx statuses), other 5xx, other non-2xx, unparseable body, then any
/// remaining vendor error code.
pub fn classify_response(vendor: Vendor, response: &ApiResponse) -> Result<Value> {
    if response.status == 401 {
        return Err(AppError::authentication(
            vendor,
            format!("HTTP 401: {}", snippet(&response.body)),
        ));
    }
    if response.status == 429 {
        return Err(AppError::RateLimited {
            vendor,
            retry_after: retry_after(response),
        });
    }

    let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
    let body_error = parsed.as_ref().and_then(|body| check_body(vendor, body));

    let token_or_rate = matches!(
        body_error,
        Some(AppError::Authentication { .. } | AppError::RateLimited { .. })
    );
    if token_or_rate {
        if let Some(err) = body_error {
            return Err(err);
        }
    }

    if response.status >= 500 {
        return Err(AppError::transient(
            vendor,
            format!("HTTP {}: {}", response.status, snippet(&response.body)),
        ));
    }
    if !response.is_success() {
        return Err(body_error.unwrap_or_else(|| AppError::Rejected {
            vendor,
            code: response.status.to_string(),
            message: snippet(&response.body),
        }));
    }

    let Some(body) = parsed else {
        return Err(AppError::data_format(
            vendor,
            format!("response is not JSON: {}", snippet(&response.body)),
        ));
    };
    if let Some(err) = body_error {
        return Err(err);
    }
    Ok(body)
}

pub fn next_page(vendor: Vendor, headers: &BTreeMap<String, String>) -> Option<PageCursor> {
    match vendor {
        Vendor::Kiwoom => kiwoom::next_page(headers),
        Vendor::KoreaInvestment => kis::next_page(headers),
    }
}

pub fn decode_stock_list(vendor: Vendor, market: Market, body: &Value) -> Result<Vec<Stock>> {
    match vendor {
        Vendor::Kiwoom => kiwoom::decode_stock_list(market, body),
        Vendor::KoreaInvestment => Err(AppError::Unsupported {
            vendor,
            operation: "stock listing",
        }),
    }
}

pub fn decode_daily_chart(vendor: Vendor, stock_code: &str, body: &Value) -> Result<ChartPage> {
    match vendor {
        Vendor::Kiwoom => kiwoom::decode_daily_chart(stock_code, body),
        Vendor::KoreaInvestment => kis::decode_daily_chart(stock_code, body),
    }
}

fn retry_after(response: &ApiResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn snippet(body: &str) -> String {
    const LIMIT: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
