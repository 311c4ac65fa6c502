//! Kiwoom Securities REST API (`api.kiwoom.com`).
//!
//! Every data call is a `POST` with an `api-id` header naming the TR;
//! continuation is signalled through the `cont-yn` / `next-key` headers.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};
use serde_json::{json, Value};

use crate::auth::token::Token;
use crate::config::VendorConfig;
use crate::error::{AppError, Result};
use crate::fetch::decode::{
    optional_text, parse_unsigned_amount, required_amount, required_array, required_date,
    required_text, value_to_string,
};
use crate::fetch::transport::ApiRequest;
use crate::models::{DateRange, Market, QuoteRecord, Stock};
use crate::utils::{format_compact_date, normalize_stock_code};
use crate::utils::time::parse_kst_compact;

use super::{ChartPage, PageCursor, Vendor};

pub const TOKEN_PATH: &str = "/oauth2/token";
pub const STOCK_INFO_PATH: &str = "/api/dostk/stkinfo";
pub const CHART_PATH: &str = "/api/dostk/chart";

pub const STOCK_LIST_API: &str = "ka10099";
pub const DAILY_CHART_API: &str = "ka10081";

const CONTENT_TYPE: &str = "application/json;charset=UTF-8";
const INVALID_TOKEN: i64 = 8005;
const RATE_LIMITED: i64 = 1700;
/// `marketName` of main-board KOSPI listings; the KOSPI query also returns
/// ETFs, ETNs and other products under different names.
const KOSPI_MARKET_NAME: &str = "거래소";
const DEFAULT_TOKEN_LIFETIME_HOURS: i64 = 24;

pub fn token_request(config: &VendorConfig) -> ApiRequest {
    ApiRequest::post(config.endpoint(TOKEN_PATH))
        .with_header("content-type", CONTENT_TYPE)
        .with_json(json!({
            "grant_type": "client_credentials",
            "appkey": config.credentials.app_key,
            "secretkey": config.credentials.app_secret,
        }))
}

pub fn parse_token(body: &Value, issued_at: DateTime<Utc>) -> Result<Token> {
    let value = optional_text(body, "token")
        .ok_or_else(|| AppError::data_format(Vendor::Kiwoom, "token response has no `token`"))?;
    let token_type = optional_text(body, "token_type").unwrap_or_else(|| "bearer".to_string());

    let expires_at = match optional_text(body, "expires_dt") {
        Some(raw) => parse_kst_compact(&raw).unwrap_or_else(|| {
            warn!("Kiwoom returned unparseable expires_dt `{}`; assuming 24h", raw);
            issued_at + ChronoDuration::hours(DEFAULT_TOKEN_LIFETIME_HOURS)
        }),
        None => issued_at + ChronoDuration::hours(DEFAULT_TOKEN_LIFETIME_HOURS),
    };

    Ok(Token {
        vendor: Vendor::Kiwoom,
        value,
        token_type,
        issued_at,
        expires_at,
    })
}

/// `return_code` arrives as a number or a numeric string; absent means success.
fn return_code(body: &Value) -> Option<i64> {
    let raw = body.get("return_code")?;
    raw.as_i64()
        .or_else(|| value_to_string(raw).parse::<i64>().ok())
}

pub fn check_body(body: &Value) -> Option<AppError> {
    let code = return_code(body)?;
    if code == 0 {
        return None;
    }
    let message = optional_text(body, "return_msg").unwrap_or_default();
    Some(match code {
        INVALID_TOKEN => AppError::authentication(Vendor::Kiwoom, message),
        RATE_LIMITED => AppError::RateLimited {
            vendor: Vendor::Kiwoom,
            retry_after: None,
        },
        other => AppError::Rejected {
            vendor: Vendor::Kiwoom,
            code: other.to_string(),
            message,
        },
    })
}

fn data_request(
    config: &VendorConfig,
    token: &Token,
    path: &str,
    api_id: &str,
    cursor: Option<&PageCursor>,
    body: Value,
) -> ApiRequest {
    let (cont_yn, next_key) = match cursor {
        Some(cursor) => ("Y", cursor.next_key.as_str()),
        None => ("N", ""),
    };
    ApiRequest::post(config.endpoint(path))
        .with_header("content-type", CONTENT_TYPE)
        .with_header("authorization", token.authorization())
        .with_header("api-id", api_id)
        .with_header("cont-yn", cont_yn)
        .with_header("next-key", next_key)
        .with_json(body)
}

pub fn stock_list_request(
    config: &VendorConfig,
    token: &Token,
    market: Market,
    cursor: Option<&PageCursor>,
) -> ApiRequest {
    data_request(
        config,
        token,
        STOCK_INFO_PATH,
        STOCK_LIST_API,
        cursor,
        json!({ "mrkt_tp": market.code() }),
    )
}

/// Daily bars page backwards from `base_dt`, so the range end anchors the query.
pub fn daily_chart_request(
    config: &VendorConfig,
    token: &Token,
    stock_code: &str,
    range: &DateRange,
    cursor: Option<&PageCursor>,
) -> ApiRequest {
    data_request(
        config,
        token,
        CHART_PATH,
        DAILY_CHART_API,
        cursor,
        json!({
            "stk_cd": stock_code,
            "base_dt": format_compact_date(range.end),
            "upd_stkpc_tp": "1",
        }),
    )
}

pub fn next_page(headers: &BTreeMap<String, String>) -> Option<PageCursor> {
    let more = headers
        .get("cont-yn")
        .map(|value| value.trim().eq_ignore_ascii_case("y"))
        .unwrap_or(false);
    let next_key = headers
        .get("next-key")
        .map(|value| value.trim().to_string())
        .unwrap_or_default();

    (more && !next_key.is_empty()).then_some(PageCursor { next_key })
}

pub fn decode_stock_list(market: Market, body: &Value) -> Result<Vec<Stock>> {
    let rows = required_array(Vendor::Kiwoom, body, "list")?;
    let mut stocks = Vec::with_capacity(rows.len());

    for row in rows {
        if market == Market::Kospi
            && optional_text(row, "marketName").as_deref() != Some(KOSPI_MARKET_NAME)
        {
            continue;
        }

        let raw_code = required_text(Vendor::Kiwoom, row, "code")?;
        let Some(code) = normalize_stock_code(&raw_code) else {
            debug!("Skipping Kiwoom listing row with code `{}`", raw_code);
            continue;
        };

        stocks.push(Stock {
            code,
            name: required_text(Vendor::Kiwoom, row, "name")?,
            market,
            last_price: row.get("lastPrice").and_then(parse_unsigned_amount),
            state: optional_text(row, "state"),
        });
    }

    Ok(stocks)
}

pub fn decode_daily_chart(stock_code: &str, body: &Value) -> Result<ChartPage> {
    let rows = required_array(Vendor::Kiwoom, body, "stk_dt_pole_chart_qry")?;
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        if optional_text(row, "dt").is_none() {
            continue;
        }
        records.push(QuoteRecord {
            stock_code: stock_code.to_string(),
            stock_name: String::new(),
            date: required_date(Vendor::Kiwoom, row, "dt")?,
            open: required_amount(Vendor::Kiwoom, row, "open_pric")?,
            high: required_amount(Vendor::Kiwoom, row, "high_pric")?,
            low: required_amount(Vendor::Kiwoom, row, "low_pric")?,
            close: required_amount(Vendor::Kiwoom, row, "cur_prc")?,
            volume: required_amount(Vendor::Kiwoom, row, "trde_qty")?,
            trading_value: required_amount(Vendor::Kiwoom, row, "trde_prica")?,
            lock_code: None,
            split_rate: None,
        });
    }

    Ok(ChartPage {
        stock_name: None,
        records,
    })
}
