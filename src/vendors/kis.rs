//! Korea Investment & Securities Open API (`openapi.koreainvestment.com`).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use crate::auth::token::Token;
use crate::config::VendorConfig;
use crate::error::{AppError, Result};
use crate::fetch::decode::{optional_text, required_amount, required_array, required_date};
use crate::fetch::transport::ApiRequest;
use crate::models::{DateRange, QuoteRecord};
use crate::utils::format_compact_date;
use crate::utils::time::parse_kst;

use super::{ChartPage, PageCursor, Vendor};

pub const TOKEN_PATH: &str = "/oauth2/tokenP";
pub const DAILY_CHART_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice";
pub const DAILY_CHART_TR: &str = "FHKST03010100";

const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const INVALID_TOKEN_CODES: &[&str] = &["EGW00121", "EGW00123"];
const RATE_LIMITED: &str = "EGW00201";
/// Issuance is limited to one token per minute per app key.
const TOKEN_RATE_LIMITED: &str = "EGW00133";
const TOKEN_ISSUE_INTERVAL: Duration = Duration::from_secs(60);
const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 86_400;

pub fn token_request(config: &VendorConfig) -> ApiRequest {
    ApiRequest::post(config.endpoint(TOKEN_PATH))
        .with_header("content-type", CONTENT_TYPE)
        .with_json(json!({
            "grant_type": "client_credentials",
            "appkey": config.credentials.app_key,
            "appsecret": config.credentials.app_secret,
        }))
}

pub fn parse_token(body: &Value, issued_at: DateTime<Utc>) -> Result<Token> {
    let value = optional_text(body, "access_token").ok_or_else(|| {
        AppError::data_format(Vendor::KoreaInvestment, "token response has no `access_token`")
    })?;
    let token_type = optional_text(body, "token_type").unwrap_or_else(|| "Bearer".to_string());

    let expires_at = optional_text(body, "access_token_token_expired")
        .and_then(|raw| parse_kst(&raw, EXPIRY_FORMAT))
        .unwrap_or_else(|| {
            let lifetime = body
                .get("expires_in")
                .and_then(|v| v.as_i64().or_else(|| v.as_str()?.trim().parse().ok()))
                .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
            issued_at + ChronoDuration::seconds(lifetime)
        });

    Ok(Token {
        vendor: Vendor::KoreaInvestment,
        value,
        token_type,
        issued_at,
        expires_at,
    })
}

/// Data calls report failures as `rt_cd`/`msg_cd`/`msg1`; the OAuth endpoint
/// uses `error_code`/`error_description` instead.
pub fn check_body(body: &Value) -> Option<AppError> {
    let (code, message) = match optional_text(body, "rt_cd") {
        Some(rt_cd) if rt_cd == "0" => return None,
        Some(rt_cd) => (
            optional_text(body, "msg_cd").unwrap_or(rt_cd),
            optional_text(body, "msg1").unwrap_or_default(),
        ),
        None => (
            optional_text(body, "error_code")?,
            optional_text(body, "error_description").unwrap_or_default(),
        ),
    };

    let vendor = Vendor::KoreaInvestment;
    Some(if INVALID_TOKEN_CODES.contains(&code.as_str()) {
        AppError::authentication(vendor, format!("{code}: {message}"))
    } else if code == RATE_LIMITED {
        AppError::RateLimited {
            vendor,
            retry_after: None,
        }
    } else if code == TOKEN_RATE_LIMITED {
        AppError::RateLimited {
            vendor,
            retry_after: Some(TOKEN_ISSUE_INTERVAL),
        }
    } else {
        AppError::Rejected {
            vendor,
            code,
            message,
        }
    })
}

pub fn daily_chart_request(
    config: &VendorConfig,
    token: &Token,
    stock_code: &str,
    range: &DateRange,
    cursor: Option<&PageCursor>,
) -> ApiRequest {
    ApiRequest::get(config.endpoint(DAILY_CHART_PATH))
        .with_header("content-type", CONTENT_TYPE)
        .with_header("authorization", token.authorization())
        .with_header("appkey", config.credentials.app_key.as_str())
        .with_header("appsecret", config.credentials.app_secret.as_str())
        .with_header("tr_id", DAILY_CHART_TR)
        .with_header("custtype", "P")
        .with_header("tr_cont", if cursor.is_some() { "N" } else { "" })
        .with_query("FID_COND_MRKT_DIV_CODE", "J")
        .with_query("FID_INPUT_ISCD", stock_code)
        .with_query("FID_INPUT_DATE_1", format_compact_date(range.start))
        .with_query("FID_INPUT_DATE_2", format_compact_date(range.end))
        .with_query("FID_PERIOD_DIV_CODE", "D")
        .with_query("FID_ORG_ADJ_PRC", "1")
}

/// `tr_cont` of `M` (or `F` on the first page) means more rows follow.
pub fn next_page(headers: &BTreeMap<String, String>) -> Option<PageCursor> {
    let flag = headers.get("tr_cont").map(|value| value.trim())?;
    matches!(flag, "M" | "F").then(PageCursor::default)
}

pub fn decode_daily_chart(stock_code: &str, body: &Value) -> Result<ChartPage> {
    let vendor = Vendor::KoreaInvestment;
    let rows = required_array(vendor, body, "output2")?;
    let stock_name = body
        .get("output1")
        .and_then(|summary| optional_text(summary, "hts_kor_isnm"));

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        // Ranges without trading days come back as a single all-blank row.
        if optional_text(row, "stck_bsop_date").is_none() {
            continue;
        }
        records.push(QuoteRecord {
            stock_code: stock_code.to_string(),
            stock_name: stock_name.clone().unwrap_or_default(),
            date: required_date(vendor, row, "stck_bsop_date")?,
            open: required_amount(vendor, row, "stck_oprc")?,
            high: required_amount(vendor, row, "stck_hgpr")?,
            low: required_amount(vendor, row, "stck_lwpr")?,
            close: required_amount(vendor, row, "stck_clpr")?,
            volume: required_amount(vendor, row, "acml_vol")?,
            trading_value: required_amount(vendor, row, "acml_tr_pbmn")?,
            lock_code: optional_text(row, "flng_cls_code"),
            split_rate: optional_text(row, "prtt_rate"),
        });
    }

    Ok(ChartPage {
        stock_name,
        records,
    })
}
