use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

use crate::error::{AppError, Result};

const KST_OFFSET_SECS: i32 = 9 * 3600;
const COMPACT_DATE: &str = "%Y%m%d";
const COMPACT_DATETIME: &str = "%Y%m%d%H%M%S";

/// Korea Standard Time, UTC+9 with no daylight saving.
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Wall-clock time in Korea.
pub fn to_kst(at: DateTime<Utc>) -> NaiveDateTime {
    at.with_timezone(&kst()).naive_local()
}

pub fn from_kst(naive: NaiveDateTime) -> DateTime<Utc> {
    kst()
        .from_local_datetime(&naive)
        .single()
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

pub fn today_kst() -> NaiveDate {
    to_kst(Utc::now()).date()
}

pub fn parse_compact_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), COMPACT_DATE).map_err(|_| {
        AppError::message(format!(
            "invalid date `{}` (expected YYYYMMDD)",
            value.trim()
        ))
    })
}

pub fn format_compact_date(date: NaiveDate) -> String {
    date.format(COMPACT_DATE).to_string()
}

/// Parse a KST wall-clock timestamp in the given format into UTC.
pub fn parse_kst(value: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), format)
        .ok()
        .map(from_kst)
}

/// `YYYYMMDDHHMMSS` in KST, the layout of `expires_dt`.
pub fn parse_kst_compact(value: &str) -> Option<DateTime<Utc>> {
    parse_kst(value, COMPACT_DATETIME)
}

pub fn format_kst_compact(at: DateTime<Utc>) -> String {
    to_kst(at).format(COMPACT_DATETIME).to_string()
}

pub fn snapshot_timestamp_slug() -> String {
    Local::now().format("%Y_%m_%d_%H_%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_dates_round_trip_through_kst() {
        let expires = parse_kst_compact("20240105083000").unwrap();
        assert_eq!(expires, Utc.with_ymd_and_hms(2024, 1, 4, 23, 30, 0).unwrap());
        assert_eq!(format_kst_compact(expires), "20240105083000");
        assert!(parse_kst_compact("2024-01-05").is_none());
    }

    #[test]
    fn kst_is_nine_hours_ahead_across_midnight() {
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 15, 0, 0).unwrap();
        let local = to_kst(at);
        assert_eq!(local.date(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(from_kst(local), at);
        assert_eq!(kst().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn rejects_malformed_trade_dates() {
        assert_eq!(
            parse_compact_date("20240229").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(parse_compact_date("20230229").is_err());
        assert!(parse_compact_date("2024-02-01").is_err());
    }
}
