pub mod client;
pub mod decode;
pub mod history;
pub mod listing;
pub mod rate_limit;
pub mod retry;
pub mod transport;

pub use client::{ApiPayload, ResilientClient};
pub use history::{fetch_daily_quotes, QuoteSeries};
pub use listing::fetch_stock_list;
pub use rate_limit::{RateBudget, RateLimitConfig, RateLimiter};
pub use retry::{RetryClass, RetryPolicy};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, TransportError};

/// Default number of concurrent workers for batch collection.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[inline]
pub fn ensure_concurrency_limit(limit: usize) -> usize {
    limit.max(1)
}
