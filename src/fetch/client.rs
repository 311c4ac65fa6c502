//! Token-aware, rate-limited, retrying access to the vendor data APIs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use crate::auth::manager::TokenManager;
use crate::config::VendorConfig;
use crate::error::{AppError, Result};
use crate::fetch::rate_limit::RateLimiter;
use crate::fetch::retry::RetryClass;
use crate::fetch::transport::HttpTransport;
use crate::auth::issuer::transport_failure;
use crate::vendors::{self, Operation, PageCursor, Vendor};

/// Successful, classified response of one logical request.
#[derive(Debug, Clone)]
pub struct ApiPayload {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    /// HTTP attempts spent, including re-authentication and backoff retries.
    pub attempts: u32,
}

pub struct ResilientClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    limiter: Arc<RateLimiter>,
    vendors: HashMap<Vendor, VendorConfig>,
}

impl ResilientClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenManager>,
        limiter: Arc<RateLimiter>,
        vendors: HashMap<Vendor, VendorConfig>,
    ) -> Self {
        Self {
            transport,
            tokens,
            limiter,
            vendors,
        }
    }

    pub fn vendor_config(&self, vendor: Vendor) -> Result<&VendorConfig> {
        self.vendors
            .get(&vendor)
            .ok_or_else(|| AppError::Config(vec![format!("no configuration for {vendor}")]))
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn request(&self, vendor: Vendor, operation: &Operation) -> Result<ApiPayload> {
        self.request_page(vendor, operation, None).await
    }

    /// One page of `operation`, retried according to how each failure classifies.
    ///
    /// A rejected token is invalidated (only if it is still the cached one)
    /// and the call repeated once at once; a second rejection is final.
    /// Rate-limit and transient failures back off exponentially, up to the
    /// vendor's retry budget.
    pub async fn request_page(
        &self,
        vendor: Vendor,
        operation: &Operation,
        cursor: Option<&PageCursor>,
    ) -> Result<ApiPayload> {
        vendors::ensure_supported(vendor, operation)?;
        let config = self.vendor_config(vendor)?;
        let policy = &config.retry;

        let mut attempts: u32 = 0;
        let mut backoff_retries: u32 = 0;
        let mut reauthenticated = false;

        loop {
            let token = self.tokens.get_token(vendor).await?;
            let request = vendors::build_request(vendor, config, &token, operation, cursor)?;

            self.limiter.acquire(vendor).await;
            attempts += 1;
            debug!("{} {} attempt {}", vendor, operation.name(), attempts);

            let result = match self.transport.execute(request).await {
                Ok(response) => vendors::classify_response(vendor, &response).map(|body| {
                    ApiPayload {
                        status: response.status,
                        headers: response.headers.clone(),
                        body,
                        attempts,
                    }
                }),
                Err(err) => Err(transport_failure(vendor, err)),
            };

            let err = match result {
                Ok(payload) => return Ok(payload),
                Err(err) => err,
            };

            match err.retry_class() {
                RetryClass::Reauthenticate if !reauthenticated => {
                    reauthenticated = true;
                    info!("{} rejected the token ({}); re-authenticating", vendor, err);
                    self.tokens.invalidate_stale(vendor, &token).await?;
                }
                RetryClass::Reauthenticate => {
                    warn!("{} rejected a freshly issued token", vendor);
                    return Err(err);
                }
                RetryClass::WithBackoff if backoff_retries < policy.max_retries => {
                    let delay = policy.delay_with_hint(backoff_retries, err.retry_after());
                    backoff_retries += 1;
                    warn!(
                        "{} {} failed: {}; retry {}/{} in {:?}",
                        vendor,
                        operation.name(),
                        err,
                        backoff_retries,
                        policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryClass::WithBackoff => {
                    return Err(AppError::RetriesExhausted {
                        vendor,
                        attempts,
                        last: Box::new(err),
                    });
                }
                RetryClass::Never => return Err(err),
            }
        }
    }
}
