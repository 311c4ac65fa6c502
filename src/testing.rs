//! In-memory doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::Instant;

use crate::auth::issuer::TokenIssuer;
use crate::auth::manager::{TokenManager, TokenSettings};
use crate::auth::store::{MemoryTokenStore, TokenStore};
use crate::auth::token::Token;
use crate::config::{Credentials, VendorConfig};
use crate::error::{AppError, Result};
use crate::fetch::client::ResilientClient;
use crate::fetch::rate_limit::{RateLimitConfig, RateLimiter};
use crate::fetch::transport::{ApiRequest, ApiResponse, HttpTransport, TransportError};
use crate::vendors::Vendor;

pub fn sample_token(vendor: Vendor, value: &str, expires_in: ChronoDuration) -> Token {
    let now = Utc::now();
    Token {
        vendor,
        value: value.to_string(),
        token_type: "Bearer".to_string(),
        issued_at: now,
        expires_at: now + expires_in,
    }
}

/// Vendor settings with credentials and a budget roomy enough to stay out of the way.
pub fn test_vendor_config(vendor: Vendor) -> VendorConfig {
    let mut config = VendorConfig::builtin(vendor);
    config.base_url = format!("https://{}.test", vendor.slug());
    config.credentials = Credentials::new("test-key", "test-secret");
    config.rate_limit = RateLimitConfig {
        max_calls: 1_000,
        window: Duration::from_secs(1),
    };
    config.max_pages = 5;
    config
}

pub type Handler = Box<dyn Fn(&ApiRequest) -> std::result::Result<ApiResponse, TransportError> + Send + Sync>;

/// Transport that replays queued replies, then falls back to a handler.
#[derive(Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<std::result::Result<ApiResponse, TransportError>>>,
    handler: Option<Handler>,
    latency: Option<Duration>,
    log: Mutex<Vec<(Instant, ApiRequest)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> std::result::Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_response(&self, response: ApiResponse) {
        self.queue.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.queue.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        self.log
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let queued = self.queue.lock().unwrap().pop_front();
        match (queued, &self.handler) {
            (Some(reply), _) => reply,
            (None, Some(handler)) => handler(&request),
            (None, None) => Err(TransportError::Other("script exhausted".into())),
        }
    }
}

/// Issuer that counts calls and hands out `<slug>-token-<n>`.
pub struct CountingIssuer {
    calls: Mutex<HashMap<Vendor, u32>>,
    failures: Mutex<HashMap<Vendor, VecDeque<AppError>>>,
    lifetimes: Mutex<HashMap<Vendor, VecDeque<ChronoDuration>>>,
    delay: Duration,
}

impl CountingIssuer {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            lifetimes: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_next(&self, vendor: Vendor, errors: Vec<AppError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(vendor)
            .or_default()
            .extend(errors);
    }

    /// Give the next issued token for `vendor` this lifetime instead of a day.
    pub fn expire_next(&self, vendor: Vendor, lifetime: ChronoDuration) {
        self.lifetimes
            .lock()
            .unwrap()
            .entry(vendor)
            .or_default()
            .push_back(lifetime);
    }

    pub fn calls(&self, vendor: Vendor) -> u32 {
        self.calls.lock().unwrap().get(&vendor).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TokenIssuer for CountingIssuer {
    async fn issue(&self, vendor: Vendor) -> Result<Token> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(vendor).or_insert(0);
            *entry += 1;
            *entry
        };
        if let Some(err) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&vendor)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        let lifetime = self
            .lifetimes
            .lock()
            .unwrap()
            .get_mut(&vendor)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ChronoDuration::hours(24));
        Ok(sample_token(
            vendor,
            &format!("{}-token-{}", vendor.slug(), n),
            lifetime,
        ))
    }
}

/// Store whose writes always fail, for process-fatal paths.
pub struct BrokenStore;

impl TokenStore for BrokenStore {
    fn load(&self, _vendor: Vendor) -> Result<Option<Token>> {
        Ok(None)
    }

    fn save(&self, _token: &Token) -> Result<()> {
        Err(AppError::TokenStore("read-only file system".into()))
    }

    fn remove(&self, _vendor: Vendor) -> Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub issuer: Arc<CountingIssuer>,
    pub tokens: Arc<TokenManager>,
    pub client: Arc<ResilientClient>,
}

pub fn harness(transport: ScriptedTransport) -> Harness {
    harness_with_store(transport, Arc::new(MemoryTokenStore::new()))
}

pub fn harness_with_store(transport: ScriptedTransport, store: Arc<dyn TokenStore>) -> Harness {
    let transport = Arc::new(transport);
    let issuer = Arc::new(CountingIssuer::new());
    let vendors: HashMap<Vendor, VendorConfig> = Vendor::ALL
        .iter()
        .map(|vendor| (*vendor, test_vendor_config(*vendor)))
        .collect();

    let settings = vendors
        .iter()
        .map(|(vendor, config)| (*vendor, TokenSettings::from_config(config)))
        .collect();
    let tokens = Arc::new(TokenManager::new(
        Arc::clone(&issuer) as Arc<dyn TokenIssuer>,
        store,
        settings,
    ));
    let limiter = Arc::new(RateLimiter::with_configs(
        vendors.iter().map(|(vendor, config)| (*vendor, config.rate_limit)),
    ));
    let client = Arc::new(ResilientClient::new(
        Arc::clone(&transport) as Arc<dyn HttpTransport>,
        Arc::clone(&tokens),
        limiter,
        vendors,
    ));

    Harness {
        transport,
        issuer,
        tokens,
        client,
    }
}

/// KIS daily-chart body with one bar per date.
pub fn kis_chart_body(name: &str, dates: &[&str]) -> String {
    let rows: Vec<serde_json::Value> = dates
        .iter()
        .map(|date| {
            serde_json::json!({
                "stck_bsop_date": date,
                "stck_oprc": "100", "stck_hgpr": "110", "stck_lwpr": "90", "stck_clpr": "105",
                "acml_vol": "1000", "acml_tr_pbmn": "105000",
                "flng_cls_code": "00", "prtt_rate": "0.00"
            })
        })
        .collect();
    serde_json::json!({
        "rt_cd": "0",
        "msg_cd": "MCA00000",
        "msg1": "정상처리 되었습니다.",
        "output1": { "hts_kor_isnm": name },
        "output2": rows
    })
    .to_string()
}
