use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::fetch::rate_limit::RateLimitConfig;
use crate::fetch::retry::RetryPolicy;
use crate::fetch::DEFAULT_CONCURRENCY;
use crate::models::Market;
use crate::vendors::Vendor;

pub mod loader;
pub mod validator;

pub use loader::{load_config, EnvSource, ProcessEnv};

pub const KIWOOM_API_HOST: &str = "https://api.kiwoom.com";
pub const KIS_API_HOST: &str = "https://openapi.koreainvestment.com:9443";

/// Application key pair issued by a vendor's developer portal.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub app_key: String,
    pub app_secret: String,
}

impl Credentials {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.app_key.trim().is_empty() && !self.app_secret.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |value: &str| if value.is_empty() { "<unset>" } else { "***" };
        f.debug_struct("Credentials")
            .field("app_key", &mask(&self.app_key))
            .field("app_secret", &mask(&self.app_secret))
            .finish()
    }
}

/// Everything needed to talk to one vendor.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    /// Tokens are treated as expired this long before their real expiry.
    pub token_margin: Duration,
    /// Issuance attempts before a refresh gives up.
    pub token_attempts: u32,
    pub request_timeout: Duration,
    /// Upper bound on continuation pages for one logical request.
    pub max_pages: usize,
}

impl VendorConfig {
    pub fn builtin(vendor: Vendor) -> Self {
        let (base_url, max_calls) = match vendor {
            Vendor::Kiwoom => (KIWOOM_API_HOST, 5),
            Vendor::KoreaInvestment => (KIS_API_HOST, 18),
        };
        Self {
            base_url: base_url.to_string(),
            credentials: Credentials::default(),
            rate_limit: RateLimitConfig {
                max_calls,
                window: Duration::from_secs(1),
            },
            retry: RetryPolicy::default(),
            token_margin: Duration::from_secs(10 * 60),
            token_attempts: 3,
            request_timeout: Duration::from_secs(10),
            max_pages: 50,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub markets: Vec<Market>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(30 * 60),
            markets: Market::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub token_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            token_dir: PathBuf::from("config/tokens"),
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub vendors: HashMap<Vendor, VendorConfig>,
    pub collector: CollectorConfig,
    pub paths: PathsConfig,
}

impl Config {
    pub fn builtin() -> Self {
        let vendors = Vendor::ALL
            .iter()
            .map(|vendor| (*vendor, VendorConfig::builtin(*vendor)))
            .collect();

        Config {
            vendors,
            collector: CollectorConfig::default(),
            paths: PathsConfig::default(),
        }
    }

    pub fn vendor(&self, vendor: Vendor) -> Result<&VendorConfig> {
        self.vendors
            .get(&vendor)
            .ok_or_else(|| AppError::Config(vec![format!("no configuration for {vendor}")]))
    }

    pub fn vendor_mut(&mut self, vendor: Vendor) -> &mut VendorConfig {
        self.vendors
            .entry(vendor)
            .or_insert_with(|| VendorConfig::builtin(vendor))
    }

    /// Check the whole configuration, requiring credentials only for `active` vendors.
    pub fn validate_for(&self, active: &[Vendor]) -> Result<()> {
        validator::validate_config(self, active)
    }
}
