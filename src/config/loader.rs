use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::{Context, Result};
use crate::models::Market;
use crate::vendors::Vendor;

use super::{Config, VendorConfig};

/// Where environment overrides are read from.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Build the effective configuration: builtin defaults, then the optional
/// JSON file, then environment overrides. Validation is left to the caller,
/// which knows which vendors it is about to use.
pub fn load_config(path: Option<&Path>, env: &dyn EnvSource) -> Result<Config> {
    let mut config = Config::builtin();

    if let Some(path) = path {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read config JSON at {}", path.display()))?;
        let raw: RawConfig = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse config JSON at {}", path.display()))?;
        raw.apply(&mut config);
        debug!("Loaded configuration overrides from {}", path.display());
    }

    apply_env(&mut config, env);
    Ok(config)
}

fn apply_env(config: &mut Config, env: &dyn EnvSource) {
    let read = |key: &str| env.var(key).filter(|value| !value.trim().is_empty());

    for vendor in Vendor::ALL {
        let prefix = vendor.env_prefix();
        let target = config.vendor_mut(vendor);
        if let Some(key) = read(&format!("{prefix}_APP_KEY")) {
            target.credentials.app_key = key;
        }
        if let Some(secret) = read(&format!("{prefix}_APP_SECRET")) {
            target.credentials.app_secret = secret;
        }
        if let Some(host) = read(&format!("{prefix}_API_HOST")) {
            target.base_url = host;
        }
    }

    if let Some(dir) = read("TOKEN_PATH") {
        config.paths.token_dir = PathBuf::from(dir);
    }
    if let Some(dir) = read("DATA_PATH") {
        config.paths.data_dir = PathBuf::from(dir);
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    vendors: HashMap<Vendor, RawVendorConfig>,
    #[serde(default)]
    collector: Option<RawCollectorConfig>,
    #[serde(default)]
    paths: Option<RawPathsConfig>,
}

impl RawConfig {
    fn apply(self, config: &mut Config) {
        for (vendor, raw) in self.vendors {
            raw.apply(config.vendor_mut(vendor));
        }
        if let Some(collector) = self.collector {
            if let Some(concurrency) = collector.concurrency {
                config.collector.concurrency = concurrency;
            }
            if let Some(secs) = collector.timeout_secs {
                config.collector.timeout = Duration::from_secs(secs);
            }
            if let Some(markets) = collector.markets {
                config.collector.markets = markets;
            }
        }
        if let Some(paths) = self.paths {
            if let Some(dir) = paths.token_dir {
                config.paths.token_dir = dir;
            }
            if let Some(dir) = paths.data_dir {
                config.paths.data_dir = dir;
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawVendorConfig {
    base_url: Option<String>,
    app_key: Option<String>,
    app_secret: Option<String>,
    rate_limit: Option<RawRateLimit>,
    retry: Option<RawRetry>,
    token_margin_secs: Option<u64>,
    token_attempts: Option<u32>,
    request_timeout_secs: Option<u64>,
    max_pages: Option<usize>,
}

impl RawVendorConfig {
    fn apply(self, target: &mut VendorConfig) {
        if let Some(url) = self.base_url {
            target.base_url = url;
        }
        if let Some(key) = self.app_key {
            target.credentials.app_key = key;
        }
        if let Some(secret) = self.app_secret {
            target.credentials.app_secret = secret;
        }
        if let Some(limit) = self.rate_limit {
            target.rate_limit.max_calls = limit.max_calls;
            target.rate_limit.window = Duration::from_millis(limit.window_ms);
        }
        if let Some(retry) = self.retry {
            if let Some(max_retries) = retry.max_retries {
                target.retry.max_retries = max_retries;
            }
            if let Some(ms) = retry.base_ms {
                target.retry.base = Duration::from_millis(ms);
            }
            if let Some(ms) = retry.cap_ms {
                target.retry.cap = Duration::from_millis(ms);
            }
            if let Some(jitter) = retry.jitter {
                target.retry.jitter = jitter;
            }
            if let Some(secs) = retry.max_hint_secs {
                target.retry.max_hint = Duration::from_secs(secs);
            }
        }
        if let Some(secs) = self.token_margin_secs {
            target.token_margin = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.token_attempts {
            target.token_attempts = attempts;
        }
        if let Some(secs) = self.request_timeout_secs {
            target.request_timeout = Duration::from_secs(secs);
        }
        if let Some(pages) = self.max_pages {
            target.max_pages = pages;
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRateLimit {
    max_calls: u32,
    window_ms: u64,
}

#[derive(Debug, Deserialize, Default)]
struct RawRetry {
    max_retries: Option<u32>,
    base_ms: Option<u64>,
    cap_ms: Option<u64>,
    jitter: Option<bool>,
    max_hint_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawCollectorConfig {
    concurrency: Option<usize>,
    timeout_secs: Option<u64>,
    markets: Option<Vec<Market>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPathsConfig {
    token_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn environment_overrides_builtin_values() {
        let vars = env(&[
            ("KIS_APP_KEY", "kis-key"),
            ("KIS_APP_SECRET", "kis-secret"),
            ("KIWOOM_API_HOST", "https://mockapi.kiwoom.com"),
            ("TOKEN_PATH", "/tmp/tokens"),
            ("KIWOOM_APP_KEY", "   "),
        ]);

        let config = load_config(None, &vars).unwrap();
        let kis = config.vendor(Vendor::KoreaInvestment).unwrap();
        assert_eq!(kis.credentials.app_key, "kis-key");
        assert_eq!(kis.credentials.app_secret, "kis-secret");

        let kiwoom = config.vendor(Vendor::Kiwoom).unwrap();
        assert_eq!(kiwoom.base_url, "https://mockapi.kiwoom.com");
        assert!(kiwoom.credentials.app_key.is_empty());
        assert_eq!(config.paths.token_dir, PathBuf::from("/tmp/tokens"));
    }

    #[test]
    fn file_values_sit_between_defaults_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.json");
        fs::write(
            &path,
            r#"{
                "vendors": {
                    "kis": {
                        "app_key": "from-file",
                        "rate_limit": { "max_calls": 2, "window_ms": 1000 },
                        "retry": { "max_retries": 5, "jitter": false, "max_hint_secs": 20 },
                        "max_pages": 7
                    }
                },
                "collector": { "concurrency": 8, "markets": ["KOSDAQ"] },
                "paths": { "data_dir": "out" }
            }"#,
        )
        .unwrap();

        let vars = env(&[("KIS_APP_KEY", "from-env")]);
        let config = load_config(Some(&path), &vars).unwrap();
        let kis = config.vendor(Vendor::KoreaInvestment).unwrap();

        assert_eq!(kis.credentials.app_key, "from-env");
        assert_eq!(kis.rate_limit.max_calls, 2);
        assert_eq!(kis.retry.max_retries, 5);
        assert!(!kis.retry.jitter);
        assert_eq!(kis.retry.max_hint, Duration::from_secs(20));
        assert_eq!(kis.retry.base, Duration::from_millis(500));
        assert_eq!(kis.max_pages, 7);
        assert_eq!(config.collector.concurrency, 8);
        assert_eq!(config.collector.markets, vec![Market::Kosdaq]);
        assert_eq!(config.paths.data_dir, PathBuf::from("out"));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_config(Some(&path), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config JSON"));
    }
}
