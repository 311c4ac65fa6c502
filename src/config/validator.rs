use crate::error::{AppError, Result};
use crate::vendors::Vendor;

use super::{Config, VendorConfig};

/// Validate the configuration and surface every problem at once.
pub fn validate_config(config: &Config, active: &[Vendor]) -> Result<()> {
    let mut issues = Vec::new();

    for vendor in Vendor::ALL {
        match config.vendors.get(&vendor) {
            Some(vendor_config) => {
                validate_vendor(vendor, vendor_config, active.contains(&vendor), &mut issues)
            }
            None if active.contains(&vendor) => {
                issues.push(format!("{vendor}: no configuration present"))
            }
            None => {}
        }
    }

    validate_collector(config, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::Config(issues))
    }
}

fn validate_vendor(vendor: Vendor, cfg: &VendorConfig, active: bool, issues: &mut Vec<String>) {
    let base = cfg.base_url.trim();
    if !(base.starts_with("https://") || base.starts_with("http://")) {
        issues.push(format!("{vendor}: base_url `{base}` must be an http(s) URL"));
    }

    if active {
        let prefix = vendor.env_prefix();
        if cfg.credentials.app_key.trim().is_empty() {
            issues.push(format!("{vendor}: {prefix}_APP_KEY is not set"));
        }
        if cfg.credentials.app_secret.trim().is_empty() {
            issues.push(format!("{vendor}: {prefix}_APP_SECRET is not set"));
        }
    }

    if cfg.rate_limit.max_calls == 0 {
        issues.push(format!("{vendor}: rate_limit.max_calls must be at least 1"));
    }
    if cfg.rate_limit.window.is_zero() {
        issues.push(format!("{vendor}: rate_limit.window must be positive"));
    }
    if cfg.retry.base > cfg.retry.cap {
        issues.push(format!(
            "{vendor}: retry base {:?} exceeds cap {:?}",
            cfg.retry.base, cfg.retry.cap
        ));
    }
    if cfg.token_attempts == 0 {
        issues.push(format!("{vendor}: token_attempts must be at least 1"));
    }
    if cfg.request_timeout.is_zero() {
        issues.push(format!("{vendor}: request_timeout must be positive"));
    }
    if cfg.max_pages == 0 {
        issues.push(format!("{vendor}: max_pages must be at least 1"));
    }
}

fn validate_collector(config: &Config, issues: &mut Vec<String>) {
    if config.collector.concurrency == 0 {
        issues.push("collector.concurrency must be at least 1".to_string());
    }
    if config.collector.timeout.is_zero() {
        issues.push("collector.timeout must be positive".to_string());
    }
    if config.collector.markets.is_empty() {
        issues.push("collector.markets must name at least one market".to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Credentials;

    #[test]
    fn credentials_are_required_only_for_active_vendors() {
        let mut config = Config::builtin();
        config.vendor_mut(Vendor::KoreaInvestment).credentials = Credentials::new("k", "s");

        assert!(validate_config(&config, &[Vendor::KoreaInvestment]).is_ok());

        let err = validate_config(&config, &[Vendor::Kiwoom, Vendor::KoreaInvestment]).unwrap_err();
        match err {
            AppError::Config(issues) => {
                assert_eq!(issues.len(), 2);
                assert!(issues[0].contains("KIWOOM_APP_KEY"));
                assert!(issues[1].contains("KIWOOM_APP_SECRET"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn collects_every_numeric_issue() {
        let mut config = Config::builtin();
        {
            let kis = config.vendor_mut(Vendor::KoreaInvestment);
            kis.base_url = "openapi.koreainvestment.com".into();
            kis.rate_limit.max_calls = 0;
            kis.retry.base = Duration::from_secs(30);
            kis.max_pages = 0;
        }
        config.collector.concurrency = 0;

        let Err(AppError::Config(issues)) = validate_config(&config, &[]) else {
            panic!("expected config error");
        };
        assert_eq!(issues.len(), 5, "{issues:?}");
    }
}
