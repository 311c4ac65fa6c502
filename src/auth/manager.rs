//! Per-vendor token cache with single-flight refresh.
//!
//! Each vendor has one async slot. Whoever finds the slot empty or near
//! expiry performs the refresh while holding the slot's lock; callers that
//! queue behind it re-check the slot and take the fresh token instead of
//! issuing their own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::VendorConfig;
use crate::error::{AppError, Result};
use crate::fetch::retry::{RetryClass, RetryPolicy};
use crate::vendors::Vendor;

use super::issuer::TokenIssuer;
use super::store::TokenStore;
use super::token::Token;

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub margin: Duration,
    pub attempts: u32,
    pub retry: RetryPolicy,
}

impl TokenSettings {
    pub fn from_config(config: &VendorConfig) -> Self {
        Self {
            margin: config.token_margin,
            attempts: config.token_attempts.max(1),
            retry: config.retry.clone(),
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(10 * 60),
            attempts: 3,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub vendor: Vendor,
    pub valid: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct TokenManager {
    issuer: Arc<dyn TokenIssuer>,
    store: Arc<dyn TokenStore>,
    settings: HashMap<Vendor, TokenSettings>,
    slots: HashMap<Vendor, Mutex<Option<Token>>>,
    closed: AtomicBool,
}

impl TokenManager {
    pub fn new(
        issuer: Arc<dyn TokenIssuer>,
        store: Arc<dyn TokenStore>,
        settings: HashMap<Vendor, TokenSettings>,
    ) -> Self {
        let slots = Vendor::ALL
            .iter()
            .map(|vendor| (*vendor, Mutex::new(None)))
            .collect();
        Self {
            issuer,
            store,
            settings,
            slots,
            closed: AtomicBool::new(false),
        }
    }

    fn settings(&self, vendor: Vendor) -> TokenSettings {
        self.settings.get(&vendor).cloned().unwrap_or_default()
    }

    fn slot(&self, vendor: Vendor) -> Result<&Mutex<Option<Token>>> {
        self.slots
            .get(&vendor)
            .ok_or_else(|| AppError::message(format!("no token slot for {vendor}")))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AppError::Closed)
        } else {
            Ok(())
        }
    }

    /// A token with more than the safety margin left, issuing one if needed.
    pub async fn get_token(&self, vendor: Vendor) -> Result<Token> {
        self.ensure_open()?;
        let settings = self.settings(vendor);
        let mut slot = self.slot(vendor)?.lock().await;
        self.ensure_open()?;

        if let Some(token) = slot.as_ref() {
            if token.is_usable(Utc::now(), settings.margin) {
                return Ok(token.clone());
            }
            debug!("Cached {} token is inside the expiry margin", vendor);
        } else if let Some(stored) = self.store.load(vendor)? {
            if stored.is_usable(Utc::now(), settings.margin) {
                info!("Reusing stored {} token, expires at {}", vendor, stored.expires_at);
                *slot = Some(stored.clone());
                return Ok(stored);
            }
            debug!("Stored {} token expires at {}; refreshing", vendor, stored.expires_at);
        }

        let token = self.refresh(vendor, &settings).await?;
        self.store.save(&token)?;
        *slot = Some(token.clone());
        Ok(token)
    }

    async fn refresh(&self, vendor: Vendor, settings: &TokenSettings) -> Result<Token> {
        let mut attempt: u32 = 0;
        loop {
            self.ensure_open()?;
            attempt += 1;

            let err = match self.issuer.issue(vendor).await {
                Ok(token) => return Ok(token),
                Err(err) => err,
            };

            if err.is_process_fatal() {
                return Err(err);
            }
            if err.retry_class() == RetryClass::WithBackoff && attempt < settings.attempts {
                let delay = settings.retry.delay_with_hint(attempt - 1, err.retry_after());
                warn!(
                    "{} token issuance attempt {}/{} failed: {}; retrying in {:?}",
                    vendor, attempt, settings.attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(match err {
                AppError::Authentication { .. } => err,
                other => AppError::authentication(
                    vendor,
                    format!("token issuance failed after {attempt} attempt(s): {other}"),
                ),
            });
        }
    }

    /// Drop the cached and stored token so the next call issues a new one.
    pub async fn invalidate(&self, vendor: Vendor) -> Result<()> {
        let mut slot = self.slot(vendor)?.lock().await;
        *slot = None;
        self.store.remove(vendor)?;
        info!("Invalidated {} token", vendor);
        Ok(())
    }

    /// Invalidate only if `stale` is still the cached token. Returns whether
    /// anything was dropped; a token refreshed in the meantime survives.
    pub async fn invalidate_stale(&self, vendor: Vendor, stale: &Token) -> Result<bool> {
        let mut slot = self.slot(vendor)?.lock().await;
        let matches = slot
            .as_ref()
            .map(|current| current.value == stale.value)
            .unwrap_or(false);
        if !matches {
            debug!("{} token already replaced; keeping the newer one", vendor);
            return Ok(false);
        }
        *slot = None;
        self.store.remove(vendor)?;
        info!("Invalidated rejected {} token", vendor);
        Ok(true)
    }

    /// Introspection only; never issues. While a refresh holds the slot the
    /// persisted record is reported instead of waiting for it.
    pub async fn status(&self, vendor: Vendor) -> Result<TokenStatus> {
        let settings = self.settings(vendor);
        let cached = match self.slot(vendor)?.try_lock() {
            Ok(slot) => slot.clone(),
            Err(_) => {
                debug!("{} token slot is busy; reporting the stored record", vendor);
                None
            }
        };
        let token = match cached {
            Some(token) => Some(token),
            None => self.store.load(vendor)?,
        };

        let now = Utc::now();
        Ok(TokenStatus {
            vendor,
            valid: token
                .as_ref()
                .map(|t| t.is_usable(now, settings.margin))
                .unwrap_or(false),
            issued_at: token.as_ref().map(|t| t.issued_at),
            expires_at: token.as_ref().map(|t| t.expires_at),
        })
    }

    /// Stop issuing. In-flight refreshes finish; later calls get `Closed`.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for vendor in Vendor::ALL {
            if let Some(slot) = self.slots.get(&vendor) {
                slot.lock().await.take();
            }
        }
        info!("Token manager shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
