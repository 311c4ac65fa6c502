use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{info, warn};

use crate::auth::{
    FileTokenStore, TokenIssuer, TokenManager, TokenSettings, TokenStatus, TokenStore,
    VendorIssuer,
};
use crate::collect::{
    spawn_collection, BatchCollector, BatchReport, CollectionJob, CollectionOptions, WorkItem,
};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetch::{
    fetch_stock_list, HttpTransport, RateLimiter, ReqwestTransport, ResilientClient,
};
use crate::models::{DateRange, Stock};
use crate::vendors::Vendor;

/// Wires transport, token lifecycle, rate limiting and batch collection
/// together for the command-line entry points.
pub struct QuoteService {
    config: Config,
    tokens: Arc<TokenManager>,
    client: Arc<ResilientClient>,
    progress: Mutex<Arc<AtomicUsize>>,
}

impl QuoteService {
    pub fn from_config(config: Config) -> Result<Self> {
        let timeout = config
            .vendors
            .values()
            .map(|vendor| vendor.request_timeout)
            .max()
            .unwrap_or_default();
        let transport = ReqwestTransport::new(timeout)?;
        let store = FileTokenStore::new(config.paths.token_dir.clone());
        Ok(Self::with_parts(config, Arc::new(transport), Arc::new(store)))
    }

    pub fn with_parts(
        config: Config,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let issuer = VendorIssuer::new(Arc::clone(&transport), config.vendors.clone());
        let settings: HashMap<Vendor, TokenSettings> = config
            .vendors
            .iter()
            .map(|(vendor, cfg)| (*vendor, TokenSettings::from_config(cfg)))
            .collect();
        let tokens = Arc::new(TokenManager::new(
            Arc::new(issuer) as Arc<dyn TokenIssuer>,
            store,
            settings,
        ));
        let limiter = Arc::new(RateLimiter::with_configs(
            config
                .vendors
                .iter()
                .map(|(vendor, cfg)| (*vendor, cfg.rate_limit)),
        ));
        let client = Arc::new(ResilientClient::new(
            transport,
            Arc::clone(&tokens),
            limiter,
            config.vendors.clone(),
        ));

        Self {
            config,
            tokens,
            client,
            progress: Mutex::new(Arc::new(AtomicUsize::new(0))),
        }
    }

    /// Items finished by the most recent batch started through this service.
    pub fn progress_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.progress.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Every listed stock of the configured markets, first occurrence of a code wins.
    ///
    /// A market that fails is logged and skipped; the call fails only when no
    /// market could be listed or the failure is process-fatal.
    pub async fn fetch_listing(&self, vendor: Vendor) -> Result<Vec<Stock>> {
        let mut seen = HashSet::new();
        let mut stocks = Vec::new();
        let mut last_error = None;
        let mut listed_markets = 0;
        for market in &self.config.collector.markets {
            let listed = match fetch_stock_list(&self.client, vendor, *market).await {
                Ok(listed) => listed,
                Err(err) if err.is_process_fatal() => return Err(err),
                Err(err @ AppError::Unsupported { .. }) => return Err(err),
                Err(err) => {
                    warn!("{} {} listing failed: {}", vendor, market, err);
                    last_error = Some(err);
                    continue;
                }
            };
            listed_markets += 1;
            for stock in listed {
                if seen.insert(stock.code.clone()) {
                    stocks.push(stock);
                }
            }
        }
        if listed_markets == 0 {
            if let Some(err) = last_error {
                return Err(err);
            }
        }
        info!(
            "{} listing: {} stocks across {} market(s)",
            vendor,
            stocks.len(),
            self.config.collector.markets.len()
        );
        Ok(stocks)
    }

    pub fn work_items(&self, vendor: Vendor, stocks: &[Stock], range: DateRange) -> Vec<WorkItem> {
        stocks
            .iter()
            .map(|stock| {
                WorkItem::new(vendor, stock.code.clone(), range).with_name(stock.name.clone())
            })
            .collect()
    }

    pub fn default_options(&self) -> CollectionOptions {
        CollectionOptions {
            concurrency: self.config.collector.concurrency,
            timeout: self.config.collector.timeout,
        }
    }

    pub async fn fetch_quotes(
        &self,
        items: Vec<WorkItem>,
        concurrency: usize,
        timeout: Duration,
    ) -> Result<BatchReport> {
        self.collector().collect(items, concurrency, timeout).await
    }

    pub fn spawn_quotes(&self, items: Vec<WorkItem>, options: CollectionOptions) -> CollectionJob {
        spawn_collection(self.collector(), items, options)
    }

    pub async fn get_token_status(&self, vendor: Vendor) -> Result<TokenStatus> {
        self.tokens.status(vendor).await
    }

    /// Issue (or reuse) a token so failures surface before a batch starts.
    pub async fn authenticate(&self, vendor: Vendor) -> Result<TokenStatus> {
        self.tokens.get_token(vendor).await?;
        self.tokens.status(vendor).await
    }

    pub async fn shutdown(&self) {
        self.tokens.shutdown().await;
    }

    /// Fresh collector whose counter becomes the service's current one.
    fn collector(&self) -> BatchCollector {
        let progress = Arc::new(AtomicUsize::new(0));
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&progress);
        BatchCollector::with_progress(Arc::clone(&self.client), progress)
    }
}
