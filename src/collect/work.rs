use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;
use crate::fetch::history::QuoteSeries;
use crate::models::{DateRange, QuoteRecord};
use crate::vendors::Vendor;

/// One stock's history request, routed to a vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub range: DateRange,
    pub vendor: Vendor,
}

impl WorkItem {
    pub fn new(vendor: Vendor, stock_code: impl Into<String>, range: DateRange) -> Self {
        Self {
            stock_code: stock_code.into(),
            stock_name: None,
            range,
            vendor,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.stock_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeStatus {
    Succeeded,
    /// Retriable failures used up the retry budget.
    Exhausted,
    /// Failure that retrying cannot fix (bad payload, rejected token, unsupported call).
    Fatal,
    TimedOut,
    Cancelled,
}

impl OutcomeStatus {
    pub fn for_error(err: &AppError) -> Self {
        match err {
            AppError::Timeout => OutcomeStatus::TimedOut,
            AppError::Cancelled => OutcomeStatus::Cancelled,
            AppError::RetriesExhausted { .. }
            | AppError::RateLimited { .. }
            | AppError::Transient { .. } => OutcomeStatus::Exhausted,
            _ => OutcomeStatus::Fatal,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub item: WorkItem,
    pub status: OutcomeStatus,
    pub records: Vec<QuoteRecord>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl Outcome {
    pub fn succeeded(item: WorkItem, series: QuoteSeries) -> Self {
        Self {
            item,
            status: OutcomeStatus::Succeeded,
            records: series.records,
            error: None,
            attempts: series.attempts,
        }
    }

    pub fn failed(item: WorkItem, err: &AppError) -> Self {
        let attempts = match err {
            AppError::RetriesExhausted { attempts, .. } => *attempts,
            _ => 1,
        };
        Self {
            item,
            status: OutcomeStatus::for_error(err),
            records: Vec::new(),
            error: Some(err.to_string()),
            attempts,
        }
    }

    pub fn timed_out(item: WorkItem) -> Self {
        Self {
            item,
            status: OutcomeStatus::TimedOut,
            records: Vec::new(),
            error: Some(AppError::Timeout.to_string()),
            attempts: 0,
        }
    }

    pub fn cancelled(item: WorkItem) -> Self {
        Self {
            item,
            status: OutcomeStatus::Cancelled,
            records: Vec::new(),
            error: Some(AppError::Cancelled.to_string()),
            attempts: 0,
        }
    }
}

/// Aggregate of one batch, outcomes in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub outcomes: Vec<Outcome>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<Outcome>, elapsed: Duration) -> Self {
        let count = |wanted: &[OutcomeStatus]| {
            outcomes
                .iter()
                .filter(|outcome| wanted.contains(&outcome.status))
                .count()
        };
        Self {
            total: outcomes.len(),
            succeeded: count(&[OutcomeStatus::Succeeded]),
            failed: count(&[OutcomeStatus::Exhausted, OutcomeStatus::Fatal]),
            timed_out: count(&[OutcomeStatus::TimedOut]),
            cancelled: count(&[OutcomeStatus::Cancelled]),
            outcomes,
            elapsed,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &QuoteRecord> {
        self.outcomes.iter().flat_map(|outcome| outcome.records.iter())
    }
}
