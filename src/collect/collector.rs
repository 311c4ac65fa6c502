//! Bounded-concurrency batch collection with a shared deadline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use log::{error, info, warn};
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::fetch::client::ResilientClient;
use crate::fetch::{ensure_concurrency_limit, fetch_daily_quotes};

use super::work::{BatchReport, Outcome, WorkItem};

/// Runs work items over a fixed pool of workers pulling from one queue.
///
/// A failing item never affects its siblings; only process-fatal errors
/// (token persistence, a closed manager) abort the batch.
pub struct BatchCollector {
    client: Arc<ResilientClient>,
    progress: Arc<AtomicUsize>,
    cancel: Arc<AtomicBool>,
}

struct BatchState<'a> {
    items: &'a [WorkItem],
    queue: Mutex<VecDeque<usize>>,
    slots: Mutex<Vec<Option<Outcome>>>,
    fatal: Mutex<Option<AppError>>,
    abort: AtomicBool,
    deadline: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BatchCollector {
    pub fn new(client: Arc<ResilientClient>) -> Self {
        Self::with_progress(client, Arc::new(AtomicUsize::new(0)))
    }

    /// Report progress through a counter owned by the caller.
    pub fn with_progress(client: Arc<ResilientClient>, progress: Arc<AtomicUsize>) -> Self {
        Self {
            client,
            progress,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Items finished so far in the running batch.
    pub fn progress_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.progress)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Items not yet started are reported as cancelled; in-flight ones finish.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub async fn collect(
        &self,
        items: Vec<WorkItem>,
        concurrency: usize,
        timeout: Duration,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let total = items.len();
        let workers = ensure_concurrency_limit(concurrency).min(total.max(1));
        self.progress.store(0, Ordering::SeqCst);

        info!(
            "Collecting {} item(s) with {} worker(s), deadline {:?}",
            total, workers, timeout
        );

        let state = BatchState {
            items: &items,
            queue: Mutex::new((0..total).collect()),
            slots: Mutex::new((0..total).map(|_| None).collect()),
            fatal: Mutex::new(None),
            abort: AtomicBool::new(false),
            deadline: started + timeout,
        };

        join_all((0..workers).map(|_| self.run_worker(&state))).await;

        let BatchState { slots, fatal, .. } = state;
        if let Some(err) = fatal.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Err(err);
        }

        let outcomes: Vec<Outcome> = slots
            .into_inner()
            .unwrap_or_else(|p| p.into_inner())
            .into_iter()
            .zip(items)
            .map(|(slot, item)| slot.unwrap_or_else(|| Outcome::timed_out(item)))
            .collect();
        let report = BatchReport::from_outcomes(outcomes, started.elapsed());

        info!(
            "Batch finished in {:?}: {} succeeded, {} failed, {} timed out, {} cancelled",
            report.elapsed, report.succeeded, report.failed, report.timed_out, report.cancelled
        );
        Ok(report)
    }

    async fn run_worker(&self, state: &BatchState<'_>) {
        loop {
            if state.abort.load(Ordering::SeqCst) {
                break;
            }
            let next = lock(&state.queue).pop_front();
            let Some(idx) = next else {
                break;
            };
            let item = &state.items[idx];

            let outcome = if self.cancel.load(Ordering::SeqCst) {
                Outcome::cancelled(item.clone())
            } else if Instant::now() >= state.deadline {
                Outcome::timed_out(item.clone())
            } else {
                let fetch = fetch_daily_quotes(
                    &self.client,
                    item.vendor,
                    &item.stock_code,
                    item.stock_name.as_deref(),
                    item.range,
                );
                match tokio::time::timeout_at(state.deadline, fetch).await {
                    Ok(Ok(series)) => Outcome::succeeded(item.clone(), series),
                    Ok(Err(err)) if err.is_process_fatal() => {
                        error!("Aborting batch at {}: {}", item.stock_code, err);
                        state.abort.store(true, Ordering::SeqCst);
                        lock(&state.fatal).get_or_insert(err);
                        break;
                    }
                    Ok(Err(err)) => {
                        warn!("{} {} failed: {}", item.vendor, item.stock_code, err);
                        Outcome::failed(item.clone(), &err)
                    }
                    Err(_) => {
                        warn!("{} {} hit the batch deadline", item.vendor, item.stock_code);
                        Outcome::timed_out(item.clone())
                    }
                }
            };

            lock(&state.slots)[idx] = Some(outcome);
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
    }
}
