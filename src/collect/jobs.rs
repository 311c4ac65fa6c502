//! Background collection runs that callers can poll, wait on or cancel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

use super::collector::BatchCollector;
use super::work::{BatchReport, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionOptions {
    pub concurrency: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Running { completed: usize, total: usize },
    Finished(Arc<BatchReport>),
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished(_) | JobStatus::Failed(_))
    }
}

pub struct CollectionJob {
    status: watch::Receiver<JobStatus>,
    progress: Arc<AtomicUsize>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl CollectionJob {
    /// Current status; `Running` carries live progress.
    pub fn status(&self) -> JobStatus {
        match &*self.status.borrow() {
            JobStatus::Running { total, .. } => JobStatus::Running {
                completed: self.progress.load(Ordering::SeqCst),
                total: *total,
            },
            other => other.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Items finished so far by this job alone.
    pub fn progress_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.progress)
    }

    /// Flag that cancels this job, usable after `wait` has taken the handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(mut self) -> Result<Arc<BatchReport>> {
        loop {
            match &*self.status.borrow_and_update() {
                JobStatus::Finished(report) => return Ok(Arc::clone(report)),
                JobStatus::Failed(message) => return Err(AppError::message(message.clone())),
                _ => {}
            }
            if self.status.changed().await.is_err() {
                break;
            }
        }

        match &*self.status.borrow() {
            JobStatus::Finished(report) => Ok(Arc::clone(report)),
            JobStatus::Failed(message) => Err(AppError::message(message.clone())),
            _ => Err(AppError::message("collection task ended without a result")),
        }
    }
}

/// Run `collector` over `items` on the runtime and return a handle to it.
pub fn spawn_collection(
    collector: BatchCollector,
    items: Vec<WorkItem>,
    options: CollectionOptions,
) -> CollectionJob {
    let (tx, rx) = watch::channel(JobStatus::Pending);
    let progress = collector.progress_counter();
    let cancel = collector.cancel_flag();
    let total = items.len();

    let handle = tokio::spawn(async move {
        let _ = tx.send(JobStatus::Running {
            completed: 0,
            total,
        });
        let status = match collector
            .collect(items, options.concurrency, options.timeout)
            .await
        {
            Ok(report) => JobStatus::Finished(Arc::new(report)),
            Err(err) => {
                error!("Collection job failed: {}", err);
                JobStatus::Failed(err.to_string())
            }
        };
        let _ = tx.send(status);
    });

    CollectionJob {
        status: rx,
        progress,
        cancel,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::transport::ApiResponse;
    use crate::models::DateRange;
    use crate::testing::{harness, harness_with_store, kis_chart_body, BrokenStore, ScriptedTransport};
    use crate::vendors::Vendor;
    use chrono::NaiveDate;

    fn items(count: usize) -> Vec<WorkItem> {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        (0..count)
            .map(|n| {
                WorkItem::new(Vendor::KoreaInvestment, format!("{:06}", n), DateRange::single(day))
            })
            .collect()
    }

    fn options() -> CollectionOptions {
        CollectionOptions {
            concurrency: 2,
            timeout: Duration::from_secs(30),
        }
    }

    fn chart_transport() -> ScriptedTransport {
        ScriptedTransport::with_handler(|_| {
            Ok(ApiResponse::new(200, kis_chart_body("종목", &["20240105"])))
        })
    }

    #[tokio::test]
    async fn job_finishes_with_a_report() {
        let h = harness(chart_transport());
        let job = spawn_collection(BatchCollector::new(Arc::clone(&h.client)), items(4), options());

        let report = job.wait().await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded, 4);
    }

    #[tokio::test]
    async fn fatal_batch_surfaces_as_failed_job() {
        let h = harness_with_store(chart_transport(), Arc::new(BrokenStore));
        let job = spawn_collection(BatchCollector::new(Arc::clone(&h.client)), items(2), options());

        let err = job.wait().await.unwrap_err();
        assert!(err.to_string().contains("token store failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_pending_items() {
        let transport = chart_transport().with_latency(Duration::from_millis(200));
        let h = harness(transport);
        let job = spawn_collection(
            BatchCollector::new(Arc::clone(&h.client)),
            items(6),
            CollectionOptions {
                concurrency: 1,
                timeout: Duration::from_secs(30),
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(job.status(), JobStatus::Running { total: 6, .. }));
        job.cancel();

        let report = job.wait().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.cancelled, 5);
    }
}
