use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, error, info};

use crate::config::CollectorConfig;
use crate::cursor::CursorStore;
use crate::error::CollectorError;
use crate::identity::ServerIdentity;
use crate::metrics::{MetricsSnapshot, RunMetrics};
use crate::schema::FetchTask;

use super::fetch::{FetchOperation, FetchOutcome};
use super::queue::TaskQueue;

/// One collection run over a fixed server list.
///
/// DESIGN:
/// - One queue shared by `thread_count` worker tasks
/// - Continuations go to the tail of the same queue
/// - Failures are isolated per server
///
/// The run always drains: there is no external cancellation, each fetch
/// is bounded by its timeout instead.
pub struct Collector {
    operation: Arc<FetchOperation>,
    cursors: Arc<CursorStore>,
    metrics: Arc<RunMetrics>,
    thread_count: usize,
    repeat_limit: u32,
}

impl Collector {
    pub fn new(
        cfg: &CollectorConfig,
        operation: FetchOperation,
        cursors: Arc<CursorStore>,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        Self {
            operation: Arc::new(operation),
            cursors,
            metrics,
            thread_count: cfg.thread_count.max(1),
            repeat_limit: cfg.repeat_limit,
        }
    }

    /// Collects from every server, then persists the cursors.
    ///
    /// SHUTDOWN:
    /// - Waits until the queue is empty and no worker is mid-fetch
    /// - Closes the queue, joins all workers
    /// - Writes the cursor file; only this step can fail the run
    pub async fn run(&self, servers: Vec<ServerIdentity>) -> Result<MetricsSnapshot, CollectorError> {
        let queue = Arc::new(TaskQueue::new());
        for identity in servers {
            queue.push(FetchTask::seed(identity, self.repeat_limit));
        }
        info!(
            "Collecting from {} servers with {} workers",
            queue.len(),
            self.thread_count
        );

        let workers: Vec<_> = (1..=self.thread_count)
            .map(|n| {
                tokio::spawn(run_worker(
                    format!("Worker-{}", n),
                    queue.clone(),
                    self.operation.clone(),
                ))
            })
            .collect();

        queue.drain().await;

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Worker terminated abnormally: {}", e);
            }
        }

        let cursors = self.cursors.clone();
        tokio::task::spawn_blocking(move || cursors.persist())
            .await
            .map_err(|e| CollectorError::Persist {
                path: self.cursors.path().display().to_string(),
                source: std::io::Error::other(e),
            })??;
        debug!(
            "Persisted {} cursors to {}",
            self.cursors.len(),
            self.cursors.path().display()
        );

        Ok(self.metrics.snapshot())
    }
}

/// Worker loop: claim, fetch, complete, until the queue closes.
async fn run_worker(name: String, queue: Arc<TaskQueue>, operation: Arc<FetchOperation>) {
    debug!("Starting {}", name);

    while let Some(claim) = queue.claim().await {
        let next = match operation.execute(claim.task()).await {
            FetchOutcome::Continue(task) => Some(task),
            FetchOutcome::Done | FetchOutcome::BudgetExhausted | FetchOutcome::Failed(_) => None,
        };
        claim.complete(next);
    }

    debug!("Exiting {}", name);
}
