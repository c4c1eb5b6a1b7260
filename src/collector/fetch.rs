use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::config::CollectorConfig;
use crate::cursor::CursorStore;
use crate::error::CollectorError;
use crate::identity::ServerIdentity;
use crate::metrics::RunMetrics;
use crate::schema::FetchTask;
use crate::sink::RecordSink;
use crate::util;
use crate::xroad::BatchFetcher;

/// Window and pagination parameters of a single fetch.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub records_from_offset: i64,
    pub records_to_offset: i64,
    pub repeat_min_records: usize,
    pub timeout: Duration,
}

impl From<&CollectorConfig> for FetchSettings {
    fn from(cfg: &CollectorConfig) -> Self {
        Self {
            records_from_offset: cfg.records_from_offset,
            records_to_offset: cfg.records_to_offset,
            repeat_min_records: cfg.repeat_min_records,
            timeout: cfg.timeout(),
        }
    }
}

/// What a worker should do after one fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Server is caught up for this run.
    Done,

    /// Full batch received; query again with the carried task.
    Continue(FetchTask),

    /// Full batch received but no repeats left. The server is lagging.
    BudgetExhausted,

    /// Nothing was recorded; the next run retries the same window.
    Failed(CollectorError),
}

/// Executes one `FetchTask` against the shared fetcher, sink and cursors.
///
/// RESPONSIBILITIES:
/// - Request window computation
/// - Forwarding records to the server's sink
/// - Advancing the server's cursor
/// - Deciding whether to continue
///
/// NOT RESPONSIBLE FOR:
/// - Queueing the continuation (the worker does that)
/// - Wire format (delegated to the fetcher)
pub struct FetchOperation {
    fetcher: Arc<dyn BatchFetcher>,
    sink: Arc<dyn RecordSink>,
    cursors: Arc<CursorStore>,
    metrics: Arc<RunMetrics>,
    settings: FetchSettings,
    clock: fn() -> i64,
}

impl FetchOperation {
    pub fn new(
        fetcher: Arc<dyn BatchFetcher>,
        sink: Arc<dyn RecordSink>,
        cursors: Arc<CursorStore>,
        metrics: Arc<RunMetrics>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            fetcher,
            sink,
            cursors,
            metrics,
            settings,
            clock: util::now_secs,
        }
    }

    /// Replaces the wall clock (Unix seconds).
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub async fn execute(&self, task: &FetchTask) -> FetchOutcome {
        let outcome = self.try_execute(task).await;

        match &outcome {
            FetchOutcome::Failed(e) => {
                warn!("[{}] {}", task.identity, e);
                RunMetrics::incr(&self.metrics.fetch_failures);
            }
            FetchOutcome::Continue(_) => RunMetrics::incr(&self.metrics.continuations),
            FetchOutcome::BudgetExhausted => {
                warn!("[{}] Maximum repeats reached for server", task.identity);
                RunMetrics::incr(&self.metrics.budget_exhausted);
                RunMetrics::incr(&self.metrics.servers_done);
            }
            FetchOutcome::Done => RunMetrics::incr(&self.metrics.servers_done),
        }

        outcome
    }

    async fn try_execute(&self, task: &FetchTask) -> FetchOutcome {
        let identity = &task.identity;
        let now = (self.clock)();

        let records_from = match self.cursors.get(identity.descriptor()) {
            Some(position) => position,
            None => {
                debug!("[{}] Using defaults for recordsFrom", identity);
                (now - self.settings.records_from_offset).to_string()
            }
        };
        let records_to = now - self.settings.records_to_offset;

        if task.first_attempt {
            info!("[{}] Collecting from {} to {}", identity, records_from, records_to);
        } else {
            info!(
                "[{}] Collecting continuation from {} to {} ({} repeats left)",
                identity, records_from, records_to, task.repeat_budget
            );
        }
        RunMetrics::incr(&self.metrics.fetch_attempts);

        let call = self.fetcher.fetch_batch(identity, &records_from, records_to);
        let batch = match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => return FetchOutcome::Failed(e),
            Err(_) => {
                return FetchOutcome::Failed(CollectorError::Timeout(
                    self.settings.timeout.as_secs_f64(),
                ));
            }
        };

        let count = batch.records.len();

        if count > 0 {
            if let Err(e) = self.append(identity, batch.records).await {
                return FetchOutcome::Failed(e);
            }
            info!("[{}] Appended {} records", identity, count);
            self.metrics
                .records_collected
                .fetch_add(count, std::sync::atomic::Ordering::Relaxed);
        } else {
            debug!("[{}] No data found", identity);
        }

        // Without a token the whole window counts as consumed.
        let next_from = batch
            .continuation
            .unwrap_or_else(|| (records_to + 1).to_string());
        debug!("[{}] nextRecordsFrom={}", identity, next_from);
        self.cursors.update(identity.descriptor(), next_from).await;

        if count < self.settings.repeat_min_records {
            debug!(
                "[{}] Not enough data received ({}) to repeat query",
                identity, count
            );
            return FetchOutcome::Done;
        }

        match task.continuation() {
            Some(next) => {
                debug!(
                    "[{}] Queueing continuation, {} repeats left",
                    identity, next.repeat_budget
                );
                FetchOutcome::Continue(next)
            }
            None => FetchOutcome::BudgetExhausted,
        }
    }

    /// Hands the records to the sink on the blocking pool; file writes
    /// and rotation must not stall the runtime.
    async fn append(&self, identity: &ServerIdentity, records: Vec<Value>) -> Result<(), CollectorError> {
        tokio::task::spawn_blocking({
            let sink = self.sink.clone();
            let identity = identity.clone();
            move || sink.append(&identity, &records)
        })
        .await
        .map_err(|e| CollectorError::Sink(io::Error::other(e)))??;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::FetchBatch;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const NOW: i64 = 1_000_000;

    pub fn fixed_clock() -> i64 {
        NOW
    }

    /// Replays queued answers per server; unknown servers get empty batches.
    #[derive(Default)]
    pub struct ScriptedFetcher {
        pub answers: Mutex<HashMap<String, VecDeque<Result<FetchBatch, CollectorError>>>>,
        pub calls: Mutex<Vec<(String, String, i64)>>,
        pub attempts: AtomicUsize,
    }

    impl ScriptedFetcher {
        pub fn script(&self, descriptor: &str, answer: Result<FetchBatch, CollectorError>) {
            self.answers
                .lock()
                .unwrap()
                .entry(descriptor.to_string())
                .or_default()
                .push_back(answer);
        }
    }

    #[async_trait::async_trait]
    impl BatchFetcher for ScriptedFetcher {
        async fn fetch_batch(
            &self,
            identity: &ServerIdentity,
            records_from: &str,
            records_to: i64,
        ) -> Result<FetchBatch, CollectorError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push((
                identity.descriptor().to_string(),
                records_from.to_string(),
                records_to,
            ));
            tokio::task::yield_now().await;

            self.answers
                .lock()
                .unwrap()
                .get_mut(identity.descriptor())
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Ok(FetchBatch::default()))
        }
    }

    /// Remembers the size of every appended batch per server.
    #[derive(Default)]
    pub struct MemorySink {
        pub batches: Mutex<HashMap<String, Vec<usize>>>,
        pub fail: bool,
    }

    impl RecordSink for MemorySink {
        fn append(&self, identity: &ServerIdentity, records: &[Value]) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("disk full"));
            }
            self.batches
                .lock()
                .unwrap()
                .entry(identity.normalized().to_string())
                .or_default()
                .push(records.len());
            Ok(())
        }
    }

    struct SlowFetcher;

    #[async_trait::async_trait]
    impl BatchFetcher for SlowFetcher {
        async fn fetch_batch(
            &self,
            _: &ServerIdentity,
            _: &str,
            _: i64,
        ) -> Result<FetchBatch, CollectorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(FetchBatch::default())
        }
    }

    pub fn records(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "messageId": i })).collect()
    }

    pub fn settings(repeat_min_records: usize) -> FetchSettings {
        FetchSettings {
            records_from_offset: 3600,
            records_to_offset: 100,
            repeat_min_records,
            timeout: Duration::from_secs(2),
        }
    }

    const A: &str = "EE/GOV/1/ss/a";

    fn operation(
        fetcher: Arc<dyn BatchFetcher>,
        sink: Arc<dyn RecordSink>,
        cursors: Arc<CursorStore>,
        settings: FetchSettings,
    ) -> (FetchOperation, Arc<RunMetrics>) {
        let metrics = Arc::new(RunMetrics::default());
        let op = FetchOperation::new(fetcher, sink, cursors, metrics.clone(), settings)
            .with_clock(fixed_clock);
        (op, metrics)
    }

    fn task(budget: u32) -> FetchTask {
        FetchTask::seed(ServerIdentity::parse(A).unwrap(), budget)
    }

    #[tokio::test]
    async fn first_query_uses_default_window() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let cursors = Arc::new(CursorStore::in_memory("unused.json"));
        let (op, _) = operation(fetcher.clone(), Arc::new(MemorySink::default()), cursors.clone(), settings(5));

        assert!(matches!(op.execute(&task(3)).await, FetchOutcome::Done));

        let calls = fetcher.calls.lock().unwrap();
        assert_eq!(calls[0], (A.to_string(), (NOW - 3600).to_string(), NOW - 100));
        assert_eq!(cursors.get(A), Some((NOW - 100 + 1).to_string()));
    }

    #[tokio::test]
    async fn resumes_from_stored_cursor_and_takes_token() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(A, Ok(FetchBatch { records: records(1), continuation: Some("999950".into()) }));
        let cursors = Arc::new(CursorStore::in_memory("unused.json"));
        cursors.set(A, "999000".into());
        let (op, _) = operation(fetcher.clone(), Arc::new(MemorySink::default()), cursors.clone(), settings(5));

        op.execute(&task(3)).await;

        assert_eq!(fetcher.calls.lock().unwrap()[0].1, "999000");
        assert_eq!(cursors.get(A).as_deref(), Some("999950"));
    }

    #[tokio::test]
    async fn full_batch_with_budget_continues_once() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(A, Ok(FetchBatch { records: records(5), continuation: Some("999500".into()) }));
        let (op, metrics) = operation(
            fetcher,
            Arc::new(MemorySink::default()),
            Arc::new(CursorStore::in_memory("unused.json")),
            settings(5),
        );

        match op.execute(&task(2)).await {
            FetchOutcome::Continue(next) => {
                assert_eq!(next.repeat_budget, 1);
                assert!(!next.first_attempt);
            }
            other => panic!("expected continuation, got {:?}", other),
        }
        assert_eq!(metrics.snapshot().continuations, 1);
    }

    #[tokio::test]
    async fn spent_budget_reports_exhaustion() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(A, Ok(FetchBatch { records: records(50), continuation: Some("999500".into()) }));
        let (op, metrics) = operation(
            fetcher,
            Arc::new(MemorySink::default()),
            Arc::new(CursorStore::in_memory("unused.json")),
            settings(5),
        );

        assert!(matches!(op.execute(&task(0)).await, FetchOutcome::BudgetExhausted));
        assert_eq!(metrics.snapshot().budget_exhausted, 1);
        assert_eq!(metrics.snapshot().continuations, 0);
    }

    #[tokio::test]
    async fn short_batch_is_done_even_with_budget() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(A, Ok(FetchBatch { records: records(4), continuation: None }));
        let (op, _) = operation(
            fetcher,
            Arc::new(MemorySink::default()),
            Arc::new(CursorStore::in_memory("unused.json")),
            settings(5),
        );

        assert!(matches!(op.execute(&task(10)).await, FetchOutcome::Done));
    }

    #[tokio::test]
    async fn transport_failure_leaves_cursor_untouched() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(A, Err(CollectorError::Transport("connection refused".into())));
        let cursors = Arc::new(CursorStore::in_memory("unused.json"));
        cursors.set(A, "123".into());
        let sink = Arc::new(MemorySink::default());
        let (op, metrics) = operation(fetcher, sink.clone(), cursors.clone(), settings(5));

        assert!(matches!(
            op.execute(&task(3)).await,
            FetchOutcome::Failed(CollectorError::Transport(_))
        ));
        assert_eq!(cursors.get(A).as_deref(), Some("123"));
        assert!(sink.batches.lock().unwrap().is_empty());
        assert_eq!(metrics.snapshot().fetch_failures, 1);
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let cursors = Arc::new(CursorStore::in_memory("unused.json"));
        let mut s = settings(5);
        s.timeout = Duration::from_millis(50);
        let (op, _) = operation(Arc::new(SlowFetcher), Arc::new(MemorySink::default()), cursors.clone(), s);

        assert!(matches!(
            op.execute(&task(3)).await,
            FetchOutcome::Failed(CollectorError::Timeout(_))
        ));
        assert_eq!(cursors.get(A), None);
    }

    #[tokio::test]
    async fn sink_failure_keeps_window_for_next_run() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(A, Ok(FetchBatch { records: records(10), continuation: Some("999999".into()) }));
        let cursors = Arc::new(CursorStore::in_memory("unused.json"));
        let sink = Arc::new(MemorySink { fail: true, ..Default::default() });
        let (op, _) = operation(fetcher, sink, cursors.clone(), settings(5));

        assert!(matches!(
            op.execute(&task(3)).await,
            FetchOutcome::Failed(CollectorError::Sink(_))
        ));
        assert_eq!(cursors.get(A), None);
    }

    /// Notes which thread performed each append.
    #[derive(Default)]
    struct ThreadSink {
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl RecordSink for ThreadSink {
        fn append(&self, _: &ServerIdentity, _: &[Value]) -> io::Result<()> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sink_writes_run_off_the_runtime_thread() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.script(A, Ok(FetchBatch { records: records(3), continuation: None }));
        let sink = Arc::new(ThreadSink::default());
        let (op, metrics) = operation(
            fetcher,
            sink.clone(),
            Arc::new(CursorStore::in_memory("unused.json")),
            settings(5),
        );

        assert!(matches!(op.execute(&task(1)).await, FetchOutcome::Done));

        let threads = sink.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
        assert_eq!(metrics.snapshot().records_collected, 3);
    }
}
