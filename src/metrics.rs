use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for one collection run.
///
/// Design:
/// - Lock-free (Atomics)
/// - Shared by all workers through an `Arc`
/// - Read once at the end of the run for the summary line
#[derive(Debug, Default)]
pub struct RunMetrics {
    // Queries
    pub fetch_attempts: AtomicUsize,
    pub fetch_failures: AtomicUsize,
    pub continuations: AtomicUsize,

    // Servers
    pub servers_done: AtomicUsize,
    pub budget_exhausted: AtomicUsize,
    pub malformed_lines: AtomicUsize,

    // Throughput
    pub records_collected: AtomicUsize,
}

impl RunMetrics {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            continuations: self.continuations.load(Ordering::Relaxed),
            servers_done: self.servers_done.load(Ordering::Relaxed),
            budget_exhausted: self.budget_exhausted.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            records_collected: self.records_collected.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub fetch_attempts: usize,
    pub fetch_failures: usize,
    pub continuations: usize,
    pub servers_done: usize,
    pub budget_exhausted: usize,
    pub malformed_lines: usize,
    pub records_collected: usize,
}
