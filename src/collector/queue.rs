use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::schema::FetchTask;

/// Shared work queue of the worker pool.
///
/// Holds pending tasks together with the number of workers currently
/// executing one, so "queue empty and nobody working" is decided under a
/// single lock. Every state change wakes all waiters through `Notify`.
///
/// GUARANTEES:
/// - A task is handed to exactly one worker
/// - At most one task per server identity is executing at any time
/// - A continuation is queued before its worker is counted as idle, so
///   `drain` can never observe an empty, idle queue while a requeue is
///   pending
pub struct TaskQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<FetchTask>,
    active: usize,
    in_flight: HashSet<String>,
    closed: bool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            changed: Notify::new(),
        }
    }

    /// Appends a task to the tail of the queue.
    pub fn push(&self, task: FetchTask) {
        self.lock().tasks.push_back(task);
        self.changed.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Waits for the next claimable task.
    ///
    /// Returns `None` once the queue has been closed by `drain`.
    pub async fn claim(self: &Arc<Self>) -> Option<Claim> {
        loop {
            // Registered before inspecting state so no wakeup is missed.
            let notified = self.changed.notified();
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }

                let next = state
                    .tasks
                    .iter()
                    .position(|t| !state.in_flight.contains(t.identity.descriptor()))
                    .and_then(|pos| state.tasks.remove(pos));

                if let Some(task) = next {
                    state.active += 1;
                    state.in_flight.insert(task.identity.descriptor().to_string());
                    return Some(Claim {
                        queue: Arc::clone(self),
                        task,
                        completed: false,
                    });
                }
            }
            notified.await;
        }
    }

    /// Waits until the queue is empty and no worker is active, then closes
    /// it so every idle `claim` returns `None`.
    pub async fn drain(&self) {
        loop {
            let notified = self.changed.notified();
            {
                let mut state = self.lock();
                if state.tasks.is_empty() && state.active == 0 {
                    state.closed = true;
                    break;
                }
            }
            notified.await;
        }
        self.changed.notify_waiters();
    }

    fn finish(&self, descriptor: &str, next: Option<FetchTask>) {
        {
            let mut state = self.lock();
            state.in_flight.remove(descriptor);
            if let Some(task) = next {
                state.tasks.push_back(task);
            }
            state.active -= 1;
        }
        self.changed.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on one task while a worker executes it.
///
/// Dropping a claim without calling `complete` (e.g. on panic) still
/// releases the worker slot, so shutdown cannot hang on a dead worker.
pub struct Claim {
    queue: Arc<TaskQueue>,
    task: FetchTask,
    completed: bool,
}

impl Claim {
    pub fn task(&self) -> &FetchTask {
        &self.task
    }

    /// Marks the task as finished, queueing `next` in the same step.
    pub fn complete(mut self, next: Option<FetchTask>) {
        self.completed = true;
        self.queue.finish(self.task.identity.descriptor(), next);
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.completed {
            self.queue.finish(self.task.identity.descriptor(), None);
        }
    }
}
