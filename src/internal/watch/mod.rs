//! Long-poll watch plumbing for a single repository.
//!
//! Commits are published as [`CommitEvent`]s into an unbounded queue; one
//! notifier task per repository consumes the queue in commit order and wakes
//! parked waiters whose path pattern matches the event's change set. Waiters
//! park on `oneshot` completion sinks; delivery removes the waiter from the
//! set, so every waiter is woken at most once and always with a revision
//! strictly above its floor.
//!
//! The notifier never evaluates queries: file watches subscribe here with an
//! exact-path pattern and run their query comparisons in the caller's task,
//! bounded by the evaluation semaphore, which keeps the notifier loop
//! non-blocking and no waiter able to starve the rest.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};

use crate::errors::DogmaError;
use crate::model::{Change, PathPattern};

/// A committed revision and its effective change set, as seen by watchers.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub revision: i64,
    pub changes: Arc<Vec<Change>>,
}

impl CommitEvent {
    fn matches(&self, pattern: &PathPattern) -> bool {
        self.changes
            .iter()
            .any(|c| c.touched_paths().into_iter().any(|p| pattern.matches(p)))
    }
}

/// Why a parked waiter was cancelled by the repository side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The repository was removed; watchers fail with *repository-not-found*.
    RepositoryRemoved,
    /// The process is terminating; watchers fail with *shutting-down*.
    ShuttingDown,
}

struct Waiter {
    id: u64,
    /// Deliver only events with a revision strictly above this floor.
    floor: i64,
    pattern: PathPattern,
    sink: Option<oneshot::Sender<CommitEvent>>,
}

struct WatchState {
    label: String,
    waiters: Mutex<Vec<Waiter>>,
    next_id: AtomicU64,
    removed: AtomicBool,
    shutting_down: AtomicBool,
    eval_permits: Arc<Semaphore>,
}

impl WatchState {
    fn close_error(&self) -> DogmaError {
        if self.shutting_down.load(Ordering::Acquire) {
            DogmaError::ShuttingDown
        } else {
            DogmaError::RepositoryNotFound(self.label.clone())
        }
    }
}

/// The watch side of one repository.
pub struct RepoWatcher {
    tx: mpsc::UnboundedSender<CommitEvent>,
    state: Arc<WatchState>,
}

impl RepoWatcher {
    /// Create a watcher and spawn its notifier task.
    pub fn new(label: impl Into<String>, eval_workers: usize) -> RepoWatcher {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(WatchState {
            label: label.into(),
            waiters: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            removed: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            eval_permits: Arc::new(Semaphore::new(eval_workers.max(1))),
        });
        tokio::spawn(notifier_loop(rx, state.clone()));
        RepoWatcher { tx, state }
    }

    /// Publish a new-head event. Called once per commit, in commit order.
    pub fn publish(&self, event: CommitEvent) {
        // The send only fails when the notifier task is gone, i.e. at
        // process teardown; parked waiters are cancelled separately.
        let _ = self.tx.send(event);
    }

    /// Park a waiter for the next event above `floor` matching `pattern`.
    pub fn subscribe(&self, floor: i64, pattern: PathPattern) -> Result<WaitHandle, DogmaError> {
        if self.is_closed() {
            return Err(self.state.close_error());
        }
        let (sink, rx) = oneshot::channel();
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut waiters = self.state.waiters.lock().expect("watch lock poisoned");
            waiters.push(Waiter {
                id,
                floor,
                pattern,
                sink: Some(sink),
            });
        }
        // A close that raced the registration must not leave the waiter
        // parked forever.
        if self.is_closed() {
            remove_waiter(&self.state, id);
            return Err(self.state.close_error());
        }
        Ok(WaitHandle {
            id,
            rx,
            state: self.state.clone(),
        })
    }

    /// Acquire a slot in the bounded query-evaluation pool.
    pub async fn eval_permit(&self) -> OwnedSemaphorePermit {
        self.state
            .eval_permits
            .clone()
            .acquire_owned()
            .await
            .expect("evaluation semaphore never closes")
    }

    /// Cancel all parked waiters and refuse new ones.
    pub fn close(&self, reason: CloseReason) {
        match reason {
            CloseReason::RepositoryRemoved => self.state.removed.store(true, Ordering::Release),
            CloseReason::ShuttingDown => self.state.shutting_down.store(true, Ordering::Release),
        }
        let drained: Vec<Waiter> = {
            let mut waiters = self.state.waiters.lock().expect("watch lock poisoned");
            std::mem::take(&mut *waiters)
        };
        if !drained.is_empty() {
            tracing::debug!(
                repo = %self.state.label,
                waiters = drained.len(),
                ?reason,
                "cancelled parked watchers"
            );
        }
        // Dropping the sinks wakes the waiters with a closed-channel error;
        // they translate it via the state flags.
    }

    /// Allow new watchers again after an un-remove.
    pub fn reopen(&self) {
        self.state.removed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state.removed.load(Ordering::Acquire)
            || self.state.shutting_down.load(Ordering::Acquire)
    }
}

fn remove_waiter(state: &WatchState, id: u64) {
    let mut waiters = state.waiters.lock().expect("watch lock poisoned");
    waiters.retain(|w| w.id != id);
}

async fn notifier_loop(mut rx: mpsc::UnboundedReceiver<CommitEvent>, state: Arc<WatchState>) {
    while let Some(event) = rx.recv().await {
        let mut waiters = state.waiters.lock().expect("watch lock poisoned");
        // Waiters are kept in subscription order; matching ones are woken in
        // that order within this cycle.
        waiters.retain_mut(|waiter| {
            if event.revision <= waiter.floor || !event.matches(&waiter.pattern) {
                return true;
            }
            match waiter.sink.take() {
                Some(sink) => {
                    // A failed send means the watcher gave up; drop it too.
                    let _ = sink.send(event.clone());
                    false
                }
                None => false,
            }
        });
    }
}

/// A parked watch registration. Dropping the handle deregisters the waiter,
/// which is how caller-side cancellation and timeouts clean up.
pub struct WaitHandle {
    id: u64,
    rx: oneshot::Receiver<CommitEvent>,
    state: Arc<WatchState>,
}

impl WaitHandle {
    /// Wait for the matching event. Fails with *shutting-down* or
    /// *repository-not-found* when the repository side cancelled the waiter.
    pub async fn wait(mut self) -> Result<CommitEvent, DogmaError> {
        let result = (&mut self.rx).await;
        result.map_err(|_| self.state.close_error())
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        remove_waiter(&self.state, self.id);
    }
}
