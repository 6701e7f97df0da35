//! # Retry Scheduler
//!
//! Delayed re-submission of ingestion tasks. Each scheduled task is an
//! independent timer; when it fires the task is sent to the engine's retry
//! worker with its attempt count as data.
//!
//! Timers run on the tokio clock, so paused-time tests drive backoff
//! deterministically.

use crate::domain::ingest::IngestTask;
use crate::domain::types::BlockHeight;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;

type PendingTimers = Arc<Mutex<HashMap<IngestTask, AbortHandle>>>;

pub struct RetryScheduler {
    sender: mpsc::UnboundedSender<IngestTask>,
    pending: PendingTimers,
    closed: AtomicBool,
}

impl RetryScheduler {
    /// Create a scheduler and the receiving end fired tasks arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IngestTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            sender,
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: AtomicBool::new(false),
        };
        (scheduler, receiver)
    }

    /// Fire `task` after `delay`.
    ///
    /// Returns false when the same task already has a timer or the scheduler
    /// has been cleared.
    pub fn schedule(&self, task: IngestTask, delay: Duration) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut pending = self.pending.lock();
        if pending.contains_key(&task) {
            return false;
        }

        let sender = self.sender.clone();
        let timers = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.lock().remove(&task);
            trace!(height = task.height, attempt = task.attempt, "Retry timer fired");
            let _ = sender.send(task);
        });
        pending.insert(task, handle.abort_handle());
        true
    }

    /// Whether any timer is pending for `height`.
    pub fn has_pending(&self, height: BlockHeight) -> bool {
        self.pending.lock().keys().any(|task| task.height == height)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Abort every pending timer and refuse new ones. Returns how many were aborted.
    pub fn clear(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<AbortHandle> = self.pending.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
