//! Main-thread dispatch queue.
//!
//! Connection threads never touch the host. Anything that needs
//! [`CommandTarget`](crate::CommandTarget) or
//! [`TelemetrySource`](crate::TelemetrySource) is boxed into a [`Task`] and
//! queued here; the host drains the queue once per tick on its own thread.
//!
//! # Ordering
//!
//! Tasks run in the order their `enqueue` calls acquired the queue lock, so
//! tasks queued by one thread always run in the order that thread queued them.
//! A task queued while the queue is being drained (including by a running task)
//! runs on the next drain.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use crate::diagnostics::{Diagnostics, FaultKind, FaultSeverity};
use crate::fault;
use crate::host::Host;
use crate::sync::Mutex;

/// A unit of work that runs on the host's thread.
pub type Task = Box<dyn FnOnce(&mut dyn Host) + Send + 'static>;

/// FIFO of [`Task`]s, filled from any thread and drained from one.
pub struct MainThreadDispatcher {
    queue: Mutex<VecDeque<Task>>,
    diagnostics: Diagnostics,
}

impl MainThreadDispatcher {
    /// Creates an empty dispatcher that reports panicking tasks to `diagnostics`.
    #[must_use]
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            diagnostics,
        }
    }

    /// Queues `task` for the next drain. Callable from any thread.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce(&mut dyn Host) + Send + 'static,
    {
        self.queue.lock().push_back(Box::new(task));
    }

    /// Number of tasks waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Runs every queued task against `host` and returns how many ran.
    ///
    /// The queue is swapped out under the lock and the tasks run without it, so
    /// connection threads can keep queueing while the host works. A task that
    /// panics is reported as a [`FaultKind::Command`] fault and the remaining
    /// tasks still run.
    pub fn drain_and_run_all(&self, host: &mut dyn Host) -> usize {
        let tasks = std::mem::take(&mut *self.queue.lock());
        let count = tasks.len();
        for (index, task) in tasks.into_iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&mut *host)));
            if let Err(payload) = outcome {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                self.diagnostics.report(
                    fault!(
                        FaultSeverity::Error,
                        FaultKind::Command,
                        "dispatched task panicked: {}",
                        reason
                    )
                    .with_context("position", index.to_string()),
                );
            }
        }
        count
    }
}

impl std::fmt::Debug for MainThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadDispatcher")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}
