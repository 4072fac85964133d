//! Getting output lines from the engine thread to the caller.
//!
//! A line is either handed to the callback right on the worker thread
//! ([`Delivery::Direct`]) or posted as its own task to the caller's event loop
//! ([`Delivery::Marshaled`]). Either way lines reach the callback in the order
//! the engine wrote them.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// The caller's output handler.
pub type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// A unit of work for the caller's event loop.
pub type Task = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("event loop is closed")]
    Closed,
}

/// Posts tasks onto the caller's execution context.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task) -> Result<(), ScheduleError>;
}

/// How output lines reach the callback.
#[derive(Clone, Default)]
pub enum Delivery {
    /// Invoke the callback on the worker thread.
    #[default]
    Direct,
    /// Post one task per line to the caller's scheduler, falling back to a
    /// direct call when the scheduler is gone.
    Marshaled(Arc<dyn Scheduler>),
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Direct => f.write_str("Direct"),
            Delivery::Marshaled(_) => f.write_str("Marshaled"),
        }
    }
}

impl Delivery {
    pub fn marshaled(scheduler: impl Scheduler + 'static) -> Self {
        Delivery::Marshaled(Arc::new(scheduler))
    }

    fn dispatch(&self, callback: &Callback, line: String) {
        match self {
            Delivery::Direct => invoke(callback, &line),
            Delivery::Marshaled(scheduler) => {
                let task_callback = callback.clone();
                let task_line = line.clone();
                let task: Task = Box::new(move || task_callback(&task_line));
                if let Err(e) = scheduler.schedule(task) {
                    tracing::debug!("Scheduling failed ({}), delivering directly", e);
                    invoke(callback, &line);
                }
            }
        }
    }
}

/// Run a callback, containing any panic it raises. The line is lost on panic.
fn invoke(callback: &Callback, line: &str) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(line))).is_err() {
        tracing::warn!("Output callback panicked, dropping line: {}", line);
    }
}

/// Holds at most one callback.
#[derive(Default)]
pub struct CallbackSlot {
    current: Mutex<Option<Callback>>,
}

impl fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

impl CallbackSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Callback>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `callback`, returning the one it replaced.
    pub fn replace(&self, callback: Callback) -> Option<Callback> {
        self.lock().replace(callback)
    }

    pub fn clear(&self) -> Option<Callback> {
        self.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    /// Hand `line` to the current callback, if any.
    ///
    /// The slot stays locked while the line is dispatched so a callback that is
    /// being replaced or cleared is never invoked halfway through. Without a
    /// callback the line is dropped.
    pub fn deliver(&self, line: String, delivery: &Delivery) {
        let current = self.lock();
        match current.as_ref() {
            Some(callback) => delivery.dispatch(callback, line),
            None => tracing::trace!("No callback registered, dropping line: {}", line),
        }
    }
}

/// Create a caller-side event loop and the handle used to post to it.
pub fn event_loop() -> (LoopHandle, EventLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LoopHandle { tx }, EventLoop { rx })
}

/// Sending half of an [`EventLoop`]; usable from any thread.
#[derive(Clone, Debug)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl LoopHandle {
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Scheduler for LoopHandle {
    fn schedule(&self, task: Task) -> Result<(), ScheduleError> {
        self.tx.send(task).map_err(|_| ScheduleError::Closed)
    }
}

/// A cooperative task queue driven from the caller's own thread.
///
/// Tasks run one at a time in the order they were posted, each with zero
/// delay. Dropping the loop makes every [`LoopHandle`] fail to schedule.
#[derive(Debug)]
pub struct EventLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl EventLoop {
    /// Run tasks until every handle has been dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            run_task(task);
        }
        tracing::debug!("Event loop finished, all handles dropped");
    }

    /// Wait for and run the next task. Returns `false` once no more tasks can
    /// arrive.
    pub async fn turn(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                run_task(task);
                true
            }
            None => false,
        }
    }

    /// Run every task that is already queued, without waiting.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            run_task(task);
            ran += 1;
        }
        ran
    }

    /// Stop accepting tasks; already queued tasks can still be run.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

fn run_task(task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::warn!("Event loop task panicked");
    }
}
