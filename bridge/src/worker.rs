//! The engine worker: the only code that ever touches the engine.
//!
//! Lifecycle: `NotStarted -> Initializing -> Processing -> Draining ->
//! Terminated`. Commands are dispatched strictly one at a time, so a running
//! search holds up everything behind it until it completes.

use std::fmt;
use std::sync::Arc;

use engine::{EngineFactory, UciCommand, UciEngine};

use crate::delivery::{CallbackSlot, Delivery};
use crate::line_sink::LineSink;
use crate::queue::CommandQueue;
use crate::resource::ResourceResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Initializing,
    Processing,
    Draining,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::NotStarted => "not started",
            WorkerState::Initializing => "initializing",
            WorkerState::Processing => "processing",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why the worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The queue was closed from outside (dispose).
    Closed,
    /// A `quit` command was dispatched.
    Quit,
    /// The engine could not be built.
    StartupFailed,
}

/// Summary returned when the worker thread finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub reason: ExitReason,
    /// Recognised commands handed to the engine.
    pub dispatched: usize,
    /// Lines dropped as unrecognised.
    pub ignored: usize,
    /// Commands left in the queue after `quit`, never dispatched.
    pub discarded: usize,
}

/// Everything the worker thread owns or shares.
pub(crate) struct WorkerContext {
    pub queue: Arc<CommandQueue>,
    pub slot: Arc<CallbackSlot>,
    pub delivery: Delivery,
    pub factory: Arc<dyn EngineFactory>,
    pub resolver: Arc<dyn ResourceResolver>,
}

/// What the loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Ignored,
    Quit,
}

/// Closes the queue when the worker unwinds, so producers stop piling up
/// commands for a thread that is gone.
struct CloseOnExit(Arc<CommandQueue>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close();
    }
}

struct Worker {
    ctx: WorkerContext,
    state: WorkerState,
}

impl Worker {
    fn transition(&mut self, next: WorkerState) {
        tracing::debug!("Worker state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Body of the worker thread.
pub(crate) fn run_worker(ctx: WorkerContext) -> WorkerExit {
    let _close_guard = CloseOnExit(ctx.queue.clone());
    let mut worker = Worker {
        ctx,
        state: WorkerState::NotStarted,
    };
    let mut exit = WorkerExit {
        reason: ExitReason::Closed,
        dispatched: 0,
        ignored: 0,
        discarded: 0,
    };

    worker.transition(WorkerState::Initializing);
    let resource = worker.ctx.resolver.resolve();
    let sink = LineSink::new(worker.ctx.slot.clone(), worker.ctx.delivery.clone());

    let mut engine = match worker.ctx.factory.create(resource.as_deref(), Box::new(sink)) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Engine startup failed: {}", e);
            worker.ctx.queue.close();
            exit.reason = ExitReason::StartupFailed;
            exit.discarded = worker.ctx.queue.discard();
            worker.transition(WorkerState::Terminated);
            return exit;
        }
    };
    if let Err(e) = engine.identify() {
        tracing::warn!("Engine identification failed: {}", e);
    }

    worker.transition(WorkerState::Processing);
    'processing: while let Some(batch) = worker.ctx.queue.drain_blocking() {
        for line in batch {
            tracing::trace!("UCI >> {}", line);
            match dispatch(engine.as_mut(), &line) {
                Flow::Continue => exit.dispatched += 1,
                Flow::Ignored => exit.ignored += 1,
                Flow::Quit => {
                    exit.dispatched += 1;
                    exit.reason = ExitReason::Quit;
                    worker.ctx.queue.close();
                    exit.discarded = worker.ctx.queue.discard();
                    break 'processing;
                }
            }
        }
    }

    worker.transition(WorkerState::Draining);
    if let Err(e) = engine.quit() {
        tracing::warn!("Engine shutdown failed: {}", e);
    }
    // Dropping the engine drops the sink, which flushes any partial line
    drop(engine);

    worker.transition(WorkerState::Terminated);
    tracing::info!(
        reason = ?exit.reason,
        dispatched = exit.dispatched,
        ignored = exit.ignored,
        discarded = exit.discarded,
        "Engine worker exited"
    );
    exit
}

/// Route one protocol line to the engine.
///
/// Unrecognised lines and engine errors are logged and otherwise ignored.
fn dispatch(engine: &mut dyn UciEngine, line: &str) -> Flow {
    let Some(command) = UciCommand::parse(line) else {
        tracing::debug!("Ignoring unrecognised command: {}", line);
        return Flow::Ignored;
    };

    let result = match &command {
        UciCommand::Uci => engine.uci(),
        UciCommand::IsReady => engine.is_ready(),
        UciCommand::SetOption { name, value } => engine.set_option(name, value.as_deref()),
        UciCommand::UciNewGame => engine.new_game(),
        UciCommand::Position(position) => engine.set_position(position),
        UciCommand::Go(limits) => engine.go(limits),
        UciCommand::Stop => engine.stop(),
        UciCommand::Quit => {
            tracing::info!("Quit received, shutting down worker");
            return Flow::Quit;
        }
    };

    if let Err(e) = result {
        tracing::warn!("Engine failed on '{}': {}", command, e);
    }
    Flow::Continue
}
