//! The caller-facing lifecycle controller.
//!
//! A [`Bridge`] owns at most one engine session at a time. A session is one
//! worker thread, one engine and one command queue; it starts on
//! [`Bridge::init`] and is torn down on [`Bridge::dispose`] or when the engine
//! is sent `quit`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use engine::EngineFactory;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::delivery::{Callback, CallbackSlot, Delivery};
use crate::error::{BridgeError, BridgeResult};
use crate::queue::CommandQueue;
use crate::resource::{EnvResolver, ResourceResolver};
use crate::worker::{run_worker, WorkerContext, WorkerExit};

/// Open option bag passed to [`Bridge::init`]. Reserved for engine startup
/// parameters; currently only logged.
pub type InitOptions = serde_json::Map<String, serde_json::Value>;

struct Session {
    id: Uuid,
    queue: Arc<CommandQueue>,
    worker: JoinHandle<WorkerExit>,
}

impl Session {
    /// Wait for the worker thread to finish.
    fn join(self) -> BridgeResult<WorkerExit> {
        let id = self.id;
        match self.worker.join() {
            Ok(exit) => {
                tracing::debug!(session = %id, ?exit, "Worker joined");
                Ok(exit)
            }
            Err(_) => {
                tracing::error!(session = %id, "Engine worker panicked");
                Err(BridgeError::WorkerPanicked)
            }
        }
    }
}

/// What the worker thread and `submit` may see of the live session. Only
/// ever locked briefly; the worker thread never touches `lifecycle`.
struct Live {
    queue: Arc<CommandQueue>,
    worker: ThreadId,
    /// Set when `dispose` was requested from the worker thread itself.
    disposed: Arc<AtomicBool>,
}

/// Runs an engine on a dedicated thread and hands its output to one callback.
///
/// All methods take `&self` and may be called from any thread. `submit` and
/// `register_callback` only take short locks; `dispose` blocks until the
/// worker has exited, which includes waiting for a running search to finish.
pub struct Bridge {
    factory: Arc<dyn EngineFactory>,
    resolver: Arc<dyn ResourceResolver>,
    delivery: Delivery,
    config: BridgeConfig,
    callback: Arc<CallbackSlot>,
    /// Serialises init and dispose; held across the worker join.
    lifecycle: Mutex<Option<Session>>,
    /// The live session as seen by `submit` and by the worker thread.
    active: Mutex<Option<Live>>,
}

impl Bridge {
    pub fn new(factory: impl EngineFactory + 'static) -> Self {
        Self::from_shared(Arc::new(factory))
    }

    pub fn from_shared(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            resolver: Arc::new(EnvResolver::default()),
            delivery: Delivery::Direct,
            config: BridgeConfig::default(),
            callback: Arc::new(CallbackSlot::default()),
            lifecycle: Mutex::new(None),
            active: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_resolver(mut self, resolver: impl ResourceResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn lifecycle(&self) -> MutexGuard<'_, Option<Session>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> MutexGuard<'_, Option<Live>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The live session when called from its own worker thread.
    fn own_session(&self) -> Option<MutexGuard<'_, Option<Live>>> {
        let active = self.active();
        let on_worker = active
            .as_ref()
            .is_some_and(|live| live.worker == thread::current().id());
        on_worker.then_some(active)
    }

    /// Start the engine worker. Returns immediately; a no-op while running.
    ///
    /// A session that ended through `quit` is reaped first. Called from the
    /// worker thread it does nothing.
    #[tracing::instrument(level = "info", skip(self, options))]
    pub fn init(&self, options: InitOptions) -> BridgeResult<()> {
        if self.own_session().is_some() {
            tracing::warn!("init called from the engine worker, ignored");
            return Ok(());
        }

        let mut lifecycle = self.lifecycle();

        if let Some(session) = lifecycle.as_ref() {
            if session.queue.is_running() {
                tracing::debug!(session = %session.id, "Already running, init ignored");
                return Ok(());
            }
        }
        if let Some(stale) = lifecycle.take() {
            tracing::debug!(session = %stale.id, "Reaping finished session");
            let _ = self.reap(stale, false);
        }

        if !options.is_empty() {
            tracing::debug!(
                "Init options: {:?}",
                options.keys().collect::<Vec<_>>()
            );
        }

        let id = Uuid::new_v4();
        let queue = Arc::new(CommandQueue::new());
        let disposed = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            queue: queue.clone(),
            slot: self.callback.clone(),
            delivery: self.delivery.clone(),
            factory: self.factory.clone(),
            resolver: self.resolver.clone(),
        };
        let slot = self.callback.clone();
        let worker_disposed = disposed.clone();

        // Held until the session is published, so the worker cannot look
        // itself up before it is known
        let mut active = self.active();
        let worker = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || {
                let span = tracing::info_span!("engine_worker", session = %id);
                let _enter = span.enter();
                let exit = run_worker(ctx);
                if worker_disposed.load(Ordering::SeqCst) {
                    slot.clear();
                    tracing::debug!("Output callback cleared");
                }
                exit
            })
            .map_err(|e| {
                tracing::error!("Failed to spawn engine worker: {}", e);
                BridgeError::Spawn(e)
            })?;

        // The worker builds the engine before it drains, so these wait their turn
        if self.config.handshake_on_init {
            queue.enqueue("uci");
            queue.enqueue("isready");
        }

        *active = Some(Live {
            queue: queue.clone(),
            worker: worker.thread().id(),
            disposed,
        });
        drop(active);
        *lifecycle = Some(Session { id, queue, worker });
        tracing::info!(session = %id, "Engine session started");
        Ok(())
    }

    /// Queue one protocol line for the engine.
    ///
    /// Never blocks on the engine. Without a running session the line is
    /// dropped; it is never held for a later session.
    pub fn submit(&self, command: impl Into<String>) {
        let command = command.into();
        let queue = self.active().as_ref().map(|live| live.queue.clone());
        match queue {
            Some(queue) if queue.enqueue(command.as_str()) => {
                tracing::trace!("Queued: {}", command);
            }
            _ => tracing::debug!("Not running, dropping command: {}", command),
        }
    }

    /// Replace the output callback. Takes effect from the next line on.
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.set_callback(Arc::new(callback));
    }

    pub fn set_callback(&self, callback: Callback) {
        if self.callback.replace(callback).is_some() {
            tracing::debug!("Output callback replaced");
        }
    }

    pub fn clear_callback(&self) {
        self.callback.clear();
    }

    pub fn is_running(&self) -> bool {
        self.active()
            .as_ref()
            .is_some_and(|live| live.queue.is_running())
    }

    /// Stop the engine and wait for the worker thread to exit, then clear the
    /// callback.
    ///
    /// Commands already queued are still dispatched before the worker exits.
    /// A no-op when nothing is running. Called from the worker thread itself
    /// (from a direct-delivery callback) it closes the queue and returns; the
    /// worker clears the callback on its way out and the thread is joined by
    /// the next `init` or `dispose`.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn dispose(&self) -> BridgeResult<()> {
        if let Some(active) = self.own_session() {
            if let Some(live) = active.as_ref() {
                tracing::debug!("dispose called from the engine worker, not waiting for it");
                live.disposed.store(true, Ordering::SeqCst);
                live.queue.close();
            }
            return Ok(());
        }

        let mut lifecycle = self.lifecycle();
        let Some(session) = lifecycle.take() else {
            return Ok(());
        };

        // False when the session already ended through quit or a failed startup
        let requested = session.queue.close();
        if requested {
            tracing::info!(session = %session.id, "Disposing engine session");
        }
        self.reap(session, requested)
    }

    /// Join a session's worker and retire it. The callback is cleared only
    /// when this call is what stopped the session.
    fn reap(&self, session: Session, requested: bool) -> BridgeResult<()> {
        let joined = session.join();
        *self.active() = None;
        if requested {
            self.callback.clear();
            tracing::info!("Engine session disposed");
        }
        joined.map(|_| ())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!("Dispose on drop failed: {}", e);
        }
    }
}
