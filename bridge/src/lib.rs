//! Host-side bridge to a UCI engine.
//!
//! The engine runs on its own worker thread and is fed protocol lines through
//! a FIFO queue. Everything it prints is split into lines and handed to a
//! single registered callback, either on the worker thread or marshaled onto
//! the caller's [`EventLoop`].
//!
//! ```no_run
//! use engine::{ProcessConfig, ProcessEngineFactory};
//! use uci_bridge::{Bridge, InitOptions};
//!
//! let config = ProcessConfig::discover().expect("no engine installed");
//! let bridge = Bridge::new(ProcessEngineFactory::new(config));
//! bridge.register_callback(|line: &str| println!("{line}"));
//! bridge.init(InitOptions::new()).unwrap();
//! bridge.submit("position startpos moves e2e4");
//! bridge.submit("go depth 12");
//! bridge.dispose().unwrap();
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod line_sink;
pub mod queue;
pub mod resource;
pub mod session;
mod worker;

pub use config::BridgeConfig;
pub use delivery::{
    event_loop, Callback, CallbackSlot, Delivery, EventLoop, LoopHandle, ScheduleError,
    Scheduler, Task,
};
pub use error::{BridgeError, BridgeResult};
pub use line_sink::LineSink;
pub use queue::CommandQueue;
pub use resource::{EnvResolver, FixedResolver, ResourceResolver};
pub use session::{Bridge, InitOptions};
pub use worker::{ExitReason, WorkerExit, WorkerState};
