pub mod command;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod process;
pub mod uci;

pub use command::{Position, SearchLimits, UciCommand, STARTPOS_FEN};
pub use process::{find_engine_path, ProcessConfig, ProcessEngine, ProcessEngineFactory};
pub use uci::{parse_uci_message, EngineInfo, Score, UciMessage};

use std::io::Write;
use std::path::Path;

/// Writer the engine prints its protocol output to.
///
/// Handed to the engine when it is constructed. Every write happens on the
/// thread that owns the engine; the writer is responsible for splitting the
/// byte stream back into lines.
pub type EngineOutput = Box<dyn Write + Send>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Engine executable not found")]
    NotFound,
    #[error("Failed to spawn engine: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Engine has no stdin")]
    NoStdin,
    #[error("Engine has no stdout")]
    NoStdout,
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),
    #[error("Engine closed its output")]
    Closed,
    #[error("Engine rejected {0}")]
    Rejected(String),
}

/// The command surface of a line-oriented engine.
///
/// Each call may write any number of complete lines to the engine's output
/// before returning. Calls are made one at a time from a single thread, so
/// a long `go` holds up everything queued behind it, `stop` included.
pub trait UciEngine {
    /// Startup identification, printed once before any command is handled.
    fn identify(&mut self) -> Result<(), EngineError>;

    /// Answer `uci`; must end with `uciok`.
    fn uci(&mut self) -> Result<(), EngineError>;

    /// Answer `isready`; must end with `readyok`.
    fn is_ready(&mut self) -> Result<(), EngineError>;

    fn set_option(&mut self, name: &str, value: Option<&str>) -> Result<(), EngineError>;

    fn new_game(&mut self) -> Result<(), EngineError>;

    fn set_position(&mut self, position: &Position) -> Result<(), EngineError>;

    /// Run a search and return once it has finished and `bestmove` was written.
    fn go(&mut self, limits: &SearchLimits) -> Result<(), EngineError>;

    fn stop(&mut self) -> Result<(), EngineError>;

    /// Release engine resources. Called once, right before the engine is dropped.
    fn quit(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Builds the engine on the thread that will own it.
pub trait EngineFactory: Send + Sync {
    /// `resource` is the optional data file (evaluation network) resolved by
    /// the host platform; engines that need none ignore it.
    fn create(
        &self,
        resource: Option<&Path>,
        output: EngineOutput,
    ) -> Result<Box<dyn UciEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn(Option<&Path>, EngineOutput) -> Result<Box<dyn UciEngine>, EngineError> + Send + Sync,
{
    fn create(
        &self,
        resource: Option<&Path>,
        output: EngineOutput,
    ) -> Result<Box<dyn UciEngine>, EngineError> {
        self(resource, output)
    }
}
