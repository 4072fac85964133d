//! A [`UciEngine`] backed by an external UCI executable.
//!
//! The child is driven over stdin/stdout from the thread that owns the
//! engine. A helper thread only moves stdout lines into a channel; every line
//! is written to the engine output by the owning thread, so output order is
//! exactly the order the child produced it in.

use crate::uci::{parse_uci_message, UciMessage};
use crate::{
    EngineError, EngineFactory, EngineOutput, Position, SearchLimits, UciCommand, UciEngine,
};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default timeout for the startup `uciok` (in seconds).
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Upper bound on the handshake wait, whatever was configured.
const MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// How long `quit` waits for the child to exit on its own before killing it.
const QUIT_GRACE: Duration = Duration::from_secs(1);

/// How to launch the engine executable.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub handshake_timeout: Duration,
}

impl ProcessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            handshake_timeout: handshake_timeout(),
        }
    }

    /// Locate an engine with [`find_engine_path`].
    pub fn discover() -> Result<Self, EngineError> {
        find_engine_path().map(Self::new).ok_or(EngineError::NotFound)
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Get the startup handshake timeout.
///
/// Priority:
/// 1. `UCI_BRIDGE_HANDSHAKE_TIMEOUT_SECS` env variable if set (falls back to
///    the default if the value cannot be parsed as a `u64`, capped at a day)
/// 2. `10` seconds as fallback
pub fn handshake_timeout() -> Duration {
    parse_handshake_timeout(std::env::var("UCI_BRIDGE_HANDSHAKE_TIMEOUT_SECS").ok().as_deref())
}

fn parse_handshake_timeout(value: Option<&str>) -> Duration {
    let secs = value
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS);
    Duration::from_secs(secs).min(MAX_HANDSHAKE_TIMEOUT)
}

pub struct ProcessEngine {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    output: EngineOutput,
    identity: Vec<String>,
}

impl ProcessEngine {
    /// Spawn the executable and complete the `uci` handshake.
    ///
    /// The `id` lines of the handshake are kept and replayed by
    /// [`UciEngine::identify`]. When `resource` is given it is applied as the
    /// `EvalFile` option.
    #[tracing::instrument(level = "info", skip(output))]
    pub fn spawn(
        config: &ProcessConfig,
        resource: Option<&Path>,
        output: EngineOutput,
    ) -> Result<Self, EngineError> {
        tracing::debug!("Spawning engine process");
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                tracing::error!("Failed to spawn engine: {}", e);
                EngineError::Spawn(e)
            })?;

        let stdin = child.stdin.take().ok_or(EngineError::NoStdin)?;
        let stdout = child.stdout.take().ok_or(EngineError::NoStdout)?;

        let (line_tx, lines) = mpsc::channel::<String>();
        let spawned = std::thread::Builder::new()
            .name("uci-engine-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    match line {
                        Ok(line) => {
                            if line_tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Error reading engine stdout: {}", e);
                            break;
                        }
                    }
                }
                tracing::debug!("Engine stdout reader exiting");
            });
        let reader = match spawned {
            Ok(reader) => reader,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        let mut engine = Self {
            child,
            stdin,
            lines,
            reader: Some(reader),
            output,
            identity: Vec::new(),
        };

        if let Err(e) = engine.handshake(config.handshake_timeout) {
            tracing::error!("Engine handshake failed: {}", e);
            engine.kill();
            return Err(e);
        }

        if let Some(path) = resource {
            tracing::info!("Using evaluation file {}", path.display());
            engine.send(&UciCommand::SetOption {
                name: "EvalFile".to_string(),
                value: Some(path.display().to_string()),
            })?;
        }

        tracing::info!("Engine process ready");
        Ok(engine)
    }

    fn handshake(&mut self, timeout: Duration) -> Result<(), EngineError> {
        self.send(&UciCommand::Uci)?;

        let deadline = Instant::now() + timeout.min(MAX_HANDSHAKE_TIMEOUT);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.lines.recv_timeout(remaining) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => return Err(EngineError::Timeout("uciok")),
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Closed),
            };
            tracing::trace!("UCI << {}", line);
            match parse_uci_message(&line) {
                Ok(UciMessage::UciOk) => return Ok(()),
                Ok(UciMessage::Id { .. }) => self.identity.push(line),
                _ => {}
            }
        }
    }

    fn send(&mut self, command: &UciCommand) -> Result<(), EngineError> {
        tracing::trace!("UCI >> {}", command);
        writeln!(self.stdin, "{}", command)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn emit(&mut self, line: &str) -> Result<(), EngineError> {
        tracing::trace!("UCI << {}", line);
        writeln!(self.output, "{}", line)?;
        Ok(())
    }

    /// Forward engine lines until one matching `done` has been written.
    fn pump_until(&mut self, done: fn(&UciMessage) -> bool) -> Result<(), EngineError> {
        loop {
            let line = self.lines.recv().map_err(|_| EngineError::Closed)?;
            self.emit(&line)?;
            if parse_uci_message(&line).is_ok_and(|msg| done(&msg)) {
                return Ok(());
            }
        }
    }

    /// Forward whatever the engine has already printed, without waiting.
    fn pump_available(&mut self) -> Result<(), EngineError> {
        loop {
            match self.lines.try_recv() {
                Ok(line) => self.emit(&line)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(EngineError::Closed),
            }
        }
    }

    fn request(
        &mut self,
        command: &UciCommand,
        done: fn(&UciMessage) -> bool,
    ) -> Result<(), EngineError> {
        self.send(command)?;
        self.pump_until(done)
    }

    fn notify(&mut self, command: &UciCommand) -> Result<(), EngineError> {
        self.send(command)?;
        self.pump_available()
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!("Engine kill: {}", e);
        }
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl UciEngine for ProcessEngine {
    fn identify(&mut self) -> Result<(), EngineError> {
        for line in std::mem::take(&mut self.identity) {
            self.emit(&line)?;
        }
        Ok(())
    }

    fn uci(&mut self) -> Result<(), EngineError> {
        self.request(&UciCommand::Uci, |msg| matches!(msg, UciMessage::UciOk))
    }

    fn is_ready(&mut self) -> Result<(), EngineError> {
        self.request(&UciCommand::IsReady, |msg| matches!(msg, UciMessage::ReadyOk))
    }

    fn set_option(&mut self, name: &str, value: Option<&str>) -> Result<(), EngineError> {
        tracing::info!("Setting option: {} = {:?}", name, value);
        self.notify(&UciCommand::SetOption {
            name: name.to_string(),
            value: value.map(str::to_string),
        })
    }

    fn new_game(&mut self) -> Result<(), EngineError> {
        self.notify(&UciCommand::UciNewGame)
    }

    fn set_position(&mut self, position: &Position) -> Result<(), EngineError> {
        tracing::debug!("Setting position: FEN={}, moves={}", position.fen, position.moves.len());
        self.notify(&UciCommand::Position(position.clone()))
    }

    fn go(&mut self, limits: &SearchLimits) -> Result<(), EngineError> {
        tracing::info!("Starting search: {}", limits);
        self.request(&UciCommand::Go(limits.clone()), |msg| {
            matches!(msg, UciMessage::BestMove { .. })
        })
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.notify(&UciCommand::Stop)
    }

    fn quit(&mut self) -> Result<(), EngineError> {
        tracing::info!("Sending quit command to engine");
        let _ = self.send(&UciCommand::Quit);

        let deadline = Instant::now() + QUIT_GRACE;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                tracing::debug!("Engine exited with {}", status);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.kill();
        Ok(())
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.kill();
        }
    }
}

/// Builds a [`ProcessEngine`] from a fixed launch configuration.
#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    config: ProcessConfig,
}

impl ProcessEngineFactory {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for ProcessEngineFactory {
    fn create(
        &self,
        resource: Option<&Path>,
        output: EngineOutput,
    ) -> Result<Box<dyn UciEngine>, EngineError> {
        Ok(Box::new(ProcessEngine::spawn(&self.config, resource, output)?))
    }
}

/// Find a UCI engine executable.
///
/// Priority:
/// 1. `UCI_BRIDGE_ENGINE_PATH` env variable if set
/// 2. Common stockfish install locations
/// 3. `stockfish` in `PATH`
pub fn find_engine_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("UCI_BRIDGE_ENGINE_PATH") {
        return Some(PathBuf::from(path));
    }

    let paths = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
        "stockfish", // In PATH
    ];

    for path_str in paths {
        let path = Path::new(path_str);
        if path.exists() || path_str == "stockfish" {
            // Stockfish exits on EOF, so a null stdin verifies it runs
            let runs = Command::new(path_str)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok();
            if runs {
                return Some(PathBuf::from(path_str));
            }
        }
    }

    None
}
