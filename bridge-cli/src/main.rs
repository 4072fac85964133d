//! Command-line relay for a UCI engine.
//!
//! Reads protocol lines from stdin, queues them on the bridge worker and
//! prints every engine line to stdout. Logs go to stderr, or to a daily
//! rolling file with `--log-dir`, so stdout carries nothing but protocol.
//!
//! `quit` or end of input shuts the engine down and exits.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use engine::{ProcessConfig, ProcessEngineFactory};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uci_bridge::{
    event_loop, Bridge, BridgeConfig, Delivery, EnvResolver, FixedResolver, InitOptions,
    LoopHandle,
};

#[derive(Parser)]
#[command(name = "uci-bridge", about = "Relay a UCI engine over stdin and stdout")]
struct Cli {
    /// Engine executable. Defaults to `UCI_BRIDGE_ENGINE_PATH`, then a
    /// stockfish install.
    #[arg(long, value_name = "PATH")]
    engine: Option<PathBuf>,

    /// Evaluation file handed to the engine. Defaults to `UCI_BRIDGE_EVAL_FILE`.
    #[arg(long, value_name = "FILE")]
    eval_file: Option<PathBuf>,

    /// Print engine output from the worker thread instead of the main loop.
    #[arg(long)]
    direct: bool,

    /// Do not send `uci` and `isready` on startup.
    #[arg(long)]
    no_handshake: bool,

    /// Write logs to a daily rolling file in this directory.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Startup option passed to init, as KEY=VALUE. May be repeated.
    #[arg(long = "init-option", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    init_options: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err("empty option key".to_string());
    }
    Ok((key.trim().to_string(), value.to_string()))
}

/// Install the global subscriber. The guard must live until exit when logging
/// to a file.
fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "uci-bridge");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .with_line_number(true)
                        .with_thread_names(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_span_events(FmtSpan::CLOSE)
                .init();
            Ok(None)
        }
    }
}

/// Forward lines from `input` to the returned channel on a dedicated thread.
///
/// Reading stays off the runtime, so leaving the main loop never waits for
/// one more line of input. The channel closes at end of input or after the
/// first read error.
fn spawn_line_reader<R>(input: R) -> io::Result<mpsc::UnboundedReceiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in input.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
            tracing::debug!("Input reader exiting");
        })?;
    Ok(rx)
}

/// Direct delivery drops the loop handle, so the event loop reports closed.
fn select_delivery(direct: bool, handle: LoopHandle) -> Delivery {
    if direct {
        drop(handle);
        Delivery::Direct
    } else {
        Delivery::marshaled(handle)
    }
}

fn print_line(line: &str) {
    let mut out = std::io::stdout().lock();
    if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
        tracing::debug!("stdout closed, dropping: {}", line);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    let process = match &cli.engine {
        Some(path) => ProcessConfig::new(path),
        None => ProcessConfig::discover()
            .context("no UCI engine found; pass --engine or set UCI_BRIDGE_ENGINE_PATH")?,
    };
    tracing::info!("Using engine {}", process.program.display());

    let mut config = BridgeConfig::from_env();
    if cli.no_handshake {
        config.handshake_on_init = false;
    }

    let (handle, mut events) = event_loop();
    let delivery = select_delivery(cli.direct, handle);

    let bridge = Bridge::new(ProcessEngineFactory::new(process))
        .with_config(config)
        .with_delivery(delivery);
    let bridge = match cli.eval_file {
        Some(path) => bridge.with_resolver(FixedResolver(Some(path))),
        None => bridge.with_resolver(EnvResolver::default()),
    };
    bridge.register_callback(print_line);

    let options: InitOptions = cli
        .init_options
        .into_iter()
        .map(|(key, value)| (key, serde_json::Value::String(value)))
        .collect();
    bridge.init(options)?;

    let mut input = spawn_line_reader(io::BufReader::new(io::stdin()))
        .context("spawning stdin reader")?;
    // Turns false right away in direct mode, where no handle is left
    let mut loop_open = true;

    loop {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else {
                    tracing::info!("End of input");
                    break;
                };
                let line = line.context("reading stdin")?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                bridge.submit(line);
                if line == "quit" {
                    break;
                }
            }
            open = events.turn(), if loop_open => {
                loop_open = open;
            }
        }
        if !bridge.is_running() {
            tracing::warn!("Engine session ended");
            break;
        }
    }

    bridge.dispose()?;
    let flushed = events.run_pending();
    tracing::debug!("Delivered {} trailing lines", flushed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_line_reader_forwards_then_closes() {
        let mut rx = spawn_line_reader(Cursor::new("uci\nisready\n")).unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), "uci");
        assert_eq!(rx.recv().await.unwrap().unwrap(), "isready");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_line_reader_does_not_hold_up_exit() {
        // A reader that never yields a line, like an idle terminal
        let (_keep_open, pipe) = std::sync::mpsc::channel::<u8>();
        struct Idle(std::sync::mpsc::Receiver<u8>);
        impl io::Read for Idle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.recv() {
                    Ok(b) => {
                        buf[0] = b;
                        Ok(1)
                    }
                    Err(_) => Ok(0),
                }
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut rx = spawn_line_reader(io::BufReader::new(Idle(pipe))).unwrap();
        let start = std::time::Instant::now();
        runtime.block_on(async {
            let waited =
                tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
            assert!(waited.is_err());
        });
        drop(runtime);
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_direct_delivery_closes_event_loop() {
        let (handle, mut events) = event_loop();
        let delivery = select_delivery(true, handle);
        assert!(matches!(delivery, Delivery::Direct));
        assert!(!events.turn().await);
    }

    #[test]
    fn test_marshaled_delivery_keeps_event_loop_open() {
        let (handle, mut events) = event_loop();
        let delivery = select_delivery(false, handle);
        assert!(matches!(delivery, Delivery::Marshaled(_)));
        assert_eq!(events.run_pending(), 0);
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("threads=2"),
            Ok(("threads".to_string(), "2".to_string()))
        );
        assert!(parse_key_value("threads").is_err());
        assert!(parse_key_value("=2").is_err());
    }
}
