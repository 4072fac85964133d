//! Configuration for the bridge.
//!
//! Every value has a compile-time default and can be overridden at runtime
//! via a dedicated environment variable.

/// Default OS thread name of the engine worker.
const DEFAULT_WORKER_NAME: &str = "uci-engine";

/// Environment variable naming the engine data file, read by
/// [`EnvResolver`](crate::resource::EnvResolver).
pub const EVAL_FILE_VAR: &str = "UCI_BRIDGE_EVAL_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Queue `uci` and `isready` right after the worker is spawned.
    pub handshake_on_init: bool,
    /// Name given to the worker thread.
    pub worker_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handshake_on_init: true,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self {
            handshake_on_init: get_handshake_on_init(),
            worker_name: get_worker_name(),
        }
    }
}

/// Whether `init` sends the handshake.
///
/// Priority:
/// 1. `UCI_BRIDGE_HANDSHAKE` env variable if set (`0`, `false`, `off` and `no`
///    disable it, anything else enables it)
/// 2. enabled as fallback
pub fn get_handshake_on_init() -> bool {
    match std::env::var("UCI_BRIDGE_HANDSHAKE") {
        Ok(value) => parse_flag(&value),
        Err(_) => true,
    }
}

/// Get the worker thread name.
///
/// Priority:
/// 1. `UCI_BRIDGE_WORKER_NAME` env variable if set and non-empty
/// 2. `uci-engine` as fallback
pub fn get_worker_name() -> String {
    match std::env::var("UCI_BRIDGE_WORKER_NAME") {
        Ok(name) if !name.trim().is_empty() => name,
        _ => DEFAULT_WORKER_NAME.to_string(),
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "off" | "no"
    )
}
