//! Error types for the bridge

use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to spawn engine worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("engine worker panicked")]
    WorkerPanicked,
}
