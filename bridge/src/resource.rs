//! Locating the engine's data file (the evaluation network).
//!
//! Resolution runs once per session, on the worker thread, right before the
//! engine is built.

use std::path::PathBuf;

use crate::config::EVAL_FILE_VAR;

pub trait ResourceResolver: Send + Sync {
    fn resolve(&self) -> Option<PathBuf>;
}

impl<F> ResourceResolver for F
where
    F: Fn() -> Option<PathBuf> + Send + Sync,
{
    fn resolve(&self) -> Option<PathBuf> {
        self()
    }
}

/// Reads the path from an environment variable; only existing files count.
#[derive(Debug, Clone)]
pub struct EnvResolver {
    var: String,
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new(EVAL_FILE_VAR)
    }
}

impl EnvResolver {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl ResourceResolver for EnvResolver {
    fn resolve(&self) -> Option<PathBuf> {
        let path = PathBuf::from(std::env::var_os(&self.var)?);
        if path.is_file() {
            Some(path)
        } else {
            tracing::warn!("{} points at a missing file: {}", self.var, path.display());
            None
        }
    }
}

/// Always resolves to the same answer.
#[derive(Debug, Clone, Default)]
pub struct FixedResolver(pub Option<PathBuf>);

impl ResourceResolver for FixedResolver {
    fn resolve(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}
