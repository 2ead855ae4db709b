//! Embedded runtime contract.
//!
//! The console never talks to an interpreter directly: it goes through a
//! [`RuntimeLoader`] to obtain a [`RuntimeHandle`], and every long-latency operation
//! is an async call on that handle.

#[cfg(test)]
pub(crate) mod mock;
mod python;

pub use python::PythonLoader;

use async_trait::async_trait;
use std::process::ExitStatus;

/// Options used when acquiring a runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub index_url: String,
}

/// A call into a function defined by the primed entrypoint code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrypointArgs {
    pub function: String,
    pub argument: String,
}

impl EntrypointArgs {
    pub fn call(function: &str, argument: impl Into<String>) -> Self {
        Self {
            function: function.to_string(),
            argument: argument.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to start runtime `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to fetch {locator}: {reason}")]
    Fetch { locator: String, reason: String },
    #[error("`{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{message}")]
    Script {
        message: String,
        trace: Option<String>,
    },
    #[error("runtime protocol error: {0}")]
    Protocol(String),
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error("path `{0}` escapes the runtime storage")]
    InvalidPath(String),
    #[error("runtime has exited")]
    Closed,
}

impl RuntimeError {
    /// Diagnostic trace reported by the runtime, if any.
    pub fn trace(&self) -> Option<&str> {
        match self {
            RuntimeError::Script { trace, .. } => trace.as_deref(),
            RuntimeError::Command { stderr, .. } if !stderr.is_empty() => Some(stderr.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[async_trait]
pub trait RuntimeLoader: Send + Sync {
    async fn acquire(&self, config: &RuntimeConfig) -> Result<Box<dyn RuntimeHandle>>;
}

/// A fully acquired runtime. Calls on one handle are expected one at a time.
#[async_trait]
pub trait RuntimeHandle: Send + Sync {
    async fn load_capabilities(&self, names: &[String]) -> Result<()>;

    async fn install_package(&self, locator: &str) -> Result<()>;

    /// Copy `source` into the runtime's storage at `dest`, returning the byte count.
    async fn materialize_asset(&self, source: &str, dest: &str) -> Result<u64>;

    async fn prime_query_entrypoint(&self, code: &str) -> Result<()>;

    async fn run_query(&self, args: &EntrypointArgs) -> Result<String>;

    /// Path under which code running inside the runtime sees `dest`.
    fn storage_path(&self, dest: &str) -> String {
        dest.to_string()
    }
}
