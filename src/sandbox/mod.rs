//! Isolated execution of generated code
//!
//! Code never runs on the orchestrator's task. It is handed to an
//! [`ExecutionChannel`], whose worker owns one long-lived interpreter and
//! answers every submission with exactly one [`ExecutionOutcome`].
//!
//! # Architecture
//!
//! ```text
//! Session ──submit(code)──► ExecutionChannel ──Job──► worker task
//!    ▲                                                  │
//!    │                                  (lazy, once) InterpreterLauncher
//!    │                                                  │
//!    │                                             Interpreter.run()
//!    │                                                  │
//!    └────────── PendingExecution::outcome() ◄──oneshot─┘
//! ```

pub mod channel;
pub mod python;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use channel::{ChannelError, ExecutionChannel, PendingExecution};
pub use python::{PythonInterpreter, PythonLauncher};

/// Reported as the output of a run that printed nothing
pub const NO_OUTPUT: &str = "Code ran successfully with no output.";

/// Result of running one code body
///
/// Exactly one of output and failure detail is present, and the
/// constructors never leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Everything the code printed to stdout and stderr, in print order
    Success { output: String },
    /// The interpreter's error message
    Failure { detail: String },
}

impl ExecutionOutcome {
    /// Build a success; a run that printed nothing reports [`NO_OUTPUT`]
    pub fn success(output: impl Into<String>) -> Self {
        let output = output.into();
        let output = if output.is_empty() {
            NO_OUTPUT.to_string()
        } else {
            output
        };
        ExecutionOutcome::Success { output }
    }

    /// Build a failure; a blank message is replaced so the detail is never empty
    pub fn failure(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = if detail.trim().is_empty() {
            "Execution failed without an error message".to_string()
        } else {
            detail
        };
        ExecutionOutcome::Failure { detail }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success { output } => Some(output),
            ExecutionOutcome::Failure { .. } => None,
        }
    }

    pub fn failure_detail(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success { .. } => None,
            ExecutionOutcome::Failure { detail } => Some(detail),
        }
    }
}

/// Error raised by the interpreter process itself, as opposed to the code it runs
#[derive(Debug, thiserror::Error)]
pub enum InterpreterError {
    #[error("failed to start interpreter: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("interpreter I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("interpreter exited unexpectedly")]
    Exited,
    #[error("interpreter did not become ready within {0:?}")]
    StartupTimeout(std::time::Duration),
    #[error("malformed interpreter reply: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("unexpected interpreter reply: {0}")]
    UnexpectedReply(String),
}

/// A live execution engine that runs one code body at a time
#[async_trait]
pub trait Interpreter: Send {
    /// Run `code` with stdout and stderr captured into one stream.
    ///
    /// `Ok` carries the outcome of the code itself, including code that
    /// raised. `Err` means the interpreter can no longer be trusted and
    /// must be discarded.
    async fn run(&mut self, code: &str) -> Result<ExecutionOutcome, InterpreterError>;

    /// Stop the interpreter and release its resources
    async fn shutdown(&mut self) {}
}

/// Starts interpreters for an [`ExecutionChannel`]
#[async_trait]
pub trait InterpreterLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Interpreter>, InterpreterError>;
}
