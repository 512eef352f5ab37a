//! Hermes Sandbox - isolated code execution for tool calls
//!
//! Two backends:
//! - [`ScriptSandbox`]: an embedded Rhai engine that only sees the
//!   capabilities it was granted. Runs on the blocking pool with a deadline.
//! - [`InterpreterSession`]: a general-purpose interpreter (CPython on WASI
//!   via wasmtime) that is loaded once per process and reused. Every run gets
//!   its own store and its own output pipes.

mod capabilities;
mod script;
mod session;
mod wasm;

pub use capabilities::{Capability, CapabilitySet};
pub use script::{ScriptLimits, ScriptOutcome, ScriptSandbox};
pub use session::{Interpreter, InterpreterLoader, InterpreterOutput, InterpreterSession};
pub use wasm::{PythonLimits, WasiPython, WasiPythonLoader};

/// Errors from sandbox operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to initialize interpreter: {0}")]
    Initialization(String),

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl SandboxError {
    /// Execution failure with no captured output.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
