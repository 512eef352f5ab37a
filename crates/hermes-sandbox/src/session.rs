//! Lazily loaded, shared interpreter session
//!
//! The interpreter is expensive to bring up, so a process holds one
//! [`InterpreterSession`] (usually behind an `Arc`) and every tool call goes
//! through it. The first call loads the interpreter; concurrent first calls
//! wait on the same load. A failed load leaves the session empty so the next
//! call tries again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{Result, SandboxError};

/// How long past the run timeout the session waits before giving up.
const ABANDON_GRACE: Duration = Duration::from_millis(250);

/// Captured output of one interpreter run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterpreterOutput {
    pub stdout: String,
    pub stderr: String,
    /// Value of the trailing expression, if the code ended with one
    pub value: Option<serde_json::Value>,
}

/// A loaded interpreter. Each `run` must start from a clean namespace.
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn run(&self, code: &str, timeout: Duration) -> Result<InterpreterOutput>;
}

/// Brings an interpreter up
#[async_trait]
pub trait InterpreterLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Interpreter>>;
}

/// Process-wide handle on a lazily loaded interpreter
pub struct InterpreterSession {
    loader: Box<dyn InterpreterLoader>,
    interpreter: OnceCell<Arc<dyn Interpreter>>,
}

impl InterpreterSession {
    pub fn new(loader: impl InterpreterLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            interpreter: OnceCell::new(),
        }
    }

    /// Whether the interpreter has been loaded
    pub fn is_ready(&self) -> bool {
        self.interpreter.initialized()
    }

    /// Load the interpreter now instead of on first use.
    pub async fn warm_up(&self) -> Result<()> {
        self.interpreter().await.map(|_| ())
    }

    /// Run `code`, loading the interpreter first if needed.
    ///
    /// Load time does not count against `timeout`.
    pub async fn execute(&self, code: &str, timeout: Duration) -> Result<InterpreterOutput> {
        let interpreter = self.interpreter().await?;
        match tokio::time::timeout(timeout + ABANDON_GRACE, interpreter.run(code, timeout)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "abandoning interpreter run");
                Err(SandboxError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn interpreter(&self) -> Result<Arc<dyn Interpreter>> {
        let interpreter = self
            .interpreter
            .get_or_try_init(|| async {
                info!("Loading interpreter");
                match self.loader.load().await {
                    Ok(interpreter) => {
                        info!("Interpreter ready");
                        Ok(interpreter)
                    }
                    Err(SandboxError::Initialization(msg)) => {
                        warn!(error = %msg, "Interpreter failed to load");
                        Err(SandboxError::Initialization(msg))
                    }
                    Err(other) => {
                        warn!(error = %other, "Interpreter failed to load");
                        Err(SandboxError::Initialization(other.to_string()))
                    }
                }
            })
            .await?;
        Ok(Arc::clone(interpreter))
    }
}

impl fmt::Debug for InterpreterSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterSession")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
