//! CPython on WASI, run by wasmtime
//!
//! The module is compiled and pre-linked once by [`WasiPythonLoader::load`].
//! Every run instantiates into a fresh `Store` with its own WASI context,
//! its own stdin carrying the code, and its own output pipes. A small driver
//! passed via `-c` executes the code, evaluates a trailing expression and
//! prints a JSON report on the real stdout.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use wasmtime::{
    Config, Engine, InstancePre, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap,
    TypedFunc, UpdateDeadline,
};
use wasmtime_wasi::p1::WasiP1Ctx;
use wasmtime_wasi::p2::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use crate::session::{Interpreter, InterpreterLoader, InterpreterOutput};
use crate::{Result, SandboxError};

/// Epoch tick period. A running guest yields to the executor once per tick.
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Guest path the stdlib directory is mounted under.
const GUEST_LIB_DIR: &str = "/usr/local/lib";

const DRIVER: &str = r#"
import ast, io, json, sys, traceback

source = sys.stdin.read()
real_stdout = sys.stdout
out, err = io.StringIO(), io.StringIO()
sys.stdout, sys.stderr = out, err
report = {"ok": True, "value": None, "error": None}
scope = {"__name__": "__main__"}
try:
    tree = ast.parse(source, "<sandbox>", "exec")
    last = None
    if tree.body and isinstance(tree.body[-1], ast.Expr):
        last = ast.Expression(tree.body.pop().value)
    exec(compile(tree, "<sandbox>", "exec"), scope)
    if last is not None:
        value = eval(compile(last, "<sandbox>", "eval"), scope)
        try:
            json.dumps(value)
            report["value"] = value
        except (TypeError, ValueError):
            report["value"] = repr(value)
except BaseException as exc:
    traceback.print_exc()
    report["ok"] = False
    report["error"] = "".join(traceback.format_exception_only(type(exc), exc)).strip()
finally:
    sys.stdout, sys.stderr = real_stdout, sys.__stderr__
report["stdout"] = out.getvalue()
report["stderr"] = err.getvalue()
real_stdout.write(json.dumps(report))
real_stdout.flush()
"#;

/// Resource limits for one interpreter run
#[derive(Debug, Clone)]
pub struct PythonLimits {
    pub max_memory_bytes: usize,
    pub max_output_bytes: usize,
}

impl Default for PythonLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 256 * 1024 * 1024, // 256MB
            max_output_bytes: 1024 * 1024,       // 1MB
        }
    }
}

/// Loads `python.wasm` from disk
#[derive(Debug, Clone)]
pub struct WasiPythonLoader {
    module_path: PathBuf,
    stdlib_dir: Option<PathBuf>,
    limits: PythonLimits,
}

impl WasiPythonLoader {
    pub fn new(module_path: impl Into<PathBuf>) -> Self {
        Self {
            module_path: module_path.into(),
            stdlib_dir: None,
            limits: PythonLimits::default(),
        }
    }

    /// Host directory holding the `pythonX.Y` stdlib tree
    pub fn with_stdlib(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stdlib_dir = Some(dir.into());
        self
    }

    pub fn with_limits(mut self, limits: PythonLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[async_trait]
impl InterpreterLoader for WasiPythonLoader {
    async fn load(&self) -> Result<Arc<dyn Interpreter>> {
        if !self.module_path.is_file() {
            return Err(SandboxError::Initialization(format!(
                "interpreter module not found at {}",
                self.module_path.display()
            )));
        }
        if let Some(dir) = &self.stdlib_dir {
            if !dir.is_dir() {
                return Err(SandboxError::Initialization(format!(
                    "stdlib directory not found at {}",
                    dir.display()
                )));
            }
        }

        let loader = self.clone();
        let python = tokio::task::spawn_blocking(move || WasiPython::compile(loader))
            .await
            .map_err(|e| SandboxError::Initialization(e.to_string()))??;
        Ok(Arc::new(python))
    }
}

struct PythonState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
}

/// A compiled, pre-linked interpreter
pub struct WasiPython {
    engine: Engine,
    instance_pre: InstancePre<PythonState>,
    stdlib_dir: Option<PathBuf>,
    limits: PythonLimits,
    _ticker: EpochTicker,
}

impl std::fmt::Debug for WasiPython {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiPython")
            .field("stdlib_dir", &self.stdlib_dir)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl WasiPython {
    fn compile(loader: WasiPythonLoader) -> Result<Self> {
        let init = |e: wasmtime::Error| SandboxError::Initialization(e.to_string());

        let mut config = Config::new();
        config.async_support(true);
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(init)?;

        debug!(path = %loader.module_path.display(), "Compiling interpreter module");
        let module = Module::from_file(&engine, &loader.module_path).map_err(init)?;

        let mut linker = Linker::new(&engine);
        wasmtime_wasi::p1::add_to_linker_async(&mut linker, |s: &mut PythonState| &mut s.wasi)
            .map_err(init)?;
        let instance_pre = linker.instantiate_pre(&module).map_err(init)?;

        let ticker = EpochTicker::start(engine.clone());

        Ok(Self {
            engine,
            instance_pre,
            stdlib_dir: loader.stdlib_dir,
            limits: loader.limits,
            _ticker: ticker,
        })
    }

    fn state(
        &self,
        code: &str,
        stdout: &MemoryOutputPipe,
        stderr: &MemoryOutputPipe,
    ) -> Result<PythonState> {
        let mut builder = WasiCtxBuilder::new();
        builder
            .stdin(MemoryInputPipe::new(code.to_string()))
            .stdout(stdout.clone())
            .stderr(stderr.clone())
            .args(&["python", "-c", DRIVER]);
        if let Some(dir) = &self.stdlib_dir {
            builder
                .env("PYTHONHOME", "/usr/local")
                .env("PYTHONDONTWRITEBYTECODE", "1")
                .preopened_dir(dir, GUEST_LIB_DIR, DirPerms::READ, FilePerms::READ)
                .map_err(|e| SandboxError::Initialization(e.to_string()))?;
        }

        Ok(PythonState {
            wasi: builder.build_p1(),
            limits: StoreLimitsBuilder::new()
                .memory_size(self.limits.max_memory_bytes)
                .build(),
        })
    }
}

#[async_trait]
impl Interpreter for WasiPython {
    async fn run(&self, code: &str, timeout: Duration) -> Result<InterpreterOutput> {
        let timeout_ms = timeout.as_millis() as u64;
        let stdout = MemoryOutputPipe::new(self.limits.max_output_bytes);
        let stderr = MemoryOutputPipe::new(self.limits.max_output_bytes);

        let mut store = Store::new(&self.engine, self.state(code, &stdout, &stderr)?);
        store.limiter(|s| &mut s.limits);

        // Yield to the executor on every tick so a dropped future stops the guest
        let deadline = Instant::now() + timeout;
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(move |_| {
            if Instant::now() >= deadline {
                Err(Trap::Interrupt.into())
            } else {
                Ok(UpdateDeadline::Yield(1))
            }
        });

        let instance = self
            .instance_pre
            .instantiate_async(&mut store)
            .await
            .map_err(|e| SandboxError::execution(e.to_string()))?;
        let start: TypedFunc<(), ()> = instance
            .get_typed_func(&mut store, "_start")
            .map_err(|e| SandboxError::execution(format!("no _start export: {e}")))?;

        let outcome = start.call_async(&mut store, ()).await;
        let raw_out = String::from_utf8_lossy(&stdout.contents()).into_owned();
        let raw_err = String::from_utf8_lossy(&stderr.contents()).into_owned();

        if let Err(err) = outcome {
            match err.downcast_ref::<I32Exit>() {
                Some(I32Exit(0)) => {}
                Some(I32Exit(code)) => {
                    return Err(SandboxError::Execution {
                        message: format!("interpreter exited with status {code}"),
                        stdout: raw_out,
                        stderr: raw_err,
                    });
                }
                None if matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt)) => {
                    return Err(SandboxError::Timeout(timeout_ms));
                }
                None => {
                    return Err(SandboxError::Execution {
                        message: err.to_string(),
                        stdout: raw_out,
                        stderr: raw_err,
                    });
                }
            }
        }

        parse_report(&raw_out, &raw_err)
    }
}

#[derive(Debug, Deserialize)]
struct Report {
    ok: bool,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

/// Turn the driver's report into an output or an execution error.
fn parse_report(raw_stdout: &str, raw_stderr: &str) -> Result<InterpreterOutput> {
    let report: Report = serde_json::from_str(raw_stdout.trim()).map_err(|e| {
        SandboxError::Execution {
            message: format!("unreadable interpreter report: {e}"),
            stdout: raw_stdout.to_string(),
            stderr: raw_stderr.to_string(),
        }
    })?;

    if report.ok {
        Ok(InterpreterOutput {
            stdout: report.stdout,
            stderr: report.stderr,
            value: report.value,
        })
    } else {
        Err(SandboxError::Execution {
            message: report
                .error
                .unwrap_or_else(|| "interpreter raised an error".to_string()),
            stdout: report.stdout,
            stderr: report.stderr,
        })
    }
}

/// Background thread driving epoch interruption for one engine
struct EpochTicker {
    stop: Arc<AtomicBool>,
}

impl EpochTicker {
    fn start(engine: Engine) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(EPOCH_TICK);
                engine.increment_epoch();
            }
        });
        Self { stop }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
