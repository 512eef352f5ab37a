//! Script sandbox backed by an embedded Rhai engine
//!
//! A fresh engine is built for every run from the granted capabilities, so
//! nothing a script does can be observed by the next one. The engine checks
//! its deadline on every operation; the caller additionally abandons the run
//! if the blocking task does not come back in time.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{
    ArithmeticPackage, BasicArrayPackage, BasicIteratorPackage, BasicMapPackage,
    BasicMathPackage, BasicStringPackage, BasicTimePackage, LogicPackage, MoreStringPackage,
    Package,
};
use rhai::{Dynamic, Engine, EvalAltResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::capabilities::{Capability, CapabilitySet};

/// How long past the deadline the caller waits before giving up on the task.
const ABANDON_GRACE: Duration = Duration::from_millis(250);

/// Engine-level resource limits
#[derive(Debug, Clone)]
pub struct ScriptLimits {
    /// Maximum operations per run; 0 means unlimited (the deadline still applies)
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
            max_string_size: 1024 * 1024, // 1MB
            max_array_size: 100_000,
            max_map_size: 100_000,
        }
    }
}

/// Result of one script run
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutcome {
    pub ok: bool,
    /// Value of the script, `null` for unit. Present only on success.
    pub value: Option<Value>,
    pub error: Option<String>,
    /// Lines passed to `print`/`debug`, in call order
    pub logs: Vec<String>,
}

impl ScriptOutcome {
    fn success(value: Value, logs: Vec<String>) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error: None,
            logs,
        }
    }

    fn failure(error: impl Into<String>, logs: Vec<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(error.into()),
            logs,
        }
    }
}

/// The script sandbox
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    capabilities: CapabilitySet,
    limits: ScriptLimits,
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self::new(CapabilitySet::standard())
    }
}

impl ScriptSandbox {
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self {
            capabilities,
            limits: ScriptLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ScriptLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Run a script. Never fails: errors and timeouts come back as `ok: false`.
    pub async fn execute(&self, code: &str, timeout: Duration) -> ScriptOutcome {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let deadline = Instant::now() + timeout;
        let engine = self.build_engine(deadline, Arc::clone(&logs));
        let code = code.to_string();

        let task = tokio::task::spawn_blocking(move || engine.eval::<Dynamic>(&code));
        let result = tokio::time::timeout(timeout + ABANDON_GRACE, task).await;
        let lines = drain(&logs);

        match result {
            Ok(Ok(Ok(value))) => {
                debug!(logs = lines.len(), "script finished");
                ScriptOutcome::success(to_json(&value), lines)
            }
            Ok(Ok(Err(err))) => {
                debug!(error = %err, "script raised");
                ScriptOutcome::failure(describe(&err, timeout), lines)
            }
            Ok(Err(join)) => {
                warn!(error = %join, "script task did not complete");
                ScriptOutcome::failure(format!("script task failed: {join}"), lines)
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "abandoning script run");
                ScriptOutcome::failure(timed_out(timeout), lines)
            }
        }
    }

    fn build_engine(&self, deadline: Instant, logs: Arc<Mutex<Vec<String>>>) -> Engine {
        let mut engine = Engine::new_raw();
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        // LanguageCorePackage stays out: sleep, exit and parse_json are not capabilities

        // Silent unless Logging is granted
        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});

        for cap in self.capabilities.iter() {
            match cap {
                Capability::Arithmetic => {
                    engine.register_global_module(ArithmeticPackage::new().as_shared_module());
                    engine.register_global_module(LogicPackage::new().as_shared_module());
                }
                Capability::Math => {
                    engine.register_global_module(BasicMathPackage::new().as_shared_module());
                }
                Capability::Strings => {
                    engine.register_global_module(BasicStringPackage::new().as_shared_module());
                    engine.register_global_module(MoreStringPackage::new().as_shared_module());
                }
                Capability::Collections => {
                    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
                    engine.register_global_module(BasicMapPackage::new().as_shared_module());
                    engine.register_global_module(BasicIteratorPackage::new().as_shared_module());
                }
                Capability::Time => {
                    engine.register_global_module(BasicTimePackage::new().as_shared_module());
                    engine.register_fn("now", || chrono::Utc::now().to_rfc3339());
                }
                Capability::Logging => {
                    // print/debug resolve through the string conversions
                    engine.register_global_module(BasicStringPackage::new().as_shared_module());
                    let printed = Arc::clone(&logs);
                    engine.on_print(move |text| push_line(&printed, text.to_string()));
                    let debugged = Arc::clone(&logs);
                    engine.on_debug(move |text, _source, _pos| {
                        push_line(&debugged, text.to_string())
                    });
                }
            }
        }

        let limits = &self.limits;
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);
        engine.set_max_expr_depths(64, 32);

        engine.on_progress(move |_ops| {
            if Instant::now() >= deadline {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        engine
    }
}

fn push_line(logs: &Mutex<Vec<String>>, line: String) {
    if let Ok(mut lines) = logs.lock() {
        lines.push(line);
    }
}

fn drain(logs: &Mutex<Vec<String>>) -> Vec<String> {
    match logs.lock() {
        Ok(mut lines) => std::mem::take(&mut *lines),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

fn to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn describe(err: &EvalAltResult, timeout: Duration) -> String {
    match err {
        // `throw x` carries the thrown value; report it as-is
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        EvalAltResult::ErrorTerminated(..) => timed_out(timeout),
        other => other.to_string(),
    }
}

fn timed_out(timeout: Duration) -> String {
    format!("script timed out after {}ms", timeout.as_millis())
}
