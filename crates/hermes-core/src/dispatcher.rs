//! Tool dispatch
//!
//! Routes a requested call to its handler and folds every outcome, success
//! or failure, into a [`ToolResult`]. Nothing here returns `Err`: a broken
//! tool call is something the model gets told about, not a reason to stop.

use std::sync::Arc;
use std::time::Duration;

use hermes_sandbox::{InterpreterSession, SandboxError, ScriptSandbox};
use serde_json::{json, Value};
use tracing::debug;

use crate::codegen;
use crate::tools::{
    parse_args, CodeArgs, GenerateArgs, ProxyArgs, SearchArgs, ToolError, ToolKind, ToolResult,
};
use crate::web::{ProxyClient, Unconfigured, WebSearch};

/// Outcome of one dispatched call
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub result: ToolResult,
    /// Log lines the tool emitted while running, in order
    pub observations: Vec<String>,
}

impl Dispatch {
    fn failed(err: ToolError) -> Self {
        ToolResult::failure(&err).into()
    }
}

impl From<ToolResult> for Dispatch {
    fn from(result: ToolResult) -> Self {
        Self {
            result,
            observations: Vec::new(),
        }
    }
}

impl From<Result<Value, ToolError>> for Dispatch {
    fn from(result: Result<Value, ToolError>) -> Self {
        ToolResult::from(result).into()
    }
}

/// Per-tool execution deadlines for the sandboxes
#[derive(Debug, Clone, Copy)]
pub struct ToolTimeouts {
    pub script: Duration,
    pub python: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            script: Duration::from_secs(5),
            python: Duration::from_secs(10),
        }
    }
}

pub struct ToolDispatcher {
    search: Arc<dyn WebSearch>,
    proxy: Arc<dyn ProxyClient>,
    script: ScriptSandbox,
    python: Option<Arc<InterpreterSession>>,
    timeouts: ToolTimeouts,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolDispatcher {
    /// Sandboxes with default settings; no web collaborators, no interpreter.
    pub fn new() -> Self {
        Self {
            search: Arc::new(Unconfigured("search")),
            proxy: Arc::new(Unconfigured("proxy_call")),
            script: ScriptSandbox::default(),
            python: None,
            timeouts: ToolTimeouts::default(),
        }
    }

    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = search;
        self
    }

    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyClient>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_script(mut self, script: ScriptSandbox) -> Self {
        self.script = script;
        self
    }

    pub fn with_interpreter(mut self, session: Arc<InterpreterSession>) -> Self {
        self.python = Some(session);
        self
    }

    pub fn with_timeouts(mut self, timeouts: ToolTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Run one tool call.
    pub async fn dispatch(&self, name: &str, raw_arguments: &str) -> Dispatch {
        let dispatch = match ToolKind::from_name(name) {
            Some(kind) => self.route(kind, raw_arguments).await,
            None => Dispatch::failed(ToolError::UnknownTool(name.to_string())),
        };
        debug!(
            tool = name,
            ok = dispatch.result.ok,
            observations = dispatch.observations.len(),
            "Tool dispatched"
        );
        dispatch
    }

    async fn route(&self, kind: ToolKind, raw: &str) -> Dispatch {
        match kind {
            ToolKind::Search => self.web_search(raw).await.into(),
            ToolKind::ProxyCall => self.proxy_call(raw).await.into(),
            ToolKind::ExecuteSandboxA => self.run_script(raw).await,
            ToolKind::ExecuteSandboxB => self.run_python(raw).await,
            ToolKind::GenerateCode => generate_code(raw).into(),
        }
    }

    async fn web_search(&self, raw: &str) -> Result<Value, ToolError> {
        let args: SearchArgs = parse_args(raw)?;
        self.search.search(&args.query).await
    }

    async fn proxy_call(&self, raw: &str) -> Result<Value, ToolError> {
        let args: ProxyArgs = parse_args(raw)?;
        if !args.data.is_object() {
            return Err(ToolError::InvalidArguments("data must be an object".into()));
        }
        self.proxy.call(&args.endpoint, &args.data).await
    }

    async fn run_script(&self, raw: &str) -> Dispatch {
        let args: CodeArgs = match parse_args(raw) {
            Ok(args) => args,
            Err(err) => return Dispatch::failed(err),
        };

        let outcome = self.script.execute(&args.code, self.timeouts.script).await;
        let result = if outcome.ok {
            ToolResult::success(outcome.value.unwrap_or(Value::Null))
        } else {
            let message = outcome.error.unwrap_or_else(|| "script failed".to_string());
            ToolResult::failure(&ToolError::Execution(message))
        };

        Dispatch {
            result,
            observations: outcome.logs,
        }
    }

    async fn run_python(&self, raw: &str) -> Dispatch {
        let args: CodeArgs = match parse_args(raw) {
            Ok(args) => args,
            Err(err) => return Dispatch::failed(err),
        };
        let Some(session) = &self.python else {
            return Dispatch::failed(ToolError::Initialization(
                "no interpreter module configured".into(),
            ));
        };

        let timeout = self.timeouts.python;
        let result = match session.execute(&args.code, timeout).await {
            Ok(out) => ToolResult::success(json!({
                "value": out.value,
                "stdout": out.stdout,
                "stderr": out.stderr,
            })),
            Err(SandboxError::Execution {
                message,
                stdout,
                stderr,
            }) => ToolResult::failure(&ToolError::Execution(message))
                .with_value(json!({"stdout": stdout, "stderr": stderr})),
            Err(SandboxError::Initialization(msg)) => {
                ToolResult::failure(&ToolError::Initialization(msg))
            }
            Err(SandboxError::Timeout(ms)) => ToolResult::failure(&ToolError::Timeout(ms)),
        };
        result.into()
    }
}

fn generate_code(raw: &str) -> Result<Value, ToolError> {
    let args: GenerateArgs = parse_args(raw)?;
    let code = codegen::generate(&args.language, &args.description, &args.requirements)
        .map_err(|e| ToolError::Unsupported(e.0))?;
    Ok(json!({
        "language": args.language,
        "description": args.description,
        "requirements": args.requirements,
        "code": code,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hermes_sandbox::{Interpreter, InterpreterLoader, InterpreterOutput};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSearch;

    #[async_trait]
    impl WebSearch for FixedSearch {
        async fn search(&self, query: &str) -> Result<Value, ToolError> {
            Ok(json!({"query": query, "results": []}))
        }
    }

    struct FailingProxy;

    #[async_trait]
    impl ProxyClient for FailingProxy {
        async fn call(&self, _endpoint: &str, _data: &Value) -> Result<Value, ToolError> {
            Err(ToolError::Transport("connection refused".into()))
        }
    }

    /// Interpreter that "raises" on any code containing "raise".
    struct ScriptedPython;

    #[async_trait]
    impl Interpreter for ScriptedPython {
        async fn run(
            &self,
            code: &str,
            _timeout: Duration,
        ) -> hermes_sandbox::Result<InterpreterOutput> {
            if code.contains("raise") {
                return Err(SandboxError::Execution {
                    message: "ValueError: nope".into(),
                    stdout: "before\n".into(),
                    stderr: "Traceback".into(),
                });
            }
            Ok(InterpreterOutput {
                stdout: "hi\n".into(),
                stderr: String::new(),
                value: Some(json!(2)),
            })
        }
    }

    struct PythonLoader {
        loads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl InterpreterLoader for PythonLoader {
        async fn load(&self) -> hermes_sandbox::Result<Arc<dyn Interpreter>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedPython))
        }
    }

    fn dispatcher() -> (ToolDispatcher, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let session = InterpreterSession::new(PythonLoader {
            loads: Arc::clone(&loads),
        });
        let dispatcher = ToolDispatcher::new()
            .with_search(Arc::new(FixedSearch))
            .with_proxy(Arc::new(FailingProxy))
            .with_interpreter(Arc::new(session));
        (dispatcher, loads)
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (dispatcher, _) = dispatcher();
        let out = dispatcher.dispatch("rm_rf", "{}").await;
        assert!(!out.result.ok);
        assert!(out.result.error_message.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let (dispatcher, _) = dispatcher();
        let out = dispatcher.dispatch("search", "{\"query\":").await;
        assert!(!out.result.ok);
        assert!(out.result.error_message.unwrap().starts_with("invalid arguments"));
    }

    #[tokio::test]
    async fn test_search_passes_through() {
        let (dispatcher, _) = dispatcher();
        let out = dispatcher.dispatch("search", r#"{"query":"rust"}"#).await;
        assert!(out.result.ok);
        assert_eq!(out.result.value.unwrap()["query"], "rust");
    }

    #[tokio::test]
    async fn test_proxy_errors_become_failures() {
        let (dispatcher, _) = dispatcher();
        let out = dispatcher
            .dispatch("proxy_call", r#"{"endpoint":"/x","data":{}}"#)
            .await;
        assert!(!out.result.ok);
        assert!(out.result.error_message.unwrap().contains("connection refused"));

        let out = dispatcher
            .dispatch("proxy_call", r#"{"endpoint":"/x","data":[1]}"#)
            .await;
        assert!(out.result.error_message.unwrap().contains("data must be an object"));
    }

    #[tokio::test]
    async fn test_unconfigured_collaborators() {
        let dispatcher = ToolDispatcher::new();
        let out = dispatcher.dispatch("search", r#"{"query":"rust"}"#).await;
        assert_eq!(
            out.result.error_message.as_deref(),
            Some("search is not configured")
        );

        let out = dispatcher.dispatch("execute_sandbox_b", r#"{"code":"1"}"#).await;
        assert!(out.result.error_message.unwrap().starts_with("interpreter unavailable"));
    }

    #[tokio::test]
    async fn test_script_logs_become_observations() {
        let (dispatcher, _) = dispatcher();
        let out = dispatcher
            .dispatch("execute_sandbox_a", r#"{"code":"print(\"a\"); print(\"b\"); 1 + 1"}"#)
            .await;
        assert!(out.result.ok);
        assert_eq!(out.result.value, Some(json!(2)));
        assert_eq!(out.observations, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_script_throw() {
        let (dispatcher, _) = dispatcher();
        let out = dispatcher
            .dispatch("execute_sandbox_a", r#"{"code":"throw \"bad input\";"}"#)
            .await;
        assert!(!out.result.ok);
        assert_eq!(out.result.error_message.as_deref(), Some("bad input"));
    }

    #[tokio::test]
    async fn test_python_failure_keeps_streams() {
        let (dispatcher, loads) = dispatcher();

        let ok = dispatcher
            .dispatch("execute_sandbox_b", r#"{"code":"1 + 1"}"#)
            .await;
        assert_eq!(ok.result.value.unwrap()["value"], 2);

        let failed = dispatcher
            .dispatch("execute_sandbox_b", r#"{"code":"raise ValueError('nope')"}"#)
            .await;
        assert!(!failed.result.ok);
        assert_eq!(failed.result.error_message.as_deref(), Some("ValueError: nope"));
        assert_eq!(failed.result.value.unwrap()["stdout"], "before\n");

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generate_code() {
        let (dispatcher, _) = dispatcher();
        let out = dispatcher
            .dispatch(
                "generate_code",
                r#"{"language":"Python","description":"calculator","requirements":["tests"]}"#,
            )
            .await;
        let value = out.result.value.unwrap();
        assert!(value["code"].as_str().unwrap().contains("class Calculator"));
        assert_eq!(value["requirements"], json!(["tests"]));

        let out = dispatcher
            .dispatch("generate_code", r#"{"language":"unsupported-lang","description":"x"}"#)
            .await;
        assert!(!out.result.ok);
        assert!(out.result.error_message.unwrap().contains("unsupported language"));
    }
}
