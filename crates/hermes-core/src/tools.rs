//! Tool definitions
//!
//! The tool set is closed: every name the model may call maps to one
//! [`ToolKind`], and each kind carries its OpenAI-compatible schema and its
//! typed arguments. Results travel back to the model as a JSON
//! [`ToolResult`] envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Why a tool call failed. Always reported to the model, never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unsupported language: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Execution(String),

    #[error("interpreter unavailable: {0}")]
    Initialization(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Uniform tool result envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolResult {
    pub fn success(value: Value) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error_message: None,
        }
    }

    pub fn failure(err: &ToolError) -> Self {
        Self {
            ok: false,
            value: None,
            error_message: Some(err.to_string()),
        }
    }

    /// Attach data to a failure (captured streams, partial output)
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Serialized form stored in the `tool` message
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            json!({"ok": false, "error": "unserializable tool result"}).to_string()
        })
    }
}

impl From<Result<Value, ToolError>> for ToolResult {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(err) => Self::failure(&err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Search,
    ProxyCall,
    ExecuteSandboxA,
    ExecuteSandboxB,
    GenerateCode,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::Search,
        ToolKind::ProxyCall,
        ToolKind::ExecuteSandboxA,
        ToolKind::ExecuteSandboxB,
        ToolKind::GenerateCode,
    ];

    /// Exact-match lookup
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Search => "search",
            ToolKind::ProxyCall => "proxy_call",
            ToolKind::ExecuteSandboxA => "execute_sandbox_a",
            ToolKind::ExecuteSandboxB => "execute_sandbox_b",
            ToolKind::GenerateCode => "generate_code",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::Search => "Search the web for current information, news, facts, or anything you don't know.",
            ToolKind::ProxyCall => "POST a JSON body to an endpoint of the configured API proxy and return its JSON response.",
            ToolKind::ExecuteSandboxA => "Run a Rhai script in an isolated sandbox with no file, network or process access. Returns the value of the last expression; print() output is shown as logs.",
            ToolKind::ExecuteSandboxB => "Run Python code in an isolated interpreter. Returns stdout, stderr and the value of a trailing expression. Each run starts from a clean namespace.",
            ToolKind::GenerateCode => "Generate starter code in a given language from a short description.",
        }
    }

    fn parameters(self) -> Value {
        match self {
            ToolKind::Search => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query" }
                },
                "required": ["query"]
            }),
            ToolKind::ProxyCall => json!({
                "type": "object",
                "properties": {
                    "endpoint": { "type": "string", "description": "Path of the proxy endpoint, e.g. /openai/v1/embeddings" },
                    "data": { "type": "object", "description": "JSON request body" }
                },
                "required": ["endpoint", "data"]
            }),
            ToolKind::ExecuteSandboxA => json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "The Rhai script to run" }
                },
                "required": ["code"]
            }),
            ToolKind::ExecuteSandboxB => json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "The Python code to run" }
                },
                "required": ["code"]
            }),
            ToolKind::GenerateCode => json!({
                "type": "object",
                "properties": {
                    "language": {
                        "type": "string",
                        "description": "Programming language (python, javascript, html, css, sql, bash)"
                    },
                    "description": { "type": "string", "description": "What the code should do" },
                    "requirements": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Specific requirements or features"
                    }
                },
                "required": ["language", "description"]
            }),
        }
    }

    /// OpenAI-compatible function schema
    pub fn schema(self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters()
            }
        })
    }
}

/// All tool schemas, in a fixed order
pub fn tool_schemas() -> Vec<Value> {
    ToolKind::ALL.into_iter().map(ToolKind::schema).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchArgs {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyArgs {
    pub endpoint: String,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeArgs {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateArgs {
    pub language: String,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Parse raw model-supplied arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(raw: &str) -> Result<T, ToolError> {
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
