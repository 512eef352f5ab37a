//! Model gateway
//!
//! Stateless client for OpenAI-compatible chat completions. Given the
//! history and the tool schemas it returns either final text or text plus
//! the tool calls the model wants made.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::conversation::{Message, Role, ToolCallRequest};

/// Failure of a model call. The only error that ends a turn.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model call timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// What the model said
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn into_message(self) -> Message {
        Message::assistant(self.content, self.tool_calls)
    }
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(&self, history: &[Message]) -> Result<ModelReply, TransportError>;
}

#[async_trait]
impl<G: ModelGateway + ?Sized> ModelGateway for Arc<G> {
    async fn complete(&self, history: &[Message]) -> Result<ModelReply, TransportError> {
        (**self).complete(history).await
    }
}

/// Known chat-completions providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    #[default]
    OpenRouter,
    AiPipe,
}

impl Provider {
    pub fn endpoint(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
            Provider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            Provider::AiPipe => "https://aipipe.org/openrouter/v1/chat/completions",
        }
    }

    /// Headers sent in addition to bearer auth
    pub fn extra_headers(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Provider::OpenRouter => &[
                ("HTTP-Referer", "https://github.com/HeyBattle1/hermes"),
                ("X-Title", "Hermes"),
            ],
            Provider::OpenAi | Provider::AiPipe => &[],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::AiPipe => "aipipe",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "openrouter" => Ok(Provider::OpenRouter),
            "aipipe" => Ok(Provider::AiPipe),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Settings for [`OpenAiGateway`]
pub struct GatewayConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: SecretString,
    /// Overrides the provider's endpoint
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Sent as the first message of every request
    pub system_prompt: Option<String>,
}

impl GatewayConfig {
    pub fn new(provider: Provider, model: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key,
            base_url: None,
            temperature: 0.7,
            max_tokens: 2000,
            system_prompt: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.endpoint())
    }
}

/// reqwest-backed gateway for OpenAI-compatible providers
pub struct OpenAiGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    tools: Vec<Value>,
}

impl OpenAiGateway {
    pub fn new(client: reqwest::Client, config: GatewayConfig, tools: Vec<Value>) -> Self {
        Self {
            client,
            config,
            tools,
        }
    }

    fn request_body(&self, history: &[Message]) -> Value {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(json!({"role": "system", "content": prompt}));
        }
        messages.extend(history.iter().map(wire_message));

        json!({
            "model": self.config.model,
            "messages": messages,
            "tools": self.tools,
            "tool_choice": "auto",
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn complete(&self, history: &[Message]) -> Result<ModelReply, TransportError> {
        let mut req = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .header("Content-Type", "application/json");
        for (name, value) in self.config.provider.extra_headers() {
            req = req.header(*name, *value);
        }

        debug!(
            provider = %self.config.provider,
            model = %self.config.model,
            messages = history.len(),
            "Calling model"
        );

        let resp = req
            .json(&self.request_body(history))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Model call rejected");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_reply(&body)
    }
}

/// Render a history message in chat-completions form.
fn wire_message(message: &Message) -> Value {
    match message.role {
        Role::User => json!({"role": "user", "content": message.content}),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        Role::Assistant if message.has_tool_calls() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments}
                    })
                })
                .collect();
            json!({"role": "assistant", "content": message.content, "tool_calls": calls})
        }
        Role::Assistant => json!({"role": "assistant", "content": message.content}),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireReply,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// Normally a JSON string; some providers send the object itself
    #[serde(default)]
    arguments: Value,
}

/// Decode `choices[0].message` of a chat-completions response.
fn parse_reply(body: &str) -> Result<ModelReply, TransportError> {
    let resp: ChatResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

    if let Some(err) = resp.error {
        return Err(TransportError::InvalidResponse(format!(
            "provider error: {}",
            err.message
        )));
    }

    let message = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::InvalidResponse("no choices in response".into()))?
        .message;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = match call.function.arguments {
                Value::String(s) => s,
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments,
            }
        })
        .collect();

    Ok(ModelReply {
        content: message.content.filter(|c| !c.is_empty()),
        tool_calls,
    })
}
