//! Hermes Core - conversation loop, tool dispatch and model gateway
//!
//! This crate holds everything between the user's message and the final
//! reply. Frontends own a [`ConversationStore`] and hand it to an [`Agent`]
//! for each turn.

pub mod agent;
pub mod codegen;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod gateway;
pub mod tools;
pub mod web;

pub use agent::{Agent, AgentConfig, AgentEvent, TurnError, TurnOutcome};
pub use config::{ConfigError, HermesConfig};
pub use conversation::{ConversationError, ConversationStore, Message, Phase, Role, ToolCallRequest};
pub use dispatcher::{Dispatch, ToolDispatcher, ToolTimeouts};
pub use gateway::{GatewayConfig, ModelGateway, ModelReply, OpenAiGateway, Provider, TransportError};
pub use tools::{tool_schemas, ToolError, ToolKind, ToolResult};
