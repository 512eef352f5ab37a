//! Configuration
//!
//! `HermesConfig` is read from a JSON file in which every field is optional,
//! then adjusted from `HERMES_*` environment variables. It knows how to
//! build the runtime pieces (gateway settings, dispatcher, agent limits).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hermes_sandbox::{
    Capability, InterpreterSession, PythonLimits, ScriptSandbox, WasiPythonLoader,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::agent::{Agent, AgentConfig, MAX_TOOL_ROUNDS};
use crate::dispatcher::{ToolDispatcher, ToolTimeouts};
use crate::gateway::{GatewayConfig, OpenAiGateway, Provider};
use crate::tools::tool_schemas;
use crate::web::{GoogleSearch, ProxyHttp, DEFAULT_PROXY_URL, DEFAULT_SEARCH_URL};

pub const ENV_API_KEY: &str = "HERMES_API_KEY";
pub const ENV_PROVIDER: &str = "HERMES_PROVIDER";
pub const ENV_MODEL: &str = "HERMES_MODEL";

const DEFAULT_SYSTEM_PROMPT: &str = "You are Hermes, an assistant that can call tools to answer questions.

TOOLS YOU HAVE:
• search - search the web for current information
• proxy_call - call an API endpoint through the configured proxy
• execute_sandbox_a - run a Rhai script (arithmetic, strings, arrays, maps, time)
• execute_sandbox_b - run Python code; the value of a trailing expression is returned
• generate_code - produce starter code in python, javascript, html, css, sql or bash

GUIDELINES:
• Use tools when they help; compute instead of guessing
• Tool results arrive as JSON with an `ok` flag; read `error` when it is false
• Be concise and direct";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no API key configured (set api_key in the config file or HERMES_API_KEY)")]
    MissingApiKey,

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HermesConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<SecretString>,
    /// Overrides the provider's chat-completions endpoint
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub agent: AgentSection,
    pub search: SearchSection,
    pub proxy: ProxySection,
    pub script: ScriptSection,
    pub python: PythonSection,
}

impl Default for HermesConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: "openai/gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: 2000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            agent: AgentSection::default(),
            search: SearchSection::default(),
            proxy: ProxySection::default(),
            script: ScriptSection::default(),
            python: PythonSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_rounds: usize,
    pub turn_deadline_ms: Option<u64>,
    pub model_timeout_ms: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_rounds: MAX_TOOL_ROUNDS,
            turn_deadline_ms: None,
            model_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub api_key: Option<SecretString>,
    pub engine_id: Option<String>,
    pub base_url: String,
    pub max_results: usize,
    pub timeout_ms: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key: None,
            engine_id: None,
            base_url: DEFAULT_SEARCH_URL.to_string(),
            max_results: 5,
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub base_url: String,
    /// Falls back to the top-level `api_key`
    pub token: Option<SecretString>,
    pub timeout_ms: u64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROXY_URL.to_string(),
            token: None,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptSection {
    pub timeout_ms: u64,
    pub capabilities: Vec<Capability>,
}

impl Default for ScriptSection {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            capabilities: Capability::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PythonSection {
    /// Path to a WASI build of CPython (`python.wasm`)
    pub module_path: Option<PathBuf>,
    /// Host directory mounted as the interpreter's stdlib
    pub stdlib_dir: Option<PathBuf>,
    pub timeout_ms: u64,
    pub max_memory_mb: usize,
    pub max_output_bytes: usize,
}

impl Default for PythonSection {
    fn default() -> Self {
        Self {
            module_path: None,
            stdlib_dir: None,
            timeout_ms: 10_000,
            max_memory_mb: 256,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl HermesConfig {
    /// Read a config file. Fields missing from the file keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `HERMES_API_KEY`, `HERMES_PROVIDER` and `HERMES_MODEL`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.is_empty()) {
            self.api_key = Some(SecretString::new(key));
        }
        if let Some(provider) = lookup(ENV_PROVIDER) {
            self.provider = provider.parse().map_err(|reason| ConfigError::Invalid {
                field: ENV_PROVIDER,
                reason,
            })?;
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|m| !m.is_empty()) {
            self.model = model;
        }
        Ok(())
    }

    pub fn gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        let api_key = self.api_key.as_ref().ok_or(ConfigError::MissingApiKey)?;
        let mut config = GatewayConfig::new(self.provider, self.model.clone(), copy_secret(api_key));
        config.base_url = self.base_url.clone();
        config.temperature = self.temperature;
        config.max_tokens = self.max_tokens;
        config.system_prompt = Some(self.system_prompt.clone()).filter(|p| !p.trim().is_empty());
        Ok(config)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_rounds: self.agent.max_rounds,
            turn_deadline: self.agent.turn_deadline_ms.map(Duration::from_millis),
            model_timeout: Duration::from_millis(self.agent.model_timeout_ms),
        }
    }

    pub fn script_sandbox(&self) -> ScriptSandbox {
        ScriptSandbox::new(self.script.capabilities.iter().copied().collect())
    }

    /// The interpreter session, if a module is configured. Not loaded yet.
    pub fn interpreter_session(&self) -> Option<Arc<InterpreterSession>> {
        let python = &self.python;
        let mut loader = WasiPythonLoader::new(python.module_path.clone()?).with_limits(
            PythonLimits {
                max_memory_bytes: python.max_memory_mb * 1024 * 1024,
                max_output_bytes: python.max_output_bytes,
            },
        );
        if let Some(dir) = &python.stdlib_dir {
            loader = loader.with_stdlib(dir.clone());
        }
        Some(Arc::new(InterpreterSession::new(loader)))
    }

    pub fn tool_timeouts(&self) -> ToolTimeouts {
        ToolTimeouts {
            script: Duration::from_millis(self.script.timeout_ms),
            python: Duration::from_millis(self.python.timeout_ms),
        }
    }

    /// Build a dispatcher wired to the configured collaborators.
    pub fn dispatcher(
        &self,
        client: &reqwest::Client,
        interpreter: Option<Arc<InterpreterSession>>,
    ) -> ToolDispatcher {
        let mut dispatcher = ToolDispatcher::new()
            .with_script(self.script_sandbox())
            .with_timeouts(self.tool_timeouts());

        if let (Some(key), Some(engine_id)) = (&self.search.api_key, &self.search.engine_id) {
            let search = GoogleSearch::new(client.clone(), copy_secret(key), engine_id.clone())
                .with_base_url(self.search.base_url.clone())
                .with_max_results(self.search.max_results)
                .with_timeout(Duration::from_millis(self.search.timeout_ms));
            dispatcher = dispatcher.with_search(Arc::new(search));
        }

        let token = self.proxy.token.as_ref().or(self.api_key.as_ref());
        let proxy = ProxyHttp::new(client.clone(), token.map(copy_secret))
            .with_base_url(self.proxy.base_url.clone())
            .with_timeout(Duration::from_millis(self.proxy.timeout_ms));
        dispatcher = dispatcher.with_proxy(Arc::new(proxy));

        if let Some(session) = interpreter {
            dispatcher = dispatcher.with_interpreter(session);
        }
        dispatcher
    }

    /// Assemble a ready-to-run agent from this configuration.
    pub fn agent(&self) -> Result<Agent<OpenAiGateway>, ConfigError> {
        let client = reqwest::Client::new();
        let gateway = OpenAiGateway::new(client.clone(), self.gateway_config()?, tool_schemas());
        let dispatcher = self.dispatcher(&client, self.interpreter_session());
        Ok(Agent::new(gateway, dispatcher, self.agent_config()))
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::new(secret.expose_secret().clone())
}
