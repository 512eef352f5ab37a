//! HTTP collaborators behind the `search` and `proxy_call` tools

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::tools::ToolError;

pub const DEFAULT_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
pub const DEFAULT_PROXY_URL: &str = "https://aipipe.org";

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Returns `{query, results: [{title, link, snippet}]}`
    async fn search(&self, query: &str) -> Result<Value, ToolError>;
}

#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn call(&self, endpoint: &str, data: &Value) -> Result<Value, ToolError>;
}

/// Stand-in for a collaborator with no credentials configured
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured(pub &'static str);

#[async_trait]
impl WebSearch for Unconfigured {
    async fn search(&self, _query: &str) -> Result<Value, ToolError> {
        Err(ToolError::NotConfigured(self.0))
    }
}

#[async_trait]
impl ProxyClient for Unconfigured {
    async fn call(&self, _endpoint: &str, _data: &Value) -> Result<Value, ToolError> {
        Err(ToolError::NotConfigured(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

/// Google Custom Search JSON API
pub struct GoogleSearch {
    client: reqwest::Client,
    api_key: SecretString,
    engine_id: String,
    base_url: String,
    max_results: usize,
    timeout: Duration,
}

impl GoogleSearch {
    pub fn new(client: reqwest::Client, api_key: SecretString, engine_id: String) -> Self {
        Self {
            client,
            api_key,
            engine_id,
            base_url: DEFAULT_SEARCH_URL.to_string(),
            max_results: 5,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl WebSearch for GoogleSearch {
    async fn search(&self, query: &str) -> Result<Value, ToolError> {
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("empty search query".into()));
        }

        let url = format!(
            "{}?key={}&cx={}&q={}",
            self.base_url,
            urlencoding::encode(self.api_key.expose_secret()),
            urlencoding::encode(&self.engine_id),
            urlencoding::encode(query)
        );

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::Transport(format!("search API returned {status}")));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::Transport(format!("unreadable search response: {e}")))?;

        debug!(query, hits = body.items.len(), "search completed");
        Ok(search_value(query, body.items, self.max_results))
    }
}

fn search_value(query: &str, mut hits: Vec<SearchHit>, max_results: usize) -> Value {
    hits.truncate(max_results);
    json!({ "query": query, "results": hits })
}

/// POSTs JSON to an AIPipe-style proxy
pub struct ProxyHttp {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    timeout: Duration,
}

impl ProxyHttp {
    pub fn new(client: reqwest::Client, token: Option<SecretString>) -> Self {
        Self {
            client,
            base_url: DEFAULT_PROXY_URL.to_string(),
            token,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, endpoint: &str) -> Result<String, ToolError> {
        if endpoint.contains("://") {
            return Err(ToolError::InvalidArguments(
                "endpoint must be a path on the proxy, not a URL".into(),
            ));
        }
        let base = self.base_url.trim_end_matches('/');
        if endpoint.starts_with('/') {
            Ok(format!("{base}{endpoint}"))
        } else {
            Ok(format!("{base}/{endpoint}"))
        }
    }
}

#[async_trait]
impl ProxyClient for ProxyHttp {
    async fn call(&self, endpoint: &str, data: &Value) -> Result<Value, ToolError> {
        let url = self.url(endpoint)?;

        let mut req = self.client.post(&url).timeout(self.timeout).json(data);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::Transport(format!("proxy returned {status}")));
        }

        debug!(endpoint, %status, "proxy call completed");
        resp.json()
            .await
            .map_err(|e| ToolError::Transport(format!("unreadable proxy response: {e}")))
    }
}

fn request_error(err: reqwest::Error, timeout: Duration) -> ToolError {
    if err.is_timeout() {
        ToolError::Timeout(timeout.as_millis() as u64)
    } else {
        ToolError::Transport(err.to_string())
    }
}
