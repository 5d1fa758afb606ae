//! Concrete backend adapters: a remote HTTP/JSON backend, a local LLM server
//! adapter (llama.cpp/vLLM/LM Studio/Ollama dialects), and a deterministic
//! mock for tests.

use crate::backend::registry::BackendAdapter;
use crate::backend::types::{FinishReason, Response, SendOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Configuration for an HTTP-backed adapter.
#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl HttpAdapterConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            timeout_secs: 120,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Builds a `reqwest::Client`, falling back to disabling proxy auto-detection
/// if the platform's proxy probing panics (observed in sandboxed environments).
fn build_http_client(timeout: Duration) -> reqwest::Client {
    let build = || {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default()
    };

    catch_unwind(AssertUnwindSafe(build)).unwrap_or_else(|_| {
        reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .unwrap_or_default()
    })
}

#[derive(Deserialize)]
struct WireResponse {
    content: String,
    finish_reason: Option<String>,
    model: Option<String>,
}

/// Adapter for a remote, cloud-style JSON completion API reachable over HTTP.
pub struct HttpBackendAdapter {
    client: reqwest::Client,
    config: HttpAdapterConfig,
    key: String,
}

impl HttpBackendAdapter {
    pub fn new(key: impl Into<String>, config: HttpAdapterConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self {
            client: build_http_client(timeout),
            config,
            key: key.into(),
        }
    }
}

#[async_trait]
impl BackendAdapter for HttpBackendAdapter {
    async fn send(&self, prompt: &str, opts: &SendOptions) -> Result<Response> {
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "max_tokens": opts.max_tokens,
            "thinking": opts.thinking,
        });

        let mut request = self
            .client
            .post(format!("{}/v1/complete", self.config.base_url))
            .json(&body)
            .timeout(Duration::from_millis(opts.timeout_ms));

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::transport(&self.key, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::transport(
                &self.key,
                format!("HTTP {}", resp.status()),
            ));
        }

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| Error::transport(&self.key, format!("malformed response: {e}")))?;

        let mut out = Response::new(wire.content);
        if let Some(fr) = wire.finish_reason {
            out = out.with_finish_reason(FinishReason::from_wire(&fr));
        }
        if let Some(model) = wire.model {
            out = out.with_model_id(model);
        }
        Ok(out)
    }

    async fn is_healthy(&self) -> bool {
        self.client
            .get(format!("{}/v1/models", self.config.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Which local server dialect a `LocalServerAdapter` speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalServerDialect {
    LlamaCpp,
    VLlm,
    LmStudio,
    Ollama,
}

/// Adapter for a local LLM server (llama.cpp, vLLM, LM Studio, or Ollama).
pub struct LocalServerAdapter {
    client: reqwest::Client,
    base_url: String,
    dialect: LocalServerDialect,
    key: String,
}

impl LocalServerAdapter {
    pub fn new(key: impl Into<String>, base_url: impl Into<String>, dialect: LocalServerDialect) -> Self {
        Self {
            client: build_http_client(Duration::from_secs(300)),
            base_url: base_url.into(),
            dialect,
            key: key.into(),
        }
    }

    fn completion_path(&self) -> &'static str {
        match self.dialect {
            LocalServerDialect::LlamaCpp => "/completion",
            LocalServerDialect::VLlm | LocalServerDialect::LmStudio => "/v1/completions",
            LocalServerDialect::Ollama => "/api/generate",
        }
    }
}

#[async_trait]
impl BackendAdapter for LocalServerAdapter {
    async fn send(&self, prompt: &str, opts: &SendOptions) -> Result<Response> {
        let body = serde_json::json!({
            "prompt": prompt,
            "n_predict": opts.max_tokens,
            "max_tokens": opts.max_tokens,
        });

        let resp = self
            .client
            .post(format!("{}{}", self.base_url, self.completion_path()))
            .json(&body)
            .timeout(Duration::from_millis(opts.timeout_ms))
            .send()
            .await
            .map_err(|e| Error::transport(&self.key, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::transport(
                &self.key,
                format!("HTTP {}", resp.status()),
            ));
        }

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| Error::transport(&self.key, format!("malformed response: {e}")))?;

        let mut out = Response::new(wire.content);
        if let Some(fr) = wire.finish_reason {
            out = out.with_finish_reason(FinishReason::from_wire(&fr));
        }
        if let Some(model) = wire.model {
            out = out.with_model_id(model);
        }
        Ok(out)
    }

    async fn is_healthy(&self) -> bool {
        let probe_path = match self.dialect {
            LocalServerDialect::LlamaCpp => "/props",
            LocalServerDialect::Ollama => "/api/tags",
            LocalServerDialect::VLlm | LocalServerDialect::LmStudio => "/v1/models",
        };
        self.client
            .get(format!("{}{}", self.base_url, probe_path))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Deterministic in-process adapter for tests. Never performs network I/O.
#[cfg(test)]
pub struct MockAdapter {
    pub fixed_content: String,
    pub finish_reason: FinishReason,
    pub healthy: std::sync::atomic::AtomicBool,
    pub fail_next: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockAdapter {
    pub fn new(content: impl Into<String>, finish_reason: FinishReason) -> Self {
        Self {
            fixed_content: content.into(),
            finish_reason,
            healthy: std::sync::atomic::AtomicBool::new(true),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn fail_once(&self) {
        self.fail_next.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl BackendAdapter for MockAdapter {
    async fn send(&self, _prompt: &str, _opts: &SendOptions) -> Result<Response> {
        if self
            .fail_next
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::transport("mock", "simulated failure"));
        }
        Ok(Response::new(self.fixed_content.clone()).with_finish_reason(self.finish_reason))
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_adapter_returns_fixed_content() {
        let mock = MockAdapter::new("hello world", FinishReason::Stop);
        let resp = mock.send("anything", &SendOptions::new(100, 1000)).await.unwrap();
        assert_eq!(resp.content, "hello world");
        assert!(mock.is_healthy().await);
    }

    #[tokio::test]
    async fn mock_adapter_can_simulate_a_single_failure() {
        let mock = MockAdapter::new("ok", FinishReason::Stop);
        mock.fail_once();
        let err = mock.send("x", &SendOptions::new(10, 100)).await.unwrap_err();
        assert!(matches!(err, Error::TransportFailure { .. }));

        let ok = mock.send("x", &SendOptions::new(10, 100)).await;
        assert!(ok.is_ok());
    }

    #[test]
    fn dialect_selects_distinct_completion_paths() {
        let llama = LocalServerAdapter::new("a", "http://localhost:8080", LocalServerDialect::LlamaCpp);
        assert_eq!(llama.completion_path(), "/completion");
        let ollama = LocalServerAdapter::new("b", "http://localhost:11434", LocalServerDialect::Ollama);
        assert_eq!(ollama.completion_path(), "/api/generate");
    }
}
