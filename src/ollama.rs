//! Backend for a local [Ollama](https://ollama.com) server.

use crate::config::Config;
use crate::http_client::{HttpClient, HttpResponse, ReqwestHttpClient};
use crate::provider::{Provider, ProviderRegistry};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const PROVIDER_NAME: &str = "ollama";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";
pub const MODEL_ENV_VAR: &str = "SSAGE_MODEL";

/// Streaming responses can take a while to finish.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One object of `/api/generate` output. Streaming sends one per line.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Adds the Ollama backend to `registry`.
pub fn register(registry: &mut ProviderRegistry) {
    registry.register(PROVIDER_NAME, |model| {
        Ok(Box::new(OllamaClient::new(model)?) as Box<dyn Provider>)
    });
}

/// Picks the model: explicit override → `SSAGE_MODEL` → config → `llama3`.
pub fn resolve_model<E, C>(model_override: &str, env: E, config: C) -> String
where
    E: FnOnce() -> Option<String>,
    C: FnOnce() -> Option<String>,
{
    if !model_override.is_empty() {
        return model_override.to_string();
    }
    env()
        .filter(|m| !m.is_empty())
        .or_else(|| config().filter(|m| !m.is_empty()))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

pub struct OllamaClient {
    base_url: String,
    model: String,
    http: Box<dyn HttpClient>,
}

impl OllamaClient {
    /// Creates a client for the default local server.
    ///
    /// An empty `model_override` falls back to the environment, then the
    /// config file, then [`DEFAULT_MODEL`].
    pub fn new(model_override: &str) -> Result<Self> {
        let model = resolve_model(
            model_override,
            || std::env::var(MODEL_ENV_VAR).ok(),
            || Config::load().ok().and_then(|config| config.model),
        );
        let http = ReqwestHttpClient::with_timeout(REQUEST_TIMEOUT)?;
        Ok(Self::with_http_client(DEFAULT_BASE_URL, &model, Box::new(http)))
    }

    /// Creates a client with an explicit server URL and HTTP implementation.
    pub fn with_http_client(base_url: &str, model: &str, http: Box<dyn HttpClient>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http,
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn request_body(&self, prompt: &str, stream: bool) -> Result<serde_json::Value> {
        serde_json::to_value(GenerateRequest {
            model: &self.model,
            prompt,
            stream,
        })
        .context("failed to marshal request")
    }

    /// Turns a non-success status into a message the user can act on.
    fn check_status(&self, response: &HttpResponse) -> Result<()> {
        if response.is_success() {
            return Ok(());
        }
        if response.status == 404 {
            return Err(anyhow!(
                "model '{}' not found. Please run 'ollama pull {}' to download it",
                self.model,
                self.model
            ));
        }
        Err(anyhow!(
            "ollama API returned status {}: {}",
            response.status,
            response.body.trim()
        ))
    }
}

#[async_trait]
impl Provider for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        info!(model = %self.model, "Sending prompt to Ollama");
        let body = self.request_body(prompt, false)?;
        let response = self
            .http
            .post_json(&self.generate_url(), &body)
            .await
            .context("failed to send request to Ollama")?;
        self.check_status(&response)?;

        let chunk: GenerateChunk =
            serde_json::from_str(&response.body).context("failed to decode response")?;
        Ok(chunk.response)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String> {
        info!(model = %self.model, "Streaming prompt to Ollama");
        let body = self.request_body(prompt, true)?;
        let mut full = String::new();
        let mut on_line = |line: &str| {
            if line.trim().is_empty() {
                return true;
            }
            let chunk: GenerateChunk = match serde_json::from_str(line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!("Skipping malformed stream line: {}", e);
                    return true;
                }
            };
            if !chunk.response.is_empty() {
                on_token(&chunk.response);
                full.push_str(&chunk.response);
            }
            !chunk.done
        };

        let response = self
            .http
            .post_json_lines(&self.generate_url(), &body, &mut on_line)
            .await
            .context("failed to send request to Ollama")?;
        self.check_status(&response)?;

        debug!(chars = full.len(), "Ollama stream finished");
        Ok(full)
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}
