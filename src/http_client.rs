//! HTTP client abstraction for talking to backend servers.
//!
//! Backends go through the [`HttpClient`] trait instead of using reqwest
//! directly, so their request building and response decoding can be tested
//! against a mock without a running server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Status and body of a finished request.
///
/// For streamed requests that succeeded, `body` is empty: the content was
/// handed to the line callback instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for HTTP communication with backend APIs.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the whole response.
    ///
    /// Non-success statuses are not errors; callers inspect
    /// [`HttpResponse::status`]. Errors mean the request could not be sent or
    /// the body could not be read.
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse>;

    /// Sends a POST request and feeds the response body to `on_line` one line
    /// at a time as it arrives, without the trailing newline.
    ///
    /// Reading stops early when `on_line` returns `false`. On a non-success
    /// status no line is emitted and the body is returned in full.
    async fn post_json_lines(
        &self,
        url: &str,
        body: &serde_json::Value,
        on_line: &mut (dyn for<'t> FnMut(&'t str) -> bool + Send),
    ) -> Result<HttpResponse>;
}

/// HTTP client implementation using reqwest.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Creates a client whose requests give up after `timeout`, covering the
    /// whole exchange including a streamed body.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to send request to {}", url))?;

        let status = response.status().as_u16();
        let body = response.text().await.context("failed to read response body")?;
        Ok(HttpResponse { status, body })
    }

    async fn post_json_lines(
        &self,
        url: &str,
        body: &serde_json::Value,
        on_line: &mut (dyn for<'t> FnMut(&'t str) -> bool + Send),
    ) -> Result<HttpResponse> {
        let mut response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to send request to {}", url))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(HttpResponse { status, body });
        }

        // Bytes are buffered until a full line is available so multi-byte
        // characters split across chunks decode correctly.
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.context("error reading stream")? {
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if !on_line(String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n'])) {
                    return Ok(HttpResponse { status, body: String::new() });
                }
            }
        }
        if !buffer.is_empty() {
            on_line(String::from_utf8_lossy(&buffer).trim_end_matches('\r'));
        }

        Ok(HttpResponse { status, body: String::new() })
    }
}
