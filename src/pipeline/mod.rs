//! Composable middleware chain around a [`Provider`].
//!
//! A [`Pipeline`] wraps the terminal provider call with an ordered list of
//! middlewares. The first middleware is the outermost layer: it sees the
//! request first and the response (or error) last.
//!
//! # Example
//!
//! ```ignore
//! use ssage::pipeline::{Pipeline, cache::DiskCache, enhancer::ContextEnhancer, retry::Retry};
//! use std::time::Duration;
//!
//! let pipeline = Pipeline::new(
//!     provider,
//!     vec![
//!         Box::new(ContextEnhancer::new()),
//!         Box::new(DiskCache::new(Duration::from_secs(24 * 60 * 60), &["tip"])),
//!         Box::new(Retry::new(3)),
//!     ],
//! );
//! let response = pipeline.run_stream(prompt, "explain", |token| print!("{}", token)).await?;
//! ```

pub mod cache;
pub mod enhancer;
pub mod retry;

use crate::provider::Provider;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A prompt travelling through the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Full text sent to the backend. Middlewares may rewrite it.
    pub prompt: String,
    /// Name of the command that issued the request (`explain`, `tip`, ...).
    /// Only used for policy decisions such as cache bypass.
    pub command: String,
}

impl Request {
    pub fn new(prompt: &str, command: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            command: command.to_string(),
        }
    }
}

/// One-shot link in the chain.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produces the response text for `request`.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or the last one once retries run out.
    async fn handle(&self, request: Request) -> Result<String>;
}

/// Streaming link in the chain.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Streams the response for `request`.
    ///
    /// # Arguments
    ///
    /// * `request` - The prompt as seen by this link
    /// * `on_token` - Called once per chunk; a cache hit arrives as one chunk
    ///
    /// # Returns
    ///
    /// The complete response text, equal to the concatenated chunks.
    async fn handle_stream(
        &self,
        request: Request,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String>;
}

/// Cross-cutting behavior wrapped around both handler kinds.
///
/// A single instance serves every request the pipeline handles, so
/// implementations must not keep per-request mutable state.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;

    fn wrap_stream(&self, next: Arc<dyn StreamHandler>) -> Arc<dyn StreamHandler>;
}

/// Terminal handler delegating to the provider.
struct ProviderCall {
    provider: Arc<dyn Provider>,
}

#[async_trait]
impl Handler for ProviderCall {
    async fn handle(&self, request: Request) -> Result<String> {
        self.provider.generate(&request.prompt).await
    }
}

#[async_trait]
impl StreamHandler for ProviderCall {
    async fn handle_stream(
        &self,
        request: Request,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String> {
        self.provider.generate_stream(&request.prompt, on_token).await
    }
}

/// A provider wrapped in its middleware chain.
pub struct Pipeline {
    provider_name: String,
    handler: Arc<dyn Handler>,
    stream_handler: Arc<dyn StreamHandler>,
}

impl Pipeline {
    /// Builds the chain. With no middlewares the pipeline is a direct
    /// pass-through to `provider`.
    pub fn new(provider: Box<dyn Provider>, middlewares: Vec<Box<dyn Middleware>>) -> Self {
        let provider: Arc<dyn Provider> = Arc::from(provider);
        let provider_name = provider.name().to_string();
        let terminal = Arc::new(ProviderCall { provider });

        let mut handler: Arc<dyn Handler> = terminal.clone();
        let mut stream_handler: Arc<dyn StreamHandler> = terminal;

        // Innermost first, so middlewares[0] ends up outermost.
        for middleware in middlewares.iter().rev() {
            handler = middleware.wrap(handler);
            stream_handler = middleware.wrap_stream(stream_handler);
        }

        Self {
            provider_name,
            handler,
            stream_handler,
        }
    }

    /// Name of the backend at the end of the chain.
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Runs a one-shot request through the chain.
    pub async fn run(&self, prompt: &str, command: &str) -> Result<String> {
        self.handler.handle(Request::new(prompt, command)).await
    }

    /// Runs a streaming request through the chain.
    ///
    /// Returns the full accumulated response, however many chunks reached
    /// `on_token`.
    pub async fn run_stream<F>(&self, prompt: &str, command: &str, mut on_token: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        self.stream_handler
            .handle_stream(Request::new(prompt, command), &mut on_token)
            .await
    }
}
