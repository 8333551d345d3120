//! Shell Sage - an AI assistant for the terminal.
//!
//! Every AI request goes through a [`pipeline::Pipeline`]: a pluggable
//! [`provider::Provider`] backend wrapped by composable middlewares. The
//! standard chain is:
//!
//! - [`pipeline::enhancer`] - prepends OS, architecture and shell context
//! - [`pipeline::cache`] - on-disk response cache keyed by the enhanced prompt
//! - [`pipeline::retry`] - bounded retries with exponential backoff
//!
//! Supporting modules:
//!
//! - [`provider`] - backend trait and name-keyed registry
//! - [`ollama`] - the local Ollama backend
//! - [`commands`] - explain, tip, fix and analyze
//! - [`config`] - `~/.ssage/config.toml`
//! - [`history`] - shell history discovery for `fix`
//! - [`metrics`] - per-command usage statistics
//! - [`ui`] - spinner, response boxes and prompts
//! - [`clipboard`] - copying responses through platform tools
//! - [`http_client`] - HTTP client abstraction
//! - [`clock`] - injectable wall clock
//!
//! # Example
//!
//! ```ignore
//! use ssage::commands::{build_pipeline, Assistant, Options};
//! use ssage::provider::ProviderRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = ProviderRegistry::new();
//!     ssage::ollama::register(&mut registry);
//!
//!     let pipeline = build_pipeline(&registry, None, "llama3")?;
//!     let assistant = Assistant::new(pipeline, Options::new("English", false));
//!     assistant.explain("tar -xzf archive.tgz", &mut std::io::stdout()).await
//! }
//! ```

pub mod clipboard;
pub mod clock;
pub mod commands;
pub mod config;
pub mod history;
pub mod http_client;
pub mod metrics;
pub mod ollama;
pub mod pipeline;
pub mod provider;
pub mod ui;

#[cfg(test)]
mod test_support;
