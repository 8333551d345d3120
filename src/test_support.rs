//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use crate::clock::Clock;
use crate::provider::Provider;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Outcome of a single backend call.
#[derive(Debug, Clone)]
pub struct Attempt {
    tokens: Vec<String>,
    error: Option<String>,
}

impl Attempt {
    /// Emits `tokens` and succeeds.
    pub fn ok(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            error: None,
        }
    }

    /// Emits `tokens`, then fails with `message`.
    pub fn fail(tokens: &[&str], message: &str) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            error: Some(message.to_string()),
        }
    }
}

struct ScriptState {
    script: Mutex<VecDeque<Attempt>>,
    fallback: Attempt,
    prompts: Mutex<Vec<String>>,
}

/// Provider that plays back a script of attempts and records every prompt.
///
/// Clones share the same script and recording, so a test can keep one clone
/// while the pipeline owns another.
#[derive(Clone)]
pub struct ScriptedProvider {
    name: String,
    state: Arc<ScriptState>,
}

impl ScriptedProvider {
    /// Plays `attempts` in order, then repeats `fallback` forever.
    pub fn scripted(attempts: Vec<Attempt>, fallback: Attempt) -> Self {
        Self {
            name: "scripted".to_string(),
            state: Arc::new(ScriptState {
                script: Mutex::new(attempts.into()),
                fallback,
                prompts: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Repeats `attempt` on every call.
    pub fn always(attempt: Attempt) -> Self {
        Self::scripted(Vec::new(), attempt)
    }

    /// Always succeeds with `"response"`, reporting `name`.
    pub fn named(name: &str) -> Self {
        let mut provider = Self::always(Attempt::ok(&["response"]));
        provider.name = name.to_string();
        provider
    }

    /// Number of backend invocations so far (one-shot and streaming).
    pub fn calls(&self) -> usize {
        self.state.prompts.lock().unwrap().len()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.lock().unwrap().clone()
    }

    fn next_attempt(&self, prompt: &str) -> Attempt {
        self.state.prompts.lock().unwrap().push(prompt.to_string());
        self.state
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.state.fallback.clone())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let attempt = self.next_attempt(prompt);
        match attempt.error {
            Some(message) => Err(anyhow!(message)),
            None => Ok(attempt.tokens.concat()),
        }
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String> {
        let attempt = self.next_attempt(prompt);
        let mut full = String::new();
        for token in &attempt.tokens {
            on_token(token);
            full.push_str(token);
        }
        match attempt.error {
            Some(message) => Err(anyhow!(message)),
            None => Ok(full),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc::now()),
        })
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
