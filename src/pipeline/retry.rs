//! Retries failed backend calls with exponential backoff.
//!
//! One-shot calls are retried transparently. Streaming calls are retried only
//! while nothing has reached the caller: once a token has been rendered a
//! second attempt would duplicate output, so the error is returned as-is. The
//! partial text is whatever the caller already received through `on_token`.

use super::{Handler, Middleware, Request, StreamHandler};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const BASE_DELAY: Duration = Duration::from_millis(500);

/// Retry middleware. `max_attempts` counts the first attempt too.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    max_attempts: u32,
}

impl Retry {
    /// `Retry::new(3)` means one attempt plus up to two retries. Zero is
    /// clamped to one attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Delay before the retry following `gap` earlier retries: 500 ms, 1 s, 2 s, ...
pub fn backoff(gap: u32) -> Duration {
    BASE_DELAY.saturating_mul(2u32.saturating_pow(gap))
}

impl Middleware for Retry {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Retrying {
            max_attempts: self.max_attempts,
            next,
        })
    }

    fn wrap_stream(&self, next: Arc<dyn StreamHandler>) -> Arc<dyn StreamHandler> {
        Arc::new(Retrying {
            max_attempts: self.max_attempts,
            next,
        })
    }
}

struct Retrying<H: ?Sized> {
    max_attempts: u32,
    next: Arc<H>,
}

#[async_trait]
impl Handler for Retrying<dyn Handler> {
    async fn handle(&self, request: Request) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.next.handle(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "Backend call failed, retrying");
                }
            }
            tokio::time::sleep(backoff(attempt - 1)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl StreamHandler for Retrying<dyn StreamHandler> {
    async fn handle_stream(
        &self,
        request: Request,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String> {
        let mut attempt = 1;
        loop {
            let mut delivered = false;
            let result = {
                let mut guarded = |token: &str| {
                    delivered = true;
                    on_token(token);
                };
                self.next.handle_stream(request.clone(), &mut guarded).await
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if delivered => {
                    warn!(attempt, error = %e, "Stream failed after output started, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "Stream failed before first token, retrying");
                }
            }
            tokio::time::sleep(backoff(attempt - 1)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::provider::Provider;
    use crate::test_support::{Attempt, ScriptedProvider};
    use anyhow::anyhow;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn retrying(provider: &ScriptedProvider, attempts: u32) -> Pipeline {
        Pipeline::new(Box::new(provider.clone()), vec![Box::new(Retry::new(attempts))])
    }

    /// Fails every call and remembers when each one happened.
    struct TimedFailure {
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Provider for TimedFailure {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.lock().unwrap().push(Instant::now());
            Err(anyhow!("unavailable"))
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            _on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
        ) -> Result<String> {
            self.generate(prompt).await
        }

        fn name(&self) -> &str {
            "timed"
        }
    }

    #[test]
    fn test_backoff_doubles_from_500ms() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        assert_eq!(backoff(200), BASE_DELAY.saturating_mul(u32::MAX));
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        assert_eq!(Retry::new(0).max_attempts, 1);
        assert_eq!(Retry::new(4).max_attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_backend_is_called_max_attempts_times() {
        let provider = ScriptedProvider::scripted(
            vec![Attempt::fail(&[], "first"), Attempt::fail(&[], "second")],
            Attempt::fail(&[], "last"),
        );
        let pipeline = retrying(&provider, 3);

        let err = pipeline.run("p", "explain").await.unwrap_err();

        assert_eq!(err.to_string(), "last");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let provider = ScriptedProvider::scripted(
            vec![Attempt::fail(&[], "one"), Attempt::fail(&[], "two")],
            Attempt::ok(&["finally"]),
        );
        let pipeline = retrying(&provider, 3);

        assert_eq!(pipeline.run("p", "explain").await.unwrap(), "finally");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_does_not_retry() {
        let provider = ScriptedProvider::always(Attempt::fail(&[], "down"));
        let pipeline = retrying(&provider, 0);

        assert!(pipeline.run("p", "explain").await.is_err());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_attempt_delays_double() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let provider = TimedFailure { calls: calls.clone() };
        let pipeline = Pipeline::new(Box::new(provider), vec![Box::new(Retry::new(4))]);

        assert!(pipeline.run("p", "explain").await.is_err());

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(500));
        assert!(gaps[1] >= Duration::from_millis(1000));
        assert!(gaps[2] >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_failure_after_first_token_is_not_retried() {
        let provider = ScriptedProvider::scripted(
            vec![Attempt::fail(&["partial"], "connection reset")],
            Attempt::ok(&["should never be seen"]),
        );
        let pipeline = retrying(&provider, 5);
        let mut seen = Vec::new();

        let err = pipeline
            .run_stream("p", "explain", |t| seen.push(t.to_string()))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(provider.calls(), 1);
        assert_eq!(seen, vec!["partial"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_retries_while_nothing_was_emitted() {
        let provider = ScriptedProvider::scripted(
            vec![Attempt::fail(&[], "refused"), Attempt::fail(&[], "refused")],
            Attempt::ok(&["third ", "time"]),
        );
        let pipeline = retrying(&provider, 3);
        let mut seen = Vec::new();

        let response = pipeline
            .run_stream("p", "explain", |t| seen.push(t.to_string()))
            .await
            .unwrap();

        assert_eq!(response, "third time");
        assert_eq!(provider.calls(), 3);
        assert_eq!(seen, vec!["third ", "time"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_exhaustion_returns_last_error() {
        let provider = ScriptedProvider::scripted(
            vec![Attempt::fail(&[], "first")],
            Attempt::fail(&[], "final"),
        );
        let pipeline = retrying(&provider, 2);

        let err = pipeline.run_stream("p", "explain", |_| {}).await.unwrap_err();

        assert_eq!(err.to_string(), "final");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_flag_resets_per_attempt_and_later_tokens_stop_retries() {
        let provider = ScriptedProvider::scripted(
            vec![Attempt::fail(&[], "empty failure"), Attempt::fail(&["tok"], "mid-stream")],
            Attempt::ok(&["unreachable"]),
        );
        let pipeline = retrying(&provider, 5);

        let err = pipeline.run_stream("p", "explain", |_| {}).await.unwrap_err();

        assert_eq!(err.to_string(), "mid-stream");
        assert_eq!(provider.calls(), 2);
    }
}
