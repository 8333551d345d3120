//! Prepends the user's operating environment to every prompt.
//!
//! The injected line looks like:
//!
//! ```text
//! [System context: OS=linux, Arch=x86_64, Shell=/bin/zsh]
//! ```

use super::{Handler, Middleware, Request, StreamHandler};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

const UNKNOWN_SHELL: &str = "unknown";

/// Stateless middleware adding OS, architecture and shell to the prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextEnhancer;

impl ContextEnhancer {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for ContextEnhancer {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Enhanced { next })
    }

    fn wrap_stream(&self, next: Arc<dyn StreamHandler>) -> Arc<dyn StreamHandler> {
        Arc::new(Enhanced { next })
    }
}

struct Enhanced<H: ?Sized> {
    next: Arc<H>,
}

#[async_trait]
impl Handler for Enhanced<dyn Handler> {
    async fn handle(&self, mut request: Request) -> Result<String> {
        request.prompt = inject(&request.prompt);
        self.next.handle(request).await
    }
}

#[async_trait]
impl StreamHandler for Enhanced<dyn StreamHandler> {
    async fn handle_stream(
        &self,
        mut request: Request,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String> {
        request.prompt = inject(&request.prompt);
        self.next.handle_stream(request, on_token).await
    }
}

fn inject(prompt: &str) -> String {
    format!("{}{}", context_line(std::env::var("SHELL").ok().as_deref()), prompt)
}

/// Builds the context prefix, including its trailing newline.
pub fn context_line(shell: Option<&str>) -> String {
    let shell = shell.filter(|s| !s.is_empty()).unwrap_or(UNKNOWN_SHELL);
    format!(
        "[System context: OS={}, Arch={}, Shell={}]\n",
        std::env::consts::OS,
        std::env::consts::ARCH,
        shell
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::test_support::{Attempt, ScriptedProvider};

    #[test]
    fn test_context_line_format() {
        let line = context_line(Some("/bin/zsh"));
        assert_eq!(
            line,
            format!(
                "[System context: OS={}, Arch={}, Shell=/bin/zsh]\n",
                std::env::consts::OS,
                std::env::consts::ARCH
            )
        );
    }

    #[test]
    fn test_missing_or_empty_shell_is_unknown() {
        assert!(context_line(None).contains("Shell=unknown]"));
        assert!(context_line(Some("")).contains("Shell=unknown]"));
    }

    #[tokio::test]
    async fn test_provider_sees_prefixed_prompt() {
        let provider = ScriptedProvider::always(Attempt::ok(&["ok"]));
        let pipeline = Pipeline::new(Box::new(provider.clone()), vec![Box::new(ContextEnhancer::new())]);

        pipeline.run("explain ls", "explain").await.unwrap();
        pipeline.run_stream("explain ls", "explain", |_| {}).await.unwrap();

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        for prompt in prompts {
            assert!(prompt.starts_with("[System context: OS="));
            assert!(prompt.ends_with("]\nexplain ls"));
        }
    }
}
