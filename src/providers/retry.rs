//! Bounded retry with linear backoff around a [`CompletionClient`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{CompletionClient, CompletionError};

/// Retries transient failures up to `max_retries` extra attempts.
pub struct RetryingClient<C> {
    inner: C,
    max_retries: u32,
    backoff: Duration,
}

impl<C: CompletionClient> RetryingClient<C> {
    /// Wrap `inner`. Attempt `n` (1-based retry) sleeps `backoff * n` first.
    pub fn new(inner: C, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }
}

#[async_trait]
impl<C: CompletionClient> CompletionClient for RetryingClient<C> {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.inner.complete(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt = attempt.saturating_add(1);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "completion failed, retrying"
                    );
                    tokio::time::sleep(self.backoff.saturating_mul(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
