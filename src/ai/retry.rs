use super::{ChatResult, GenerationRequest, StreamHandle, TextGenerator};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Backoff for quota / rate-limit failures. Anything else is returned at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            initial_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (0-based), or `None` to give up.
    pub fn backoff(&self, err: &super::ChatError, attempt: u32) -> Option<Duration> {
        if !err.is_quota() || attempt + 1 >= self.attempts {
            return None;
        }
        Some(self.initial_delay * 2u32.saturating_pow(attempt))
    }
}

/// Wraps a generator with [`RetryPolicy`]. Each attempt streams into a fresh
/// clone of the caller's handle, so a retry restarts the visible text. Every
/// retry is announced with [`StreamEvent::Restarted`](super::StreamEvent::Restarted).
pub struct Retrying<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> Retrying<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for Retrying<G> {
    async fn generate(&self, request: &GenerationRequest, handle: StreamHandle) -> ChatResult<String> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                handle.restart();
            }
            match self.inner.generate(request, handle.clone()).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    let Some(delay) = self.policy.backoff(&err, attempt) else {
                        return Err(err);
                    };
                    warn!(attempt, ?delay, error = %err, "generation rate limited, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
