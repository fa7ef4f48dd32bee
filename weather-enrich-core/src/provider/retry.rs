use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    error::ProviderError,
    matcher::MatchPolicy,
    model::{Observation, QueryWindow, WindowStrategy},
    provider::{ProviderClient, ProviderId},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Seconds; the n-th retry (from 0) waits `backoff_factor * 2^n`.
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.backoff_factor * 2f64.powi(attempt.min(16) as i32);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

/// Retries transient failures of the wrapped client with exponential backoff.
#[derive(Debug)]
pub struct RetryingClient {
    inner: Box<dyn ProviderClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn ProviderClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ProviderClient for RetryingClient {
    fn id(&self) -> ProviderId {
        self.inner.id()
    }

    fn window_strategy(&self) -> WindowStrategy {
        self.inner.window_strategy()
    }

    fn default_policy(&self) -> Option<MatchPolicy> {
        self.inner.default_policy()
    }

    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<Observation>, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.fetch(window).await {
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        provider = %self.inner.id(),
                        attempt = attempt + 1,
                        max = self.policy.max_retries,
                        ?delay,
                        "retrying after {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
