use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::oracles::OracleError;

/// Per-call timeout plus exponential backoff for transient oracle failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_llm_config(llm: &shopassist_core::config::LlmConfig) -> Self {
        Self {
            max_retries: llm.max_retries,
            base_delay_ms: llm.retry_base_delay_ms,
            timeout: Duration::from_secs(llm.timeout_secs),
            ..Self::default()
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Runs `call` until it succeeds, fails permanently, or retries run out.
    /// Each attempt is bounded by `timeout`; an elapsed attempt counts as
    /// [`OracleError::Timeout`].
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout(self.timeout.as_millis() as u64)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    warn!(
                        event_name = "oracle.call.retry",
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "transient oracle failure; retrying"
                    );
                    let delay = self.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
