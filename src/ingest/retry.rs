use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::fmt::Display;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::PipelineError;

/// Bounded exponential backoff for transient feed failures (connection
/// errors, timeouts, 5xx, 408 and 429)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// First try included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        let initial_backoff = Duration::from_millis(settings.initial_backoff_ms);
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff,
            max_backoff: Duration::from_millis(settings.max_backoff_ms).max(initial_backoff),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Wrap `client` so transient failures are retried with this policy
    pub fn client(&self, client: Client) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(self.initial_backoff, self.max_backoff)
            .build_with_max_retries(self.max_retries());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    /// Error reported once the middleware has stopped retrying
    pub fn exhausted(&self, operation: &str, error: impl Display) -> PipelineError {
        PipelineError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error: format!("{}: {}", operation, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_policy_from_settings() {
        let policy = RetryPolicy::from_settings(&RetrySettings::default());
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_millis(8_000));
    }

    #[test]
    fn test_policy_clamps_bad_settings() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_attempts: 0,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 100,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_retries(), 0);
        assert_eq!(policy.max_backoff, Duration::from_millis(2_000));
    }

    #[test]
    fn test_exhaustion_is_distinct_error() {
        let policy = RetryPolicy::from_settings(&RetrySettings::default());
        let err = policy.exhausted("GET http://feed/2023", "connection refused");
        assert_eq!(err.kind(), ErrorKind::RetriesExhaustedError);
        assert!(err.to_string().contains("4 attempts"));
        assert!(err.to_string().contains("connection refused"));
    }
}
