//! Retry/backoff policy shared by every calendar provider adapter. Adapted
//! from `sources::base::oauth_client::{RetryConfig, OAuthHttpClient::execute_with_retry}`
//! and the sync-token detection in `sources::google::error_handler::GoogleErrorHandler`.

use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

impl RetryConfig {
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff.as_millis() as u64)
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff.as_millis() as u64);
        Duration::from_millis(backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    AuthError,
    RateLimit,
    DeltaTokenExpired,
    ServerError,
    ClientError,
}

/// Classify an HTTP error response from the Calendar API. A 410, or a 400
/// whose body mentions the sync token, is always `DeltaTokenExpired` —
/// checked before status-code-only classification so it is never retried as
/// a generic server error.
pub fn classify_error(status: StatusCode, body: &str) -> ErrorClass {
    let body_lower = body.to_lowercase();
    if status == StatusCode::GONE
        || (status == StatusCode::BAD_REQUEST && body_lower.contains("sync token"))
    {
        return ErrorClass::DeltaTokenExpired;
    }
    match status {
        StatusCode::UNAUTHORIZED => ErrorClass::AuthError,
        StatusCode::TOO_MANY_REQUESTS => ErrorClass::RateLimit,
        s if s.is_server_error() => ErrorClass::ServerError,
        _ => ErrorClass::ClientError,
    }
}

pub fn should_retry(class: ErrorClass, attempt: u32, max_retries: u32) -> bool {
    if attempt + 1 >= max_retries {
        return false;
    }
    matches!(class, ErrorClass::AuthError | ErrorClass::RateLimit | ErrorClass::ServerError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.calculate_backoff(0), Duration::from_secs(1));
        assert_eq!(config.calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(config.calculate_backoff(2), Duration::from_secs(4));
        assert_eq!(config.calculate_backoff(5), Duration::from_secs(30));
        assert_eq!(config.calculate_backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn gone_status_is_delta_token_expired() {
        assert_eq!(classify_error(StatusCode::GONE, ""), ErrorClass::DeltaTokenExpired);
    }

    #[test]
    fn bad_request_with_sync_token_text_is_delta_token_expired() {
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, "Sync token is no longer valid"),
            ErrorClass::DeltaTokenExpired
        );
    }

    #[test]
    fn plain_bad_request_is_client_error() {
        assert_eq!(classify_error(StatusCode::BAD_REQUEST, "missing field"), ErrorClass::ClientError);
    }

    #[test]
    fn rate_limit_is_retried_until_last_attempt() {
        assert!(should_retry(ErrorClass::RateLimit, 0, 3));
        assert!(should_retry(ErrorClass::RateLimit, 1, 3));
        assert!(!should_retry(ErrorClass::RateLimit, 2, 3));
    }

    #[test]
    fn delta_token_expired_is_never_retried() {
        assert!(!should_retry(ErrorClass::DeltaTokenExpired, 0, 3));
    }
}
