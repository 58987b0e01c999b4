//! Retry policy for the downstream `tools/call` dispatch path (§4.5).
//! Distinct from, and the only retry visible on the wire compared to,
//! the per-service reconnect backoff in [`crate::service::backoff`] — a
//! service-layer connection never retries a single call.

use std::time::Duration;

use crate::error::GatewayError;

/// `{maxAttempts, initialDelay, maxDelay, multiplier, retryableErrorCodes}` (§4.5).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub retryable_error_codes: Vec<i64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            retryable_error_codes: vec![-32000],
        }
    }
}

impl RetryPolicy {
    fn is_retryable(&self, error: &GatewayError) -> bool {
        self.retryable_error_codes.contains(&error.json_rpc_code()) || error.is_retryable_by_default()
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(ms.min(self.max_delay_ms as f64).round() as u64)
    }
}

/// Execute `operation` under `policy`. `max_attempts == 0` means the
/// operation is never even attempted (used to test boundary handling);
/// `max_attempts == 1` means try once with no retry.
pub async fn execute_with_retry<F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<serde_json::Value, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<serde_json::Value, GatewayError>>,
{
    if policy.max_attempts == 0 {
        return Err(GatewayError::Internal("retry policy configured with max_attempts=0".to_string()));
    }

    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < policy.max_attempts && policy.is_retryable(&error) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn max_attempts_zero_never_invokes_operation() {
        let policy = RetryPolicy {
            max_attempts: 0,
            initial_delay_ms: 0,
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(serde_json::json!(1)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 0,
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&policy, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(GatewayError::Upstream("transient".to_string()))
                } else {
                    Ok(serde_json::json!("ok"))
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), serde_json::json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::ToolNotFound("missing".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
