//! Bounded waits for store calls.

use std::future::Future;
use std::time::Duration;

use ppghub_core::{AuthError, AuthResult};

/// Await `fut` for at most `limit`; an elapsed deadline surfaces as
/// `Unavailable` instead of a hang.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "store call timed out");
            Err(AuthError::unavailable(format!(
                "{operation} timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}
