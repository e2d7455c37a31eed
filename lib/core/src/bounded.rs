use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `fut` with a deadline, mapping expiry to [`Error::Timeout`].
pub async fn bounded<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "deadline exceeded");
            Err(Error::Timeout {
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let value = bounded("fast", Duration::from_millis(200), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_expired_deadline_is_timeout() {
        let err = bounded("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { timeout_ms: 10, .. }));
        assert_eq!(err.identifier(), Some("slow"));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let err = bounded::<(), _>("failing", Duration::from_secs(1), async {
            Err(Error::unavailable("embedder", "connection refused"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
    }
}
