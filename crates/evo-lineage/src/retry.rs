use crate::error::GraphError;
use evo_core::PersistenceError;
use std::future::Future;
use std::time::Duration;

/// Run a store operation, retrying a transport failure once after `backoff`.
///
/// Invariant violations (cycles, missing endpoints) are not retried.
///
/// # Errors
///
/// [`PersistenceError`] carrying the last failure and the attempt count.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    backoff: Duration,
    mut call: F,
) -> Result<T, PersistenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GraphError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempts < 2 => {
                tracing::warn!(operation, error = %err, "graph store write failed, retrying once");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                tracing::error!(operation, attempts, error = %err, "graph store write failed");
                return Err(PersistenceError {
                    operation: operation.to_string(),
                    attempts,
                    reason: err.to_string(),
                });
            }
        }
    }
}
