//! Timeout defaults and a helper for bounding async operations.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default bound on opening a connection
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a whole negotiation
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future`, failing with [`ProtocolError::Timeout`] if it takes longer
/// than `duration`.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = duration.as_millis() as u64, "Operation timed out");
            Err(ProtocolError::Timeout)
        }
    }
}
