//! Per-call deadlines raced against the execution's cancellation token.

use std::future::Future;
use std::time::Duration;

use sourcebound_shared::{Result, SourceboundError};
use tokio_util::sync::CancellationToken;

/// Await `fut` for at most `limit`, aborting early if `cancel` fires.
///
/// Cancellation wins ties. An elapsed deadline becomes
/// [`SourceboundError::Timeout`] tagged with `operation`.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SourceboundError::Cancelled),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(SourceboundError::timeout(operation, limit)),
        },
    }
}
