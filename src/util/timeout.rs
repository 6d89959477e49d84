//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SwitchboardError};

/// Wrap a future with a timeout.
///
/// The inner future is dropped when the deadline passes.
pub async fn with_timeout<T>(duration: Duration, future: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(SwitchboardError::Timeout(duration.as_millis() as u64)),
    }
}
