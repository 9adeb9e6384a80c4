use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::error::ServerError;

/// Serializes every operation that mutates the asset catalog together with
/// the asset directory (upload, delete, reconcile).
///
/// Waiting is bounded: a caller that cannot take the lock within `timeout`
/// gets [`ServerError::Busy`] instead of queueing forever.
#[derive(Clone)]
pub struct WriterLock {
    inner: Arc<Mutex<()>>,
    timeout: Duration,
}

pub type WriterGuard = OwnedMutexGuard<()>;

impl WriterLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub async fn acquire(&self, operation: &'static str) -> Result<WriterGuard, ServerError> {
        match tokio::time::timeout(self.timeout, self.inner.clone().lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(
                    operation,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Timed out waiting for catalog writer lock"
                );
                Err(ServerError::Busy)
            }
        }
    }
}
