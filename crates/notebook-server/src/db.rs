use std::sync::{Arc, Mutex};

use notebook_store::retry::with_default_retry;
use notebook_store::{Database, StoreError};

use crate::error::ServerError;

/// Shared handle to the SQLite database.
///
/// rusqlite is blocking, so every call runs on tokio's blocking pool. The
/// mutex is only ever held inside that closure, never across an `.await`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<Mutex<Database>>,
}

impl DbHandle {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `op` against the database, retrying busy/locked failures.
    pub async fn call<T, F>(&self, mut op: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnMut(&mut Database) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|e| ServerError::Internal(format!("Lock poisoned: {e}")))?;
            with_default_retry(|| op(&mut *guard)).map_err(ServerError::from)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Database task failed: {e}")))?
    }
}
