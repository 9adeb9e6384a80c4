//! Retry helper for database operations that hit a busy or locked database.

use std::time::Duration;

use crate::error::Result;

/// Attempts made by [`with_default_retry`].
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// First backoff delay used by [`with_default_retry`]; doubled per attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Run `op`, retrying transient (busy/locked) failures with exponential
/// backoff. Non-transient errors are returned immediately.
///
/// Blocks the calling thread while backing off, so async callers should run
/// it on a blocking thread.
pub fn with_retry<T>(
    attempts: u32,
    base_delay: Duration,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = base_delay * 2u32.pow(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "database busy, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::error!(
                        attempts = attempt + 1,
                        error = %e,
                        "database operation failed"
                    );
                }
                return Err(e);
            }
        }
    }
}

pub fn with_default_retry<T>(op: impl FnMut() -> Result<T>) -> Result<T> {
    with_retry(DEFAULT_ATTEMPTS, DEFAULT_BASE_DELAY, op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn busy() -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn retries_transient_until_success() {
        let mut calls = 0;
        let result = with_retry(3, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(busy())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_attempt_cap() {
        let mut calls = 0;
        let result: Result<()> = with_retry(3, Duration::from_millis(1), || {
            calls += 1;
            Err(busy())
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = with_retry(3, Duration::from_millis(1), || {
            calls += 1;
            Err(StoreError::NotFound)
        });
        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(calls, 1);
    }
}
