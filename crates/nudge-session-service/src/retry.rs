// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded-retry transactions.
//!
//! A transaction body reads what it needs, buffers its writes and returns a
//! value. The body is re-run from scratch on every attempt, so it must be a
//! pure function of what it reads. Nothing from a failed attempt escapes.

use std::time::Duration;

use nudge_app_core::storage::{Storage, Transaction};
use tracing::warn;

use crate::error::SessionError;

/// How persistence writes are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles each time.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `body` inside a transaction, committing its writes atomically.
///
/// Transient storage failures (from reads or the commit) are retried with
/// exponential backoff; once `policy.max_attempts` is spent the last one is
/// returned as [`SessionError::StorageConflict`]. Any other error from `body`
/// aborts immediately without retrying.
pub async fn transact<S, T, F>(
    storage: &S,
    policy: RetryPolicy,
    project: &str,
    mut body: F,
) -> Result<T, SessionError>
where
    S: Storage + ?Sized,
    T: Send,
    F: FnMut(&mut Transaction<'_, S>) -> Result<T, SessionError> + Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut txn = Transaction::new(storage);
        let result = body(&mut txn)
            .and_then(|value| txn.commit().map(|()| value).map_err(SessionError::from));
        match result {
            Err(SessionError::StorageConflict { source, .. }) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    project,
                    attempt,
                    max_attempts,
                    ?delay,
                    error = %source,
                    "transaction failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(SessionError::StorageConflict { source, .. }) => {
                warn!(
                    project,
                    attempts = attempt,
                    error = %source,
                    "transaction retries exhausted"
                );
                return Err(SessionError::StorageConflict {
                    attempts: attempt,
                    source,
                });
            }
            other => return other,
        }
    }
}
