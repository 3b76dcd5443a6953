// src/kv/consistency.rs

//! Read-after-write polling for high-consistency writes.
//!
//! After a high-consistency `set`, the store polls a read-back of the key
//! until it succeeds or the overall deadline elapses. This approximates
//! read-after-write consistency on an eventually consistent store. It is not a
//! transactional guarantee: a concurrent writer can satisfy the poll with a
//! different value.
//!
//! # Polling Strategy
//!
//! - Each read-back is bounded by `read_timeout`
//! - Attempts are spaced by a fixed `poll_interval` (no backoff)
//! - The whole loop is bounded by `deadline`, reported as
//!   [`Error::DeadlineExceeded`](crate::Error::DeadlineExceeded)
//! - A torn-down session stops the loop at once

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::{Error, ReturnCode};

/// Timing of the read-back loop behind high-consistency writes.
///
/// Configure it per store with
/// [`KvStore::with_consistency`](crate::KvStore::with_consistency).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyPolicy {
    /// Pause between two read-back attempts.
    pub poll_interval: Duration,

    /// Timeout of a single read-back.
    pub read_timeout: Duration,

    /// Overall bound on the loop.
    pub deadline: Duration,
}

impl Default for ConsistencyPolicy {
    /// - `poll_interval`: 100ms
    /// - `read_timeout`: 1s
    /// - `deadline`: 30s
    fn default() -> Self {
        // ---
        Self {
            poll_interval: Duration::from_millis(100),
            read_timeout: Duration::from_secs(1),
            deadline: Duration::from_secs(30),
        }
    }
}

/// Run `read_back` until it succeeds or `policy.deadline` elapses.
///
/// `read_back` receives the per-attempt timeout. Every error other than a
/// torn-down session counts as "not visible yet" and is retried after
/// `poll_interval`.
pub(crate) async fn poll_until_visible<F, Fut, T>(
    policy: &ConsistencyPolicy,
    mut read_back: F,
) -> crate::Result<T>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let polling = async {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match read_back(policy.read_timeout).await {
                Ok(value) => {
                    crate::log_debug!("write visible after {attempt} read-back(s)");
                    return Ok(value);
                }
                Err(Error::Transport(ReturnCode::NotInitialized)) => {
                    return Err(Error::Transport(ReturnCode::NotInitialized));
                }
                Err(_err) => {
                    crate::log_debug!(
                        "read-back {attempt} not visible yet ({_err}), retrying in {:?}",
                        policy.poll_interval
                    );
                    sleep(policy.poll_interval).await;
                }
            }
        }
    };

    match timeout(policy.deadline, polling).await {
        Ok(result) => result,
        Err(_) => {
            crate::log_warn!("write not visible within {:?}", policy.deadline);
            Err(Error::DeadlineExceeded)
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn fast_policy(deadline: Duration) -> ConsistencyPolicy {
        ConsistencyPolicy {
            poll_interval: Duration::from_millis(10),
            read_timeout: Duration::from_millis(20),
            deadline,
        }
    }

    #[test]
    fn test_default_policy() {
        // ---
        let policy = ConsistencyPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_millis(100));
        assert_eq!(policy.read_timeout, Duration::from_secs(1));
        assert_eq!(policy.deadline, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_first_read_back_succeeds() {
        // ---
        let policy = fast_policy(Duration::from_secs(1));
        let call_count = Arc::new(Mutex::new(0));
        let call_count_clone = call_count.clone();

        let result = poll_until_visible(&policy, |_| {
            let count = call_count_clone.clone();
            async move {
                *count.lock().unwrap() += 1;
                Ok::<i32, Error>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*call_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_visible() {
        // ---
        let policy = fast_policy(Duration::from_secs(1));
        let call_count = Arc::new(Mutex::new(0));
        let call_count_clone = call_count.clone();

        let result = poll_until_visible(&policy, |read_timeout| {
            let count = call_count_clone.clone();
            async move {
                assert_eq!(read_timeout, Duration::from_millis(20));
                let mut c = count.lock().unwrap();
                *c += 1;
                if *c < 3 {
                    Err(Error::NotFound)
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(*call_count.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        // ---
        let policy = fast_policy(Duration::from_millis(100));
        let start = Instant::now();

        let result = poll_until_visible(&policy, |_| async { Err::<i32, _>(Error::NotFound) }).await;

        let elapsed = start.elapsed();
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
        assert!(
            elapsed >= Duration::from_millis(100),
            "returned too early: {elapsed:?}",
        );
        assert!(
            elapsed < Duration::from_millis(500),
            "deadline not enforced: {elapsed:?}",
        );
    }

    #[tokio::test]
    async fn test_deadline_bounds_a_hanging_read_back() {
        // ---
        let policy = fast_policy(Duration::from_millis(50));

        let result = poll_until_visible(&policy, |_| std::future::pending::<crate::Result<()>>()).await;

        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_torn_down_session_stops_polling() {
        // ---
        let policy = fast_policy(Duration::from_secs(5));
        let call_count = Arc::new(Mutex::new(0));
        let call_count_clone = call_count.clone();

        let result = poll_until_visible(&policy, |_| {
            let count = call_count_clone.clone();
            async move {
                *count.lock().unwrap() += 1;
                Err::<i32, _>(Error::Transport(ReturnCode::NotInitialized))
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::Transport(ReturnCode::NotInitialized))
        ));
        assert_eq!(*call_count.lock().unwrap(), 1);
    }
}
