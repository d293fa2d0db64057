use std::future::Future;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;
use crate::SystemError;

/// Runs `task` until it succeeds, each attempt bounded by the policy timeout,
/// sleeping with exponential backoff in between.
///
/// Only errors accepted by `retryable` are retried; anything else is returned
/// at once. `max_retries == 0` retries forever.
pub async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
    retryable: fn(&Error) -> bool,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut failures: u32 = 0;
    loop {
        let err = match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => e,
            Err(_) => Error::System(SystemError::Timeout(policy.timeout())),
        };

        if !retryable(&err) {
            return Err(err);
        }

        failures = failures.saturating_add(1);
        if !policy.is_unlimited() && failures as usize > policy.max_retries {
            warn!("Task failed after {} retries: {:?}", policy.max_retries, err);
            return Err(err);
        }

        let delay = policy.delay_after(failures);
        warn!(?err, ?delay, failures, "task failed, backing off");
        sleep(delay).await;
    }
}

// Helper function to spawn tasks and track their JoinHandles
pub fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<tokio::task::JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
