//! Bounded fixed-interval retry envelope
//!
//! Errors are classified by [`ErrorKind`](crate::error::ErrorKind), never by
//! message text.

use crate::error::{CloudError, ErrorKind, Result};
use crate::poll::PollConfig;
use crate::waiter::wait_until;
use cloudweave_config::RetrySettings;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_duration: Duration,
}

impl RetryPolicy {
    pub const fn new(interval: Duration, max_duration: Duration) -> Self {
        Self {
            interval,
            max_duration,
        }
    }

    fn poll(&self) -> PollConfig {
        PollConfig::new(self.interval, self.max_duration)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            interval: settings.interval(),
            max_duration: settings.max_duration(),
        }
    }
}

/// What to do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try again after one interval
    Retryable,
    /// Give up and return the error
    Terminal,
    /// The goal already holds; stop with success
    Satisfied,
}

/// `Transient` retries, `AlreadyInState` counts as done, the rest is terminal
pub fn classify(err: &CloudError) -> ErrorClass {
    match err.kind() {
        ErrorKind::Transient => ErrorClass::Retryable,
        ErrorKind::AlreadyInState => ErrorClass::Satisfied,
        _ => ErrorClass::Terminal,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Done(T),
    AlreadySatisfied,
}

impl<T> RetryOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            RetryOutcome::Done(value) => Some(value),
            RetryOutcome::AlreadySatisfied => None,
        }
    }
}

/// Retry `op` with the default classification
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    op: F,
) -> Result<RetryOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with(policy, cancel, what, classify, op).await
}

/// Retry `op` until it succeeds, hits a non-retryable error or the policy's
/// budget runs out.
///
/// When the budget runs out the last retryable error is returned.
pub async fn retry_with<T, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    classify: C,
    mut op: F,
) -> Result<RetryOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&CloudError) -> ErrorClass,
{
    let outcome = OnceLock::new();
    let last_error: Mutex<Option<CloudError>> = Mutex::new(None);
    let (outcome_ref, last_error_ref, classify_ref) = (&outcome, &last_error, &classify);

    let waited = wait_until(&policy.poll(), cancel, what, || {
        let attempt = op();
        async move {
            match attempt.await {
                Ok(value) => {
                    let _ = outcome_ref.set(RetryOutcome::Done(value));
                    Ok(true)
                }
                Err(e) => match classify_ref(&e) {
                    ErrorClass::Retryable => {
                        tracing::warn!("{} failed, will retry: {}", what, e);
                        *last_error_ref.lock().await = Some(e);
                        Ok(false)
                    }
                    ErrorClass::Satisfied => {
                        tracing::debug!("{}: {}", what, e);
                        let _ = outcome_ref.set(RetryOutcome::AlreadySatisfied);
                        Ok(true)
                    }
                    ErrorClass::Terminal => Err(e),
                },
            }
        }
    })
    .await;

    match waited {
        Ok(()) => outcome.into_inner().ok_or_else(|| {
            CloudError::AmbiguousResult(format!("{} stopped without an outcome", what))
        }),
        Err(e) if e.is_timeout() => match last_error.into_inner() {
            Some(last) => Err(last.context(format!("{} retries exhausted", what))),
            None => Err(e),
        },
        Err(e) => Err(e),
    }
}
