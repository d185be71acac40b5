//! State-convergence waiter
//!
//! After every state-changing call the engine waits here until the resource's
//! observable status reaches the target. Status comparison is exact equality
//! against one target; callers that accept several outcomes use
//! [`wait_resource`] with their own predicate.

use crate::error::{Result, ResultExt};
use crate::poll::{PollConfig, PollDeadline};
use crate::resource::{CloudResource, ResourceStatus};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Poll `check` until it reports `true`, fails, or the budget runs out.
///
/// An error from `check` ends the wait immediately.
pub async fn wait_until<F, Fut>(
    poll: &PollConfig,
    cancel: &CancellationToken,
    what: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = PollDeadline::begin(poll, cancel, what).await?;
    while !deadline.expired() {
        if check().await? {
            tracing::debug!("{} converged after {:?}", what, deadline.elapsed());
            return Ok(());
        }
        deadline.pause(what).await?;
    }
    Err(deadline.timeout_error(what))
}

/// Refresh `resource` until `predicate` holds.
///
/// A not-found error from `refresh` is surfaced immediately: the resource
/// vanished while we expected it to converge.
pub async fn wait_resource<R, P>(
    resource: &mut R,
    target: &str,
    poll: &PollConfig,
    cancel: &CancellationToken,
    predicate: P,
) -> Result<()>
where
    R: CloudResource + ?Sized,
    P: Fn(&R) -> bool,
{
    let id = resource.id().to_string();
    let what = format!("{} {} -> {}", resource.kind(), id, target);

    let deadline = PollDeadline::begin(poll, cancel, &what).await?;
    while !deadline.expired() {
        resource
            .refresh()
            .await
            .with_context(|| format!("Refresh({})", id))?;

        tracing::debug!(
            "{} {} status {} expect {}",
            resource.kind(),
            id,
            resource.status(),
            target
        );
        if predicate(&*resource) {
            return Ok(());
        }
        deadline.pause(&what).await?;
    }
    Err(deadline.timeout_error(&what))
}

/// Wait until `resource` reports exactly `target`
pub async fn wait_status<R>(
    resource: &mut R,
    target: ResourceStatus,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: CloudResource + ?Sized,
{
    wait_resource(resource, target.as_str(), poll, cancel, |r| {
        r.status() == target
    })
    .await
}

/// [`wait_status`] with a grace delay before the first poll, for providers
/// that report stale status right after a mutating call
pub async fn wait_status_with_delay<R>(
    resource: &mut R,
    target: ResourceStatus,
    delay: Duration,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: CloudResource + ?Sized,
{
    let poll = poll.with_initial_delay(delay);
    wait_status(resource, target, &poll, cancel).await
}

/// Wait until `resource` is gone. Not-found is the success condition.
pub async fn wait_deleted<R>(
    resource: &mut R,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: CloudResource + ?Sized,
{
    let id = resource.id().to_string();
    let what = format!("{} {} -> deleted", resource.kind(), id);

    let deadline = PollDeadline::begin(poll, cancel, &what).await?;
    while !deadline.expired() {
        match resource.refresh().await {
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} is gone", what);
                return Ok(());
            }
            Err(e) => return Err(e.context(format!("Refresh({})", id))),
            Ok(()) if resource.status() == ResourceStatus::Deleted => return Ok(()),
            Ok(()) => {
                tracing::debug!("{} still {}", what, resource.status());
            }
        }
        deadline.pause(&what).await?;
    }
    Err(deadline.timeout_error(&what))
}
