//! Order waiter
//!
//! Prepaid resources are created through orders. The order itself completes
//! before the resource is visible, so callers poll until it exists.

use crate::error::{CloudError, Result, ResultExt};
use crate::job::single_entity_id;
use crate::poll::PollConfig;
use crate::waiter::wait_until;
use async_trait::async_trait;
use std::future::Future;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Order lookup, implemented by providers with prepaid billing
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Ids of the resources an order has produced so far
    async fn order_resource_ids(&self, order_id: &str) -> Result<Vec<String>>;
}

/// Poll `lookup` until it stops reporting not-found.
///
/// Any other error ends the wait.
pub async fn wait_order_resource<T, F, Fut>(
    poll: &PollConfig,
    cancel: &CancellationToken,
    what: &str,
    mut lookup: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let found = OnceLock::new();
    let found_ref = &found;

    wait_until(poll, cancel, what, || {
        let attempt = lookup();
        async move {
            match attempt.await {
                Ok(value) => {
                    let _ = found_ref.set(value);
                    Ok(true)
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!("{} not created yet", what);
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        }
    })
    .await?;

    found
        .into_inner()
        .ok_or_else(|| CloudError::AmbiguousResult(format!("{} finished without a result", what)))
}

/// Wait for an order to produce exactly one resource and return its id
pub async fn await_order_resource_id<O>(
    orders: &O,
    order_id: &str,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<String>
where
    O: OrderClient + ?Sized,
{
    let what = format!("order {}", order_id);
    let ids = wait_order_resource(poll, cancel, &what, || async {
        let ids = orders
            .order_resource_ids(order_id)
            .await
            .with_context(|| format!("GetOrderResources({})", order_id))?;
        if ids.is_empty() {
            return Err(CloudError::NotFound(format!("resources of order {}", order_id)));
        }
        Ok(ids)
    })
    .await?;

    let id = single_entity_id(ids, "order resource").with_context(|| what.clone())?;
    tracing::info!("Order {} produced {}", order_id, id);
    Ok(id)
}
