//! Per-resource state machines
//!
//! Every transition follows the same discipline: re-read the status, check it
//! against a [`Guard`], send the request only when the transition is legal,
//! then wait for the observable target state. Requests for a state the
//! resource already has succeed without any call to the provider.

use crate::error::{CloudError, Result, ResultExt};
use crate::job::{JobClient, JobStatus, await_entity_id, wait_task_status};
use crate::poll::PollConfig;
use crate::resource::{CloudResource, Deletable, ElasticIp, ResourceStatus, VirtualMachine};
use crate::retry::{RetryPolicy, retry};
use crate::waiter::{wait_deleted, wait_resource, wait_status};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// What a guard decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Send the request, then wait
    Proceed,
    /// The transition is already under way; only wait
    Wait,
    /// Nothing to do
    Done,
}

/// Legal source states of one operation
#[derive(Debug, Clone, Copy)]
pub struct Guard {
    pub operation: &'static str,
    pub proceed: &'static [ResourceStatus],
    pub wait: &'static [ResourceStatus],
    pub done: &'static [ResourceStatus],
    /// Treat a resource that no longer exists as done (deletions)
    pub absent_is_done: bool,
}

impl Guard {
    pub const START_VM: Guard = Guard {
        operation: "start",
        proceed: &[ResourceStatus::Stopped],
        wait: &[ResourceStatus::Starting],
        done: &[ResourceStatus::Running],
        absent_is_done: false,
    };

    pub const STOP_VM: Guard = Guard {
        operation: "stop",
        proceed: &[ResourceStatus::Running],
        wait: &[ResourceStatus::Stopping],
        done: &[ResourceStatus::Stopped],
        absent_is_done: false,
    };

    pub const DELETE_VM: Guard = Guard {
        operation: "delete",
        proceed: &[ResourceStatus::Stopped, ResourceStatus::Error],
        wait: &[ResourceStatus::Deleting],
        done: &[ResourceStatus::Deleted],
        absent_is_done: true,
    };

    pub const CHANGE_CONFIG: Guard = Guard {
        operation: "change config",
        proceed: &[ResourceStatus::Stopped],
        wait: &[],
        done: &[],
        absent_is_done: false,
    };

    pub const REBUILD_ROOT: Guard = Guard {
        operation: "rebuild root",
        proceed: &[ResourceStatus::Stopped, ResourceStatus::Running],
        wait: &[],
        done: &[],
        absent_is_done: false,
    };

    pub const DELETE_EIP: Guard = Guard {
        operation: "delete",
        proceed: &[ResourceStatus::Ready, ResourceStatus::Error],
        wait: &[ResourceStatus::Deleting],
        done: &[ResourceStatus::Deleted],
        absent_is_done: true,
    };

    pub const DELETE_NAT_GATEWAY: Guard = Guard {
        operation: "delete",
        proceed: &[ResourceStatus::Available, ResourceStatus::Error],
        wait: &[ResourceStatus::Deleting],
        done: &[ResourceStatus::Deleted],
        absent_is_done: true,
    };

    pub const DELETE_LOAD_BALANCER: Guard = Guard {
        operation: "delete",
        proceed: &[
            ResourceStatus::Available,
            ResourceStatus::Stopped,
            ResourceStatus::Error,
        ],
        wait: &[ResourceStatus::Deleting],
        done: &[ResourceStatus::Deleted],
        absent_is_done: true,
    };

    pub fn check(&self, resource_id: &str, status: ResourceStatus) -> Result<Transition> {
        if self.done.contains(&status) {
            Ok(Transition::Done)
        } else if self.wait.contains(&status) {
            Ok(Transition::Wait)
        } else if self.proceed.contains(&status) {
            Ok(Transition::Proceed)
        } else {
            Err(CloudError::invalid_status(resource_id, status, self.operation))
        }
    }
}

/// Re-read `resource` and check the guard against its fresh status
pub async fn guard<R>(resource: &mut R, guard: &Guard) -> Result<Transition>
where
    R: CloudResource + ?Sized,
{
    let id = resource.id().to_string();
    match resource.refresh().await {
        Ok(()) => guard.check(&id, resource.status()),
        Err(e) if guard.absent_is_done && e.is_not_found() => Ok(Transition::Done),
        Err(e) => Err(e.context(format!("Refresh({})", id))),
    }
}

pub async fn start_vm<V>(vm: &mut V, poll: &PollConfig, cancel: &CancellationToken) -> Result<()>
where
    V: VirtualMachine + ?Sized,
{
    let id = vm.id().to_string();
    match guard(vm, &Guard::START_VM).await? {
        Transition::Done => {
            tracing::debug!("Instance {} already running", id);
            return Ok(());
        }
        Transition::Wait => tracing::debug!("Instance {} already starting", id),
        Transition::Proceed => {
            vm.request_start()
                .await
                .with_context(|| format!("StartVM({})", id))?;
            tracing::info!("Starting instance {}", id);
        }
    }
    wait_status(vm, ResourceStatus::Running, poll, cancel)
        .await
        .with_context(|| format!("StartVM({})", id))
}

/// Stop an instance. Stopping a stopped instance is a no-op.
pub async fn stop_vm<V>(
    vm: &mut V,
    force: bool,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    V: VirtualMachine + ?Sized,
{
    let id = vm.id().to_string();
    match guard(vm, &Guard::STOP_VM).await? {
        Transition::Done => {
            tracing::debug!("Instance {} already stopped", id);
            return Ok(());
        }
        Transition::Wait => tracing::debug!("Instance {} already stopping", id),
        Transition::Proceed => {
            vm.request_stop(force)
                .await
                .with_context(|| format!("StopVM({})", id))?;
            tracing::info!("Stopping instance {} (force: {})", id, force);
        }
    }
    wait_status(vm, ResourceStatus::Stopped, poll, cancel)
        .await
        .with_context(|| format!("StopVM({})", id))
}

/// Delete a resource through `guard` and wait until it is gone
pub async fn delete_resource<R>(
    resource: &mut R,
    guard: &Guard,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: Deletable + ?Sized,
{
    let id = resource.id().to_string();
    let kind = resource.kind();
    match self::guard(resource, guard).await? {
        Transition::Done => {
            tracing::debug!("{} {} already deleted", kind, id);
            return Ok(());
        }
        Transition::Wait => tracing::debug!("{} {} already deleting", kind, id),
        Transition::Proceed => {
            resource
                .request_delete()
                .await
                .with_context(|| format!("Delete({})", id))?;
            tracing::info!("Deleting {} {}", kind, id);
        }
    }
    wait_deleted(resource, poll, cancel)
        .await
        .with_context(|| format!("Delete({})", id))
}

/// Delete an instance. The instance must be stopped first.
pub async fn delete_vm<V>(vm: &mut V, poll: &PollConfig, cancel: &CancellationToken) -> Result<()>
where
    V: VirtualMachine + ?Sized,
{
    delete_resource(vm, &Guard::DELETE_VM, poll, cancel).await
}

/// Resize a stopped instance, trying each candidate type in order.
///
/// `poll` should carry the resize grace delay: providers keep reporting the
/// old status for a while after accepting the request. Returns the instance
/// type that was accepted; when every candidate is rejected the last error
/// is returned.
pub async fn change_config<V>(
    vm: &mut V,
    candidates: &[String],
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<String>
where
    V: VirtualMachine + ?Sized,
{
    let id = vm.id().to_string();
    if candidates.is_empty() {
        return Err(CloudError::InvalidConfig(format!(
            "no instance type candidates for {}",
            id
        )));
    }
    guard(vm, &Guard::CHANGE_CONFIG).await?;

    let mut accepted = None;
    let mut last_error = None;
    for instance_type in candidates {
        match vm.request_change_config(instance_type).await {
            Ok(()) => {
                accepted = Some(instance_type.clone());
                break;
            }
            Err(e) => {
                tracing::warn!("Instance {} rejected type {}: {}", id, instance_type, e);
                last_error = Some(e);
            }
        }
    }

    let Some(instance_type) = accepted else {
        let err = last_error.unwrap_or_else(|| {
            CloudError::InvalidConfig(format!("no instance type accepted for {}", id))
        });
        return Err(err.context(format!("ChangeConfig({})", id)));
    };

    tracing::info!("Resizing instance {} to {}", id, instance_type);
    wait_status(vm, ResourceStatus::Stopped, poll, cancel)
        .await
        .with_context(|| format!("ChangeConfig({})", id))?;
    Ok(instance_type)
}

/// Rebuild the system disk from `image_id` and return the system disk id
pub async fn rebuild_root<V, J>(
    vm: &mut V,
    jobs: &J,
    service_type: &str,
    image_id: &str,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<String>
where
    V: VirtualMachine + ?Sized,
    J: JobClient + ?Sized,
{
    let id = vm.id().to_string();
    guard(vm, &Guard::REBUILD_ROOT).await?;

    let job_id = vm
        .request_rebuild_root(image_id)
        .await
        .with_context(|| format!("RebuildRoot({})", id))?;
    tracing::info!("Rebuilding root of {} from {} (job {})", id, image_id, job_id);

    wait_task_status(jobs, service_type, &job_id, JobStatus::Success, poll, cancel)
        .await
        .with_context(|| format!("RebuildRoot({})", id))?;
    vm.refresh()
        .await
        .with_context(|| format!("Refresh({})", id))?;

    vm.disk_ids()
        .into_iter()
        .next()
        .ok_or_else(|| CloudError::NotFound(format!("system disk of {}", id)))
}

/// Submit a single-instance creation job and return the new instance id.
///
/// Creation jobs are batch jobs; exactly one `server_id` must come out.
pub async fn create_instance<J, F, Fut>(
    jobs: &J,
    service_type: &str,
    submit: F,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<String>
where
    J: JobClient + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let job_id = submit().await.context("CreateInstance")?;
    tracing::info!("Submitted instance creation job {}", job_id);

    let server_id = await_entity_id(jobs, service_type, &job_id, "server_id", poll, cancel)
        .await
        .context("CreateInstance")?;
    tracing::info!("Created instance {}", server_id);
    Ok(server_id)
}

/// Create an image from an instance and return the image id
pub async fn create_image<V, J>(
    vm: &V,
    jobs: &J,
    service_type: &str,
    image_name: &str,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<String>
where
    V: VirtualMachine + ?Sized,
    J: JobClient + ?Sized,
{
    let job_id = vm
        .request_create_image(image_name)
        .await
        .with_context(|| format!("CreateImage({})", vm.id()))?;
    tracing::info!("Creating image {} from {} (job {})", image_name, vm.id(), job_id);

    await_entity_id(jobs, service_type, &job_id, "image_id", poll, cancel)
        .await
        .with_context(|| format!("CreateImage({})", image_name))
}

/// Attach a disk, retrying while the provider has not caught up with the
/// disk's creation, then wait until the instance reports it
pub async fn attach_disk<V>(
    vm: &mut V,
    disk_id: &str,
    policy: &RetryPolicy,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    V: VirtualMachine + ?Sized,
{
    let id = vm.id().to_string();
    vm.refresh()
        .await
        .with_context(|| format!("Refresh({})", id))?;
    if vm.disk_ids().iter().any(|d| d == disk_id) {
        tracing::debug!("Disk {} already attached to {}", disk_id, id);
        return Ok(());
    }

    let shared: &V = vm;
    retry(policy, cancel, "AttachDisk", move || shared.request_attach_disk(disk_id))
        .await
        .with_context(|| format!("AttachDisk({}, {})", id, disk_id))?;
    tracing::info!("Attaching disk {} to {}", disk_id, id);

    wait_resource(vm, "disk attached", poll, cancel, |v| {
        v.disk_ids().iter().any(|d| d == disk_id)
    })
    .await
    .with_context(|| format!("AttachDisk({}, {})", id, disk_id))
}

/// Detach a disk. A disk the provider already considers detached is fine.
pub async fn detach_disk<V>(
    vm: &mut V,
    disk_id: &str,
    policy: &RetryPolicy,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    V: VirtualMachine + ?Sized,
{
    let id = vm.id().to_string();
    vm.refresh()
        .await
        .with_context(|| format!("Refresh({})", id))?;
    if !vm.disk_ids().iter().any(|d| d == disk_id) {
        tracing::debug!("Disk {} not attached to {}", disk_id, id);
        return Ok(());
    }

    let shared: &V = vm;
    retry(policy, cancel, "DetachDisk", move || shared.request_detach_disk(disk_id))
        .await
        .with_context(|| format!("DetachDisk({}, {})", id, disk_id))?;
    tracing::info!("Detaching disk {} from {}", disk_id, id);

    wait_resource(vm, "disk detached", poll, cancel, |v| {
        !v.disk_ids().iter().any(|d| d == disk_id)
    })
    .await
    .with_context(|| format!("DetachDisk({}, {})", id, disk_id))
}

/// Allocate an elastic IP and wait until it is ready
pub async fn allocate_eip<E, F, Fut>(
    allocate: F,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<E>
where
    E: ElasticIp,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<E>>,
{
    let mut eip = allocate().await.context("AllocateEip")?;
    tracing::info!("Allocated EIP {} ({})", eip.id(), eip.ip_addr());

    wait_status(&mut eip, ResourceStatus::Ready, poll, cancel)
        .await
        .with_context(|| format!("AllocateEip({})", eip.id()))?;
    Ok(eip)
}

/// Associate an EIP with an instance.
///
/// Already associated with the same instance is a no-op; associated with a
/// different one is an `InvalidStatus` error. That includes an association
/// still in flight towards another instance.
pub async fn associate_eip<E>(
    eip: &mut E,
    instance_id: &str,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    E: ElasticIp + ?Sized,
{
    let id = eip.id().to_string();
    eip.refresh()
        .await
        .with_context(|| format!("Refresh({})", id))?;

    // Some providers only name the instance once the association lands
    if eip.associated_instance_id().is_none() && eip.status() == ResourceStatus::Associating {
        tracing::debug!("EIP {} is associating with an unreported instance", id);
        wait_resource(eip, "settled", poll, cancel, |e| {
            e.status() != ResourceStatus::Associating
        })
        .await
        .with_context(|| format!("AssociateEip({}, {})", id, instance_id))?;
    }

    let status = eip.status();
    let transition = match eip.associated_instance_id() {
        Some(current) if current == instance_id => match status {
            ResourceStatus::Ready => Transition::Done,
            _ => Transition::Wait,
        },
        Some(current) => {
            return Err(CloudError::invalid_status(
                &id,
                format!("associated with {}", current),
                format!("associate with {}", instance_id),
            ));
        }
        None => match status {
            ResourceStatus::Ready => Transition::Proceed,
            other => return Err(CloudError::invalid_status(&id, other, "associate")),
        },
    };

    match transition {
        Transition::Done => {
            tracing::debug!("EIP {} already associated with {}", id, instance_id);
            return Ok(());
        }
        Transition::Wait => tracing::debug!("EIP {} association in progress", id),
        Transition::Proceed => {
            eip.request_associate(instance_id)
                .await
                .with_context(|| format!("AssociateEip({}, {})", id, instance_id))?;
            tracing::info!("Associating EIP {} with {}", id, instance_id);
        }
    }

    wait_resource(eip, "associated", poll, cancel, |e| {
        e.associated_instance_id() == Some(instance_id) && e.status() == ResourceStatus::Ready
    })
    .await
    .with_context(|| format!("AssociateEip({}, {})", id, instance_id))
}

/// Dissociate an EIP from whatever it is attached to
pub async fn dissociate_eip<E>(eip: &mut E, poll: &PollConfig, cancel: &CancellationToken) -> Result<()>
where
    E: ElasticIp + ?Sized,
{
    let id = eip.id().to_string();
    eip.refresh()
        .await
        .with_context(|| format!("Refresh({})", id))?;

    let status = eip.status();
    let transition = match (eip.associated_instance_id(), status) {
        (None, ResourceStatus::Ready) => Transition::Done,
        (_, ResourceStatus::Dissociating) => Transition::Wait,
        (Some(_), ResourceStatus::Ready) => Transition::Proceed,
        (_, other) => return Err(CloudError::invalid_status(&id, other, "dissociate")),
    };

    match transition {
        Transition::Done => {
            tracing::debug!("EIP {} not associated", id);
            return Ok(());
        }
        Transition::Wait => tracing::debug!("EIP {} dissociation in progress", id),
        Transition::Proceed => {
            eip.request_dissociate()
                .await
                .with_context(|| format!("DissociateEip({})", id))?;
            tracing::info!("Dissociating EIP {}", id);
        }
    }

    wait_resource(eip, "dissociated", poll, cancel, |e| {
        e.associated_instance_id().is_none() && e.status() == ResourceStatus::Ready
    })
    .await
    .with_context(|| format!("DissociateEip({})", id))
}
