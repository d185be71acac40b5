//! Shared in-memory state of the simulated cloud
//!
//! Every handle ([`SimInstance`](crate::SimInstance), [`SimJobs`](crate::SimJobs),
//! ...) holds a clone of the same [`SimCloud`]. Requests mutate the world
//! right away but the effect they promise only lands after a number of
//! refreshes, the way a real control plane reports an intermediate status
//! for a while.

use crate::error::{Result, SimError};
use chrono::{DateTime, Utc};
use cloudweave_cloud::{
    AclEntry, AsyncJob, BackendInfo, DnatRule, HostInfo, JobStatus, RegionInfo, ResourceStatus,
    SecurityGroupInfo, SecurityRule, SnatRule, StorageInfo, VpcInfo, WireInfo, ZoneInfo,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Service type of compute jobs
pub const COMPUTE_SERVICE: &str = "ecs";

/// Service type of image jobs
pub const IMAGE_SERVICE: &str = "ims";

/// Simulated API calls, used for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    Refresh,
    Start,
    Stop,
    Delete,
    ChangeConfig,
    RebuildRoot,
    CreateImage,
    AttachDisk,
    DetachDisk,
    AssignSecurityGroup,
    UnassignSecurityGroup,
    CreateInstances,
    AllocateEip,
    Associate,
    Dissociate,
    TaskStatus,
    OrderStatus,
    GetSecurityGroup,
    CreateSecurityGroup,
    ListRules,
    AddRule,
    RemoveRule,
    ListNatEntries,
    AddNatEntry,
    RemoveNatEntry,
    ListAcl,
    AddAclEntry,
    RemoveAclEntry,
    ListTopology,
    CreateVpc,
    DeleteVpc,
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// How quickly the simulated control plane settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Refreshes before a requested status change becomes visible.
    /// 0 and 1 both mean the next refresh.
    #[serde(default = "default_transition_refreshes")]
    pub transition_refreshes: u32,

    /// Status queries a job answers with "running" before it finishes
    #[serde(default = "default_job_polls")]
    pub job_polls: u32,
}

fn default_transition_refreshes() -> u32 {
    2
}

fn default_job_polls() -> u32 {
    2
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            transition_refreshes: default_transition_refreshes(),
            job_polls: default_job_polls(),
        }
    }
}

/// Effect that lands once a pending transition settles
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Change {
    Status(ResourceStatus),
    Resize(String),
    AttachDisk(String),
    DetachDisk(String),
    Associate(String),
    Dissociate,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pending {
    refreshes_left: u32,
    change: Change,
}

/// Schedule `change` to land on the `refreshes`-th refresh from now
pub(crate) fn schedule(refreshes: u32, change: Change) -> Option<Pending> {
    Some(Pending {
        refreshes_left: refreshes.max(1),
        change,
    })
}

/// Count one refresh and hand back the change if it is due
fn advance(pending: &mut Option<Pending>) -> Option<Change> {
    let p = pending.as_mut()?;
    if p.refreshes_left > 1 {
        p.refreshes_left -= 1;
        return None;
    }
    pending.take().map(|p| p.change)
}

pub(crate) fn conflict(resource: &str, status: ResourceStatus, operation: &'static str) -> SimError {
    SimError::Conflict {
        resource: resource.to_string(),
        status,
        operation,
    }
}

/// Reject a request while an earlier one has not settled
fn ensure_idle(
    id: &str,
    status: ResourceStatus,
    pending: &Option<Pending>,
    operation: &'static str,
) -> Result<()> {
    match pending {
        Some(_) => Err(conflict(id, status, operation)),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InstanceRecord {
    pub name: String,
    pub host_id: String,
    pub instance_type: String,
    pub status: ResourceStatus,
    pub ips: Vec<String>,
    pub disks: Vec<String>,
    pub security_groups: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub pending: Option<Pending>,
}

#[derive(Debug, Clone)]
pub(crate) struct EipRecord {
    pub ip: String,
    pub status: ResourceStatus,
    pub instance_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub pending: Option<Pending>,
}

#[derive(Debug, Clone)]
pub(crate) struct NatRecord {
    pub name: String,
    pub status: ResourceStatus,
    pub dnat: Vec<DnatRule>,
    pub snat: Vec<SnatRule>,
    pub pending: Option<Pending>,
}

#[derive(Debug, Clone)]
pub(crate) struct GroupRecord {
    pub info: SecurityGroupInfo,
    pub rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone)]
struct JobRecord {
    service_type: String,
    polls_left: u32,
    outcome: AsyncJob,
}

#[derive(Debug, Clone)]
struct OrderRecord {
    polls_left: u32,
    resource_ids: Vec<String>,
}

/// Instance placement and shape used when creating instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub host_id: String,
    pub instance_type: String,
    #[serde(default)]
    pub security_groups: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct World {
    pub timing: Timing,
    next_id: u64,
    faults: HashMap<Op, u32>,
    calls: HashMap<Op, usize>,
    job_failures: VecDeque<String>,
    pub sold_out: BTreeSet<String>,
    pub instances: BTreeMap<String, InstanceRecord>,
    pub disks: BTreeSet<String>,
    pub images: BTreeMap<String, String>,
    pub eips: BTreeMap<String, EipRecord>,
    pub nat_gateways: BTreeMap<String, NatRecord>,
    pub security_groups: BTreeMap<String, GroupRecord>,
    pub acls: BTreeMap<String, Vec<AclEntry>>,
    jobs: HashMap<String, JobRecord>,
    orders: HashMap<String, OrderRecord>,
    pub regions: BTreeMap<String, RegionInfo>,
    pub zones: Vec<(String, ZoneInfo)>,
    pub vpcs: Vec<(String, VpcInfo)>,
    pub wires: Vec<(String, WireInfo)>,
    pub hosts: Vec<(String, HostInfo)>,
    pub storages: Vec<(String, StorageInfo)>,
    pub backends: BTreeMap<String, Vec<BackendInfo>>,
}

impl World {
    /// Count the call and fail it if a fault is armed for `op`
    pub fn begin(&mut self, op: Op) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(remaining) = self.faults.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                tracing::debug!("Injected fault for {}", op);
                return Err(SimError::Throttled(op.to_string()));
            }
        }
        Ok(())
    }

    pub fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    pub fn delay(&self) -> u32 {
        self.timing.transition_refreshes
    }

    pub fn instance_mut(&mut self, id: &str) -> Result<&mut InstanceRecord> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| SimError::not_found("instance", id))
    }

    pub fn eip_mut(&mut self, id: &str) -> Result<&mut EipRecord> {
        self.eips
            .get_mut(id)
            .ok_or_else(|| SimError::not_found("eip", id))
    }

    pub fn nat_mut(&mut self, id: &str) -> Result<&mut NatRecord> {
        self.nat_gateways
            .get_mut(id)
            .ok_or_else(|| SimError::not_found("nat gateway", id))
    }

    pub fn group_mut(&mut self, id: &str) -> Result<&mut GroupRecord> {
        self.security_groups
            .get_mut(id)
            .ok_or_else(|| SimError::not_found("security group", id))
    }

    /// Run a request against an idle instance
    pub fn instance_request<T>(
        &mut self,
        op: Op,
        id: &str,
        operation: &'static str,
        f: impl FnOnce(&mut InstanceRecord, u32) -> Result<T>,
    ) -> Result<T> {
        self.begin(op)?;
        let delay = self.delay();
        let record = self.instance_mut(id)?;
        ensure_idle(id, record.status, &record.pending, operation)?;
        f(record, delay)
    }

    pub fn eip_request(
        &mut self,
        op: Op,
        id: &str,
        operation: &'static str,
        f: impl FnOnce(&mut EipRecord, u32) -> Result<()>,
    ) -> Result<()> {
        self.begin(op)?;
        let delay = self.delay();
        let record = self.eip_mut(id)?;
        ensure_idle(id, record.status, &record.pending, operation)?;
        f(record, delay)
    }

    pub fn refresh_instance(&mut self, id: &str) -> Result<InstanceRecord> {
        self.begin(Op::Refresh)?;
        let record = self.instance_mut(id)?;
        match advance(&mut record.pending) {
            Some(Change::Status(status)) => record.status = status,
            Some(Change::Resize(instance_type)) => record.instance_type = instance_type,
            Some(Change::AttachDisk(disk)) => record.disks.push(disk),
            Some(Change::DetachDisk(disk)) => record.disks.retain(|d| *d != disk),
            Some(Change::Remove) => {
                self.instances.remove(id);
                self.eips
                    .values_mut()
                    .filter(|eip| eip.instance_id.as_deref() == Some(id))
                    .for_each(|eip| eip.instance_id = None);
                tracing::debug!("Instance {} is gone", id);
                return Err(SimError::not_found("instance", id));
            }
            Some(Change::Associate(_)) | Some(Change::Dissociate) | None => {}
        }
        Ok(record.clone())
    }

    pub fn refresh_eip(&mut self, id: &str) -> Result<EipRecord> {
        self.begin(Op::Refresh)?;
        let record = self.eip_mut(id)?;
        match advance(&mut record.pending) {
            Some(Change::Status(status)) => record.status = status,
            Some(Change::Associate(instance_id)) => {
                record.instance_id = Some(instance_id);
                record.status = ResourceStatus::Ready;
            }
            Some(Change::Dissociate) => {
                record.instance_id = None;
                record.status = ResourceStatus::Ready;
            }
            Some(Change::Remove) => {
                self.eips.remove(id);
                return Err(SimError::not_found("eip", id));
            }
            Some(_) | None => {}
        }
        Ok(record.clone())
    }

    pub fn refresh_nat(&mut self, id: &str) -> Result<NatRecord> {
        self.begin(Op::Refresh)?;
        let record = self.nat_mut(id)?;
        match advance(&mut record.pending) {
            Some(Change::Status(status)) => record.status = status,
            Some(Change::Remove) => {
                self.nat_gateways.remove(id);
                return Err(SimError::not_found("nat gateway", id));
            }
            Some(_) | None => {}
        }
        Ok(record.clone())
    }

    /// Register a job. A queued job failure takes precedence over `outcome`
    /// and skips its side effects.
    pub fn submit_job(
        &mut self,
        service_type: &str,
        outcome: impl FnOnce(&mut World, &str) -> AsyncJob,
    ) -> String {
        let job_id = self.next_id("job");
        let outcome = match self.job_failures.pop_front() {
            Some(reason) => AsyncJob::new(&job_id, JobStatus::Failed).with_fail_reason(reason),
            None => outcome(self, job_id.as_str()),
        };
        self.jobs.insert(
            job_id.clone(),
            JobRecord {
                service_type: service_type.to_string(),
                polls_left: self.timing.job_polls,
                outcome,
            },
        );
        job_id
    }

    pub fn job_status(&mut self, service_type: &str, job_id: &str) -> Result<AsyncJob> {
        self.begin(Op::TaskStatus)?;
        let job = self
            .jobs
            .get_mut(job_id)
            .filter(|job| job.service_type == service_type)
            .ok_or_else(|| SimError::not_found("job", job_id))?;
        if job.polls_left > 0 {
            job.polls_left -= 1;
            return Ok(AsyncJob::new(job_id, JobStatus::Running));
        }
        Ok(job.outcome.clone())
    }

    pub fn create_instances(&mut self, spec: &InstanceSpec, count: u32) -> Result<String> {
        self.begin(Op::CreateInstances)?;
        if count == 0 {
            return Err(SimError::InvalidRequest("instance count must be positive".into()));
        }
        if self.sold_out.contains(&spec.instance_type) {
            return Err(SimError::SoldOut(spec.instance_type.clone()));
        }
        if !self.hosts.iter().any(|(_, host)| host.id == spec.host_id) {
            return Err(SimError::not_found("host", &spec.host_id));
        }

        Ok(self.submit_job(COMPUTE_SERVICE, |world, job_id| {
            let delay = world.delay();
            let mut job = AsyncJob::new(job_id, JobStatus::Success);
            for n in 0..count {
                let id = world.next_id("i");
                let disk = world.next_id("disk");
                let name = if count == 1 {
                    spec.name.clone()
                } else {
                    format!("{}-{}", spec.name, n + 1)
                };
                world.disks.insert(disk.clone());
                world.instances.insert(
                    id.clone(),
                    InstanceRecord {
                        name,
                        host_id: spec.host_id.clone(),
                        instance_type: spec.instance_type.clone(),
                        status: ResourceStatus::Starting,
                        ips: Vec::new(),
                        disks: vec![disk],
                        security_groups: spec.security_groups.clone(),
                        created_at: Utc::now(),
                        pending: schedule(delay, Change::Status(ResourceStatus::Running)),
                    },
                );
                let sub_id = format!("{}-{}", job_id, n + 1);
                job = job.with_sub_job(
                    AsyncJob::new(sub_id, JobStatus::Success).with_entity("server_id", id),
                );
            }
            job
        }))
    }

    pub fn allocate_eip(&mut self) -> Result<String> {
        self.begin(Op::AllocateEip)?;
        let id = self.next_id("eip");
        let ip = format!("203.0.113.{}", 10 + self.next_id % 240);
        let pending = schedule(self.delay(), Change::Status(ResourceStatus::Ready));
        self.eips.insert(
            id.clone(),
            EipRecord {
                ip,
                status: ResourceStatus::Allocating,
                instance_id: None,
                created_at: Utc::now(),
                pending,
            },
        );
        Ok(id)
    }

    pub fn order_resource_ids(&mut self, order_id: &str) -> Result<Vec<String>> {
        self.begin(Op::OrderStatus)?;
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| SimError::not_found("order", order_id))?;
        if order.polls_left > 0 {
            order.polls_left -= 1;
            return Ok(Vec::new());
        }
        Ok(order.resource_ids.clone())
    }
}

/// Handle on the simulated cloud. Clones share the same world.
#[derive(Debug, Clone, Default)]
pub struct SimCloud {
    world: Arc<Mutex<World>>,
}

impl SimCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timing(timing: Timing) -> Self {
        let cloud = Self::new();
        cloud.lock().timing = timing;
        cloud
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timing(&self) -> Timing {
        self.lock().timing
    }

    pub fn set_timing(&self, timing: Timing) {
        self.lock().timing = timing;
    }

    /// Make the next `count` calls of `op` fail with a throttling error
    pub fn inject_fault(&self, op: Op, count: u32) {
        *self.lock().faults.entry(op).or_default() += count;
    }

    /// Number of `op` calls received so far, failed ones included
    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or_default()
    }

    /// The next submitted job fails with `reason`
    pub fn fail_next_job(&self, reason: impl Into<String>) {
        self.lock().job_failures.push_back(reason.into());
    }

    pub fn mark_sold_out(&self, instance_type: impl Into<String>) {
        self.lock().sold_out.insert(instance_type.into());
    }

    pub fn add_region(&self, id: impl Into<String>, name: impl Into<String>) {
        let id = id.into();
        let info = RegionInfo {
            id: id.clone(),
            name: name.into(),
        };
        self.lock().regions.insert(id, info);
    }

    pub fn add_zone(&self, region_id: &str, zone: ZoneInfo) {
        self.lock().zones.push((region_id.to_string(), zone));
    }

    pub fn add_vpc(&self, region_id: &str, vpc: VpcInfo) {
        self.lock().vpcs.push((region_id.to_string(), vpc));
    }

    pub fn add_wire(&self, vpc_id: &str, wire: WireInfo) {
        self.lock().wires.push((vpc_id.to_string(), wire));
    }

    pub fn add_host(&self, zone_id: &str, host: HostInfo) {
        self.lock().hosts.push((zone_id.to_string(), host));
    }

    pub fn add_storage(&self, zone_id: &str, storage: StorageInfo) {
        self.lock().storages.push((zone_id.to_string(), storage));
    }

    pub fn add_backend(&self, lb_id: &str, backend: BackendInfo) {
        self.lock()
            .backends
            .entry(lb_id.to_string())
            .or_default()
            .push(backend);
    }

    pub fn add_disk(&self, disk_id: impl Into<String>) {
        self.lock().disks.insert(disk_id.into());
    }

    /// Place an existing instance on a host
    pub fn add_instance(
        &self,
        id: impl Into<String>,
        spec: &InstanceSpec,
        status: ResourceStatus,
        ips: Vec<String>,
        disks: Vec<String>,
    ) {
        let mut world = self.lock();
        world.disks.extend(disks.iter().cloned());
        world.instances.insert(
            id.into(),
            InstanceRecord {
                name: spec.name.clone(),
                host_id: spec.host_id.clone(),
                instance_type: spec.instance_type.clone(),
                status,
                ips,
                disks,
                security_groups: spec.security_groups.clone(),
                created_at: Utc::now(),
                pending: None,
            },
        );
    }

    pub fn add_eip(&self, id: impl Into<String>, ip: impl Into<String>, instance_id: Option<String>) {
        self.lock().eips.insert(
            id.into(),
            EipRecord {
                ip: ip.into(),
                status: ResourceStatus::Ready,
                instance_id,
                created_at: Utc::now(),
                pending: None,
            },
        );
    }

    pub fn add_nat_gateway(&self, id: impl Into<String>, name: impl Into<String>) {
        self.lock().nat_gateways.insert(
            id.into(),
            NatRecord {
                name: name.into(),
                status: ResourceStatus::Available,
                dnat: Vec::new(),
                snat: Vec::new(),
                pending: None,
            },
        );
    }

    pub fn add_security_group(&self, info: SecurityGroupInfo, rules: Vec<SecurityRule>) {
        let mut world = self.lock();
        let mut stored = Vec::with_capacity(rules.len());
        for rule in rules {
            let external_id = world.next_id("rule");
            stored.push(rule.with_external_id(external_id));
        }
        world.security_groups.insert(
            info.id.clone(),
            GroupRecord {
                info,
                rules: stored,
            },
        );
    }

    pub fn add_acl(&self, acl_id: impl Into<String>, entries: Vec<AclEntry>) {
        self.lock().acls.insert(acl_id.into(), entries);
    }

    /// Register a prepaid order that yields `resource_ids` after `polls`
    /// empty answers
    pub fn place_order(&self, resource_ids: Vec<String>, polls: u32) -> String {
        let mut world = self.lock();
        let order_id = world.next_id("order");
        world.orders.insert(
            order_id.clone(),
            OrderRecord {
                polls_left: polls,
                resource_ids,
            },
        );
        order_id
    }

    /// Submit a batch creation job, returning its job id
    pub fn submit_create_instances(&self, spec: &InstanceSpec, count: u32) -> Result<String> {
        let job_id = self.lock().create_instances(spec, count)?;
        tracing::debug!("Submitted creation of {} x {} (job {})", count, spec.name, job_id);
        Ok(job_id)
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.lock().instances.keys().cloned().collect()
    }

    pub fn instance_type(&self, instance_id: &str) -> Option<String> {
        self.lock()
            .instances
            .get(instance_id)
            .map(|i| i.instance_type.clone())
    }

    pub fn image_name(&self, image_id: &str) -> Option<String> {
        self.lock().images.get(image_id).cloned()
    }

    pub fn security_group_ids(&self) -> Vec<String> {
        self.lock().security_groups.keys().cloned().collect()
    }

    /// Rules of a group as stored remotely
    pub fn rules_of(&self, secgroup_id: &str) -> Vec<SecurityRule> {
        self.lock()
            .security_groups
            .get(secgroup_id)
            .map(|g| g.rules.clone())
            .unwrap_or_default()
    }

    pub fn acl_entries(&self, acl_id: &str) -> Vec<AclEntry> {
        self.lock().acls.get(acl_id).cloned().unwrap_or_default()
    }
}
