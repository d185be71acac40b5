//! Simulated virtual machines

use crate::error::SimError;
use crate::world::{
    COMPUTE_SERVICE, Change, IMAGE_SERVICE, InstanceRecord, Op, SimCloud, conflict, schedule,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudweave_cloud::{
    AsyncJob, CloudResource, Deletable, JobStatus, ResourceKind, ResourceStatus, Result,
    VirtualMachine,
};

/// Instance handle. Reads come from the snapshot taken at the last refresh.
#[derive(Debug, Clone)]
pub struct SimInstance {
    cloud: SimCloud,
    id: String,
    record: InstanceRecord,
}

impl SimInstance {
    pub(crate) fn new(cloud: SimCloud, id: String, record: InstanceRecord) -> Self {
        Self { cloud, id, record }
    }

    pub fn instance_type(&self) -> &str {
        &self.record.instance_type
    }

    pub fn host_id(&self) -> &str {
        &self.record.host_id
    }

    pub fn ips(&self) -> &[String] {
        &self.record.ips
    }
}

impl SimCloud {
    pub fn instance(&self, id: &str) -> Result<SimInstance> {
        let record = self
            .lock()
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| SimError::not_found("instance", id))?;
        Ok(SimInstance::new(self.clone(), id.to_string(), record))
    }
}

#[async_trait]
impl CloudResource for SimInstance {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Instance
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.record.name
    }

    fn status(&self) -> ResourceStatus {
        self.record.status
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.record.created_at)
    }

    async fn refresh(&mut self) -> Result<()> {
        self.record = self.cloud.lock().refresh_instance(&self.id)?;
        Ok(())
    }
}

#[async_trait]
impl Deletable for SimInstance {
    async fn request_delete(&self) -> Result<()> {
        self.cloud
            .lock()
            .instance_request(Op::Delete, &self.id, "delete", |record, delay| {
                match record.status {
                    ResourceStatus::Stopped | ResourceStatus::Error => {
                        record.status = ResourceStatus::Deleting;
                        record.pending = schedule(delay, Change::Remove);
                        Ok(())
                    }
                    other => Err(conflict(&self.id, other, "delete")),
                }
            })?;
        tracing::debug!("Instance {} deleting", self.id);
        Ok(())
    }
}

#[async_trait]
impl VirtualMachine for SimInstance {
    async fn request_start(&self) -> Result<()> {
        self.cloud
            .lock()
            .instance_request(Op::Start, &self.id, "start", |record, delay| {
                match record.status {
                    ResourceStatus::Stopped => {
                        record.status = ResourceStatus::Starting;
                        record.pending = schedule(delay, Change::Status(ResourceStatus::Running));
                        Ok(())
                    }
                    ResourceStatus::Running => Err(SimError::AlreadyInState {
                        resource: self.id.clone(),
                        status: ResourceStatus::Running,
                    }),
                    other => Err(conflict(&self.id, other, "start")),
                }
            })?;
        Ok(())
    }

    async fn request_stop(&self, force: bool) -> Result<()> {
        self.cloud
            .lock()
            .instance_request(Op::Stop, &self.id, "stop", |record, delay| {
                match record.status {
                    ResourceStatus::Running => {}
                    ResourceStatus::Starting | ResourceStatus::Error if force => {}
                    ResourceStatus::Stopped => {
                        return Err(SimError::AlreadyInState {
                            resource: self.id.clone(),
                            status: ResourceStatus::Stopped,
                        });
                    }
                    other => return Err(conflict(&self.id, other, "stop")),
                }
                record.status = ResourceStatus::Stopping;
                record.pending = schedule(delay, Change::Status(ResourceStatus::Stopped));
                Ok(())
            })?;
        Ok(())
    }

    async fn request_change_config(&self, instance_type: &str) -> Result<()> {
        let mut world = self.cloud.lock();
        if world.sold_out.contains(instance_type) {
            world.begin(Op::ChangeConfig)?;
            return Err(SimError::SoldOut(instance_type.to_string()).into());
        }
        // The status never leaves "stopped"; the new type shows on the next refresh.
        world.instance_request(Op::ChangeConfig, &self.id, "change config", |record, _| {
            if record.status != ResourceStatus::Stopped {
                return Err(conflict(&self.id, record.status, "change config"));
            }
            record.pending = schedule(1, Change::Resize(instance_type.to_string()));
            Ok(())
        })?;
        Ok(())
    }

    async fn request_rebuild_root(&self, image_id: &str) -> Result<String> {
        let mut world = self.cloud.lock();
        let disk_id = world.next_id("disk");
        world.instance_request(Op::RebuildRoot, &self.id, "rebuild root", |record, _| {
            match record.status {
                ResourceStatus::Stopped | ResourceStatus::Running => Ok(()),
                other => Err(conflict(&self.id, other, "rebuild root")),
            }
        })?;

        let instance_id = self.id.clone();
        let image_id = image_id.to_string();
        let job_id = world.submit_job(COMPUTE_SERVICE, |world, job_id| {
            world.disks.insert(disk_id.clone());
            if let Some(record) = world.instances.get_mut(&instance_id) {
                match record.disks.first_mut() {
                    Some(root) => *root = disk_id.clone(),
                    None => record.disks.push(disk_id.clone()),
                }
            }
            tracing::debug!("Rebuilt root of {} from {}", instance_id, image_id);
            AsyncJob::new(job_id, JobStatus::Success).with_entity("disk_id", disk_id)
        });
        Ok(job_id)
    }

    async fn request_create_image(&self, image_name: &str) -> Result<String> {
        let mut world = self.cloud.lock();
        world.begin(Op::CreateImage)?;
        if !world.instances.contains_key(&self.id) {
            return Err(SimError::not_found("instance", &self.id).into());
        }
        let image_name = image_name.to_string();
        let job_id = world.submit_job(IMAGE_SERVICE, |world, job_id| {
            let image_id = world.next_id("img");
            world.images.insert(image_id.clone(), image_name);
            AsyncJob::new(job_id, JobStatus::Success).with_entity("image_id", image_id)
        });
        Ok(job_id)
    }

    fn disk_ids(&self) -> Vec<String> {
        self.record.disks.clone()
    }

    async fn request_attach_disk(&self, disk_id: &str) -> Result<()> {
        let mut world = self.cloud.lock();
        if !world.disks.contains(disk_id) {
            world.begin(Op::AttachDisk)?;
            return Err(SimError::not_found("disk", disk_id).into());
        }
        let in_use = world
            .instances
            .iter()
            .any(|(id, i)| *id != self.id && i.disks.iter().any(|d| d == disk_id));
        world.instance_request(Op::AttachDisk, &self.id, "attach disk", |record, delay| {
            if in_use {
                return Err(SimError::InvalidRequest(format!(
                    "disk {} is attached elsewhere",
                    disk_id
                )));
            }
            record.pending = schedule(delay, Change::AttachDisk(disk_id.to_string()));
            Ok(())
        })?;
        Ok(())
    }

    async fn request_detach_disk(&self, disk_id: &str) -> Result<()> {
        self.cloud
            .lock()
            .instance_request(Op::DetachDisk, &self.id, "detach disk", |record, delay| {
                if !record.disks.iter().any(|d| d == disk_id) {
                    return Err(SimError::not_found("attached disk", disk_id));
                }
                record.pending = schedule(delay, Change::DetachDisk(disk_id.to_string()));
                Ok(())
            })?;
        Ok(())
    }

    fn security_group_ids(&self) -> Vec<String> {
        self.record.security_groups.clone()
    }

    async fn assign_security_group(&self, secgroup_id: &str) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::AssignSecurityGroup)?;
        if !world.security_groups.contains_key(secgroup_id) {
            return Err(SimError::not_found("security group", secgroup_id).into());
        }
        let record = world.instance_mut(&self.id)?;
        if !record.security_groups.iter().any(|g| g == secgroup_id) {
            record.security_groups.push(secgroup_id.to_string());
        }
        Ok(())
    }

    async fn unassign_security_group(&self, secgroup_id: &str) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::UnassignSecurityGroup)?;
        let record = world.instance_mut(&self.id)?;
        if record.security_groups.iter().all(|g| g == secgroup_id) {
            return Err(SimError::InvalidRequest(format!(
                "instance {} must keep at least one security group",
                self.id
            ))
            .into());
        }
        record.security_groups.retain(|g| g != secgroup_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{InstanceSpec, Timing};
    use cloudweave_cloud::{ErrorKind, SecurityGroupInfo};

    fn cloud(status: ResourceStatus) -> SimCloud {
        let cloud = SimCloud::with_timing(Timing {
            transition_refreshes: 2,
            job_polls: 0,
        });
        let spec = InstanceSpec {
            name: "web".into(),
            host_id: "host-1".into(),
            instance_type: "s1.small".into(),
            security_groups: vec!["sg-1".into()],
        };
        cloud.add_instance("i-1", &spec, status, vec!["10.0.0.5".into()], vec!["disk-1".into()]);
        cloud
    }

    #[tokio::test]
    async fn test_start_settles_after_refreshes() {
        let cloud = cloud(ResourceStatus::Stopped);
        let mut vm = cloud.instance("i-1").unwrap();
        vm.request_start().await.unwrap();

        vm.refresh().await.unwrap();
        assert_eq!(vm.status(), ResourceStatus::Starting);
        vm.refresh().await.unwrap();
        assert_eq!(vm.status(), ResourceStatus::Running);
    }

    #[tokio::test]
    async fn test_requests_while_busy_conflict() {
        let cloud = cloud(ResourceStatus::Stopped);
        let vm = cloud.instance("i-1").unwrap();
        vm.request_start().await.unwrap();
        let err = vm.request_start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);
    }

    #[tokio::test]
    async fn test_start_running_instance_is_already_in_state() {
        let cloud = cloud(ResourceStatus::Running);
        let vm = cloud.instance("i-1").unwrap();
        let err = vm.request_start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyInState);
    }

    #[tokio::test]
    async fn test_sold_out_type_is_rejected() {
        let cloud = cloud(ResourceStatus::Stopped);
        cloud.mark_sold_out("s1.large");
        let vm = cloud.instance("i-1").unwrap();
        let err = vm.request_change_config("s1.large").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(cloud.calls(Op::ChangeConfig), 1);
    }

    #[tokio::test]
    async fn test_last_security_group_cannot_be_removed() {
        let cloud = cloud(ResourceStatus::Running);
        cloud.add_security_group(
            SecurityGroupInfo {
                id: "sg-2".into(),
                name: "web".into(),
                vpc_id: Some("vpc-1".into()),
                description: String::new(),
            },
            Vec::new(),
        );
        let mut vm = cloud.instance("i-1").unwrap();
        assert!(vm.unassign_security_group("sg-1").await.is_err());

        vm.assign_security_group("sg-2").await.unwrap();
        vm.unassign_security_group("sg-1").await.unwrap();
        vm.refresh().await.unwrap();
        assert_eq!(vm.security_group_ids(), vec!["sg-2".to_string()]);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_root_disk() {
        let cloud = cloud(ResourceStatus::Stopped);
        let mut vm = cloud.instance("i-1").unwrap();
        let job_id = vm.request_rebuild_root("img-1").await.unwrap();
        assert!(job_id.starts_with("job-"));
        vm.refresh().await.unwrap();
        assert_ne!(vm.disk_ids(), vec!["disk-1".to_string()]);
    }
}
