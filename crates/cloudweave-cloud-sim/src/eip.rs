//! Simulated elastic IPs

use crate::error::SimError;
use crate::world::{Change, EipRecord, Op, SimCloud, conflict, schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudweave_cloud::{CloudResource, Deletable, ElasticIp, ResourceKind, ResourceStatus, Result};

#[derive(Debug, Clone)]
pub struct SimEip {
    cloud: SimCloud,
    id: String,
    record: EipRecord,
}

impl SimCloud {
    pub fn eip(&self, id: &str) -> Result<SimEip> {
        let record = self
            .lock()
            .eips
            .get(id)
            .cloned()
            .ok_or_else(|| SimError::not_found("eip", id))?;
        Ok(SimEip {
            cloud: self.clone(),
            id: id.to_string(),
            record,
        })
    }

    /// Allocate a new address. It reports `allocating` until it settles.
    pub async fn allocate_eip(&self) -> Result<SimEip> {
        let id = self.lock().allocate_eip()?;
        tracing::debug!("Allocated simulated EIP {}", id);
        self.eip(&id)
    }
}

#[async_trait]
impl CloudResource for SimEip {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Eip
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.record.ip
    }

    fn status(&self) -> ResourceStatus {
        self.record.status
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.record.created_at)
    }

    async fn refresh(&mut self) -> Result<()> {
        self.record = self.cloud.lock().refresh_eip(&self.id)?;
        Ok(())
    }
}

#[async_trait]
impl Deletable for SimEip {
    async fn request_delete(&self) -> Result<()> {
        self.cloud
            .lock()
            .eip_request(Op::Delete, &self.id, "delete", |record, delay| {
                if record.instance_id.is_some() {
                    return Err(conflict(&self.id, ResourceStatus::Associating, "delete"));
                }
                match record.status {
                    ResourceStatus::Ready | ResourceStatus::Error => {
                        record.status = ResourceStatus::Deleting;
                        record.pending = schedule(delay, Change::Remove);
                        Ok(())
                    }
                    other => Err(conflict(&self.id, other, "delete")),
                }
            })?;
        Ok(())
    }
}

#[async_trait]
impl ElasticIp for SimEip {
    fn ip_addr(&self) -> &str {
        &self.record.ip
    }

    fn associated_instance_id(&self) -> Option<&str> {
        self.record.instance_id.as_deref()
    }

    async fn request_associate(&self, instance_id: &str) -> Result<()> {
        let mut world = self.cloud.lock();
        let known = world.instances.contains_key(instance_id);
        world.eip_request(Op::Associate, &self.id, "associate", |record, delay| {
            if !known {
                return Err(SimError::not_found("instance", instance_id));
            }
            if record.status != ResourceStatus::Ready || record.instance_id.is_some() {
                return Err(conflict(&self.id, record.status, "associate"));
            }
            // The target is visible while the association is in flight
            record.status = ResourceStatus::Associating;
            record.instance_id = Some(instance_id.to_string());
            record.pending = schedule(delay, Change::Associate(instance_id.to_string()));
            Ok(())
        })?;
        Ok(())
    }

    async fn request_dissociate(&self) -> Result<()> {
        self.cloud
            .lock()
            .eip_request(Op::Dissociate, &self.id, "dissociate", |record, delay| {
                if record.instance_id.is_none() {
                    return Err(SimError::AlreadyInState {
                        resource: self.id.clone(),
                        status: record.status,
                    });
                }
                record.status = ResourceStatus::Dissociating;
                record.pending = schedule(delay, Change::Dissociate);
                Ok(())
            })?;
        Ok(())
    }
}
