//! Resource model and capability traits
//!
//! Every provider-specific resource maps its native status into
//! [`ResourceStatus`] and exposes the capability traits it supports.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instance,
    Disk,
    Eip,
    SecurityGroup,
    NatGateway,
    LoadBalancer,
    Image,
    Vpc,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Instance => write!(f, "instance"),
            ResourceKind::Disk => write!(f, "disk"),
            ResourceKind::Eip => write!(f, "eip"),
            ResourceKind::SecurityGroup => write!(f, "security-group"),
            ResourceKind::NatGateway => write!(f, "nat-gateway"),
            ResourceKind::LoadBalancer => write!(f, "load-balancer"),
            ResourceKind::Image => write!(f, "image"),
            ResourceKind::Vpc => write!(f, "vpc"),
        }
    }
}

/// Platform-neutral status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Being provisioned
    Allocating,
    /// Provisioned and idle (EIPs, disks)
    Ready,
    /// Serving (gateways, load balancers)
    Available,
    Starting,
    Running,
    Stopping,
    Stopped,
    Associating,
    Dissociating,
    Deleting,
    Deleted,
    Error,
    Unknown,
}

impl ResourceStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Allocating => "allocating",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Available => "available",
            ResourceStatus::Starting => "starting",
            ResourceStatus::Running => "running",
            ResourceStatus::Stopping => "stopping",
            ResourceStatus::Stopped => "stopped",
            ResourceStatus::Associating => "associating",
            ResourceStatus::Dissociating => "dissociating",
            ResourceStatus::Deleting => "deleting",
            ResourceStatus::Deleted => "deleted",
            ResourceStatus::Error => "error",
            ResourceStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = std::convert::Infallible;

    /// Unrecognized values map to `Unknown`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let status = match s.to_ascii_lowercase().as_str() {
            "allocating" => ResourceStatus::Allocating,
            "ready" => ResourceStatus::Ready,
            "available" => ResourceStatus::Available,
            "starting" => ResourceStatus::Starting,
            "running" => ResourceStatus::Running,
            "stopping" => ResourceStatus::Stopping,
            "stopped" => ResourceStatus::Stopped,
            "associating" => ResourceStatus::Associating,
            "dissociating" => ResourceStatus::Dissociating,
            "deleting" => ResourceStatus::Deleting,
            "deleted" => ResourceStatus::Deleted,
            "error" => ResourceStatus::Error,
            _ => ResourceStatus::Unknown,
        };
        Ok(status)
    }
}

/// A remote resource as seen by the engine
///
/// `refresh` re-reads remote state into the local value. It must be
/// idempotent and must never change `id`. A resource that disappeared
/// remotely reports `CloudError::NotFound`.
#[async_trait]
pub trait CloudResource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Provider-unique id
    fn id(&self) -> &str;

    /// Platform-unique id
    fn global_id(&self) -> &str {
        self.id()
    }

    fn name(&self) -> &str;

    fn status(&self) -> ResourceStatus;

    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    async fn refresh(&mut self) -> Result<()>;
}

/// Resources that can be deleted remotely
#[async_trait]
pub trait Deletable: CloudResource {
    async fn request_delete(&self) -> Result<()>;
}

/// Compute instance
///
/// The `request_*` methods only send the transition; driving the resource to
/// the resulting state is the job of [`crate::lifecycle`].
#[async_trait]
pub trait VirtualMachine: Deletable {
    async fn request_start(&self) -> Result<()>;

    async fn request_stop(&self, force: bool) -> Result<()>;

    async fn request_change_config(&self, instance_type: &str) -> Result<()>;

    /// Returns the provider job id
    async fn request_rebuild_root(&self, image_id: &str) -> Result<String>;

    /// Returns the provider job id
    async fn request_create_image(&self, image_name: &str) -> Result<String>;

    fn disk_ids(&self) -> Vec<String>;

    async fn request_attach_disk(&self, disk_id: &str) -> Result<()>;

    async fn request_detach_disk(&self, disk_id: &str) -> Result<()>;

    fn security_group_ids(&self) -> Vec<String>;

    async fn assign_security_group(&self, secgroup_id: &str) -> Result<()>;

    async fn unassign_security_group(&self, secgroup_id: &str) -> Result<()>;
}

/// Elastic (public) IP address
#[async_trait]
pub trait ElasticIp: Deletable {
    fn ip_addr(&self) -> &str;

    fn associated_instance_id(&self) -> Option<&str>;

    async fn request_associate(&self, instance_id: &str) -> Result<()>;

    async fn request_dissociate(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            ResourceStatus::Running,
            ResourceStatus::Stopped,
            ResourceStatus::Allocating,
            ResourceStatus::Deleting,
        ] {
            assert_eq!(status.as_str().parse::<ResourceStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_text() {
        assert_eq!(
            "SHUTOFF".parse::<ResourceStatus>().unwrap(),
            ResourceStatus::Unknown
        );
        assert_eq!(
            "RUNNING".parse::<ResourceStatus>().unwrap(),
            ResourceStatus::Running
        );
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ResourceStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
        let kind: ResourceKind = serde_json::from_str("\"nat_gateway\"").unwrap();
        assert_eq!(kind, ResourceKind::NatGateway);
    }
}
