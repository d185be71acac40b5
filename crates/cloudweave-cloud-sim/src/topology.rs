//! Simulated topology listings

use crate::error::SimError;
use crate::world::{Op, SimCloud, World};
use async_trait::async_trait;
use cloudweave_cloud::{
    BackendInfo, Cidr, HostInfo, InstanceInfo, RegionInfo, Result, StorageInfo, TopologySource,
    VpcInfo, WireInfo, ZoneInfo,
};

#[derive(Debug, Clone)]
pub struct SimTopology {
    cloud: SimCloud,
}

impl SimCloud {
    pub fn topology(&self) -> SimTopology {
        SimTopology {
            cloud: self.clone(),
        }
    }
}

/// Children of `parent_id` in a parent-keyed table
fn children<T: Clone>(table: &[(String, T)], parent_id: &str) -> Vec<T> {
    table
        .iter()
        .filter(|(parent, _)| parent == parent_id)
        .map(|(_, child)| child.clone())
        .collect()
}

impl SimTopology {
    fn list<T>(&self, f: impl FnOnce(&World) -> T) -> Result<T> {
        let mut world = self.cloud.lock();
        world.begin(Op::ListTopology)?;
        Ok(f(&*world))
    }
}

#[async_trait]
impl TopologySource for SimTopology {
    async fn get_region(&self, region_id: &str) -> Result<RegionInfo> {
        self.list(|world| world.regions.get(region_id).cloned())?
            .ok_or_else(|| SimError::not_found("region", region_id).into())
    }

    async fn list_zones(&self, region_id: &str) -> Result<Vec<ZoneInfo>> {
        self.list(|world| children(&world.zones, region_id))
    }

    async fn list_vpcs(&self, region_id: &str) -> Result<Vec<VpcInfo>> {
        self.list(|world| children(&world.vpcs, region_id))
    }

    async fn list_wires(&self, vpc_id: &str) -> Result<Vec<WireInfo>> {
        self.list(|world| children(&world.wires, vpc_id))
    }

    async fn list_hosts(&self, zone_id: &str) -> Result<Vec<HostInfo>> {
        self.list(|world| children(&world.hosts, zone_id))
    }

    async fn list_storages(&self, zone_id: &str) -> Result<Vec<StorageInfo>> {
        self.list(|world| children(&world.storages, zone_id))
    }

    async fn list_instances(&self, host_id: &str) -> Result<Vec<InstanceInfo>> {
        self.list(|world| {
            world
                .instances
                .iter()
                .filter(|(_, record)| record.host_id == host_id)
                .map(|(id, record)| InstanceInfo {
                    id: id.clone(),
                    name: record.name.clone(),
                    host_id: record.host_id.clone(),
                    ips: record.ips.clone(),
                })
                .collect()
        })
    }

    async fn list_load_balancer_backends(&self, lb_id: &str) -> Result<Vec<BackendInfo>> {
        self.list(|world| world.backends.get(lb_id).cloned())?
            .ok_or_else(|| SimError::not_found("load balancer", lb_id).into())
    }

    async fn create_vpc(&self, region_id: &str, name: &str, cidr: &str) -> Result<VpcInfo> {
        let cidr: Cidr = cidr.parse()?;
        let mut world = self.cloud.lock();
        world.begin(Op::CreateVpc)?;
        if !world.regions.contains_key(region_id) {
            return Err(SimError::not_found("region", region_id).into());
        }
        let vpc = VpcInfo {
            id: world.next_id("vpc"),
            name: name.to_string(),
            cidr: cidr.to_string(),
        };
        world.vpcs.push((region_id.to_string(), vpc.clone()));
        tracing::debug!("Simulated VPC {} ({}) created", vpc.id, vpc.cidr);
        Ok(vpc)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::DeleteVpc)?;
        if !world.vpcs.iter().any(|(_, vpc)| vpc.id == vpc_id) {
            return Err(SimError::not_found("vpc", vpc_id).into());
        }
        if world.wires.iter().any(|(parent, _)| parent == vpc_id) {
            return Err(SimError::InvalidRequest(format!("vpc {} still has wires", vpc_id)).into());
        }
        world.vpcs.retain(|(_, vpc)| vpc.id != vpc_id);
        Ok(())
    }
}
