//! Declarative description of a simulated cloud
//!
//! ```yaml
//! timing:
//!   transition_refreshes: 2
//! regions:
//!   - id: north-1
//!     name: North
//!     zones:
//!       - id: north-1a
//!         name: A
//!         hosts:
//!           - id: host-1
//!             name: h1
//!             instances:
//!               - id: i-web
//!                 name: web
//!                 instance_type: s1.small
//!                 status: running
//! security_groups:
//!   - id: sg-web
//!     name: web
//!     vpc_id: vpc-main
//!     rules: ["in:allow tcp 22 0.0.0.0/0"]
//! ```

use crate::error::{Result, SimError};
use crate::world::{InstanceSpec, SimCloud, Timing};
use cloudweave_cloud::{
    AclEntry, BackendInfo, HostInfo, ResourceStatus, SecurityGroupInfo, SecurityRule, StorageInfo,
    VpcInfo, WireInfo, ZoneInfo,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimSeed {
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub regions: Vec<RegionSeed>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupSeed>,
    #[serde(default)]
    pub eips: Vec<EipSeed>,
    #[serde(default)]
    pub nat_gateways: Vec<NatGatewaySeed>,
    #[serde(default)]
    pub disks: Vec<String>,
    /// Load balancer id to its backends
    #[serde(default)]
    pub load_balancers: BTreeMap<String, Vec<BackendInfo>>,
    #[serde(default)]
    pub acls: BTreeMap<String, Vec<AclEntry>>,
    #[serde(default)]
    pub sold_out: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub zones: Vec<ZoneSeed>,
    #[serde(default)]
    pub vpcs: Vec<VpcSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<HostSeed>,
    #[serde(default)]
    pub storages: Vec<StorageInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub instances: Vec<InstanceSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSeed {
    pub id: String,
    pub name: String,
    pub instance_type: String,
    #[serde(default = "default_instance_status")]
    pub status: ResourceStatus,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub disks: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
}

fn default_instance_status() -> ResourceStatus {
    ResourceStatus::Running
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcSeed {
    pub id: String,
    pub name: String,
    pub cidr: String,
    /// Wires of the VPC; each names its zone
    #[serde(default)]
    pub wires: Vec<WireInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Rules in text form, e.g. `in:allow tcp 22 0.0.0.0/0`
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EipSeed {
    pub id: String,
    pub ip: String,
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatGatewaySeed {
    pub id: String,
    pub name: String,
}

impl SimSeed {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

impl SimCloud {
    /// Build a world from a seed. Rule text is validated before anything
    /// is created.
    pub fn from_seed(seed: &SimSeed) -> Result<Self> {
        let mut groups = Vec::with_capacity(seed.security_groups.len());
        for group in &seed.security_groups {
            let rules = group
                .rules
                .iter()
                .map(|text| text.parse::<SecurityRule>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    SimError::InvalidRequest(format!("security group {}: {}", group.id, e))
                })?;
            let info = SecurityGroupInfo {
                id: group.id.clone(),
                name: group.name.clone(),
                vpc_id: group.vpc_id.clone(),
                description: group.description.clone(),
            };
            groups.push((info, rules));
        }

        let cloud = SimCloud::with_timing(seed.timing);
        for region in &seed.regions {
            cloud.add_region(&region.id, &region.name);
            for zone in &region.zones {
                cloud.add_zone(
                    &region.id,
                    ZoneInfo {
                        id: zone.id.clone(),
                        name: zone.name.clone(),
                    },
                );
                for storage in &zone.storages {
                    cloud.add_storage(&zone.id, storage.clone());
                }
                for host in &zone.hosts {
                    cloud.add_host(
                        &zone.id,
                        HostInfo {
                            id: host.id.clone(),
                            name: host.name.clone(),
                        },
                    );
                    for instance in &host.instances {
                        let spec = InstanceSpec {
                            name: instance.name.clone(),
                            host_id: host.id.clone(),
                            instance_type: instance.instance_type.clone(),
                            security_groups: instance.security_groups.clone(),
                        };
                        cloud.add_instance(
                            &instance.id,
                            &spec,
                            instance.status,
                            instance.ips.clone(),
                            instance.disks.clone(),
                        );
                    }
                }
            }
            for vpc in &region.vpcs {
                cloud.add_vpc(
                    &region.id,
                    VpcInfo {
                        id: vpc.id.clone(),
                        name: vpc.name.clone(),
                        cidr: vpc.cidr.clone(),
                    },
                );
                for wire in &vpc.wires {
                    cloud.add_wire(&vpc.id, wire.clone());
                }
            }
        }

        for (info, rules) in groups {
            cloud.add_security_group(info, rules);
        }
        for eip in &seed.eips {
            cloud.add_eip(&eip.id, &eip.ip, eip.instance_id.clone());
        }
        for gateway in &seed.nat_gateways {
            cloud.add_nat_gateway(&gateway.id, &gateway.name);
        }
        for disk in &seed.disks {
            cloud.add_disk(disk);
        }
        for (lb_id, backends) in &seed.load_balancers {
            for backend in backends {
                cloud.add_backend(lb_id, backend.clone());
            }
        }
        for (acl_id, entries) in &seed.acls {
            cloud.add_acl(acl_id, entries.clone());
        }
        for instance_type in &seed.sold_out {
            cloud.mark_sold_out(instance_type);
        }
        Ok(cloud)
    }
}
