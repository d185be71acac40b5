//! Resource graph composition
//!
//! A region owns its zones and VPCs, a zone its hosts and storages, a VPC its
//! wires. Child lists are fetched from the provider on first access and
//! cached in the parent until something invalidates them. Children keep
//! weak back-references to their parent for lookups only.

use crate::error::{CloudError, Result, ResultExt};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};

/// Lazily populated child list.
///
/// The lock is held while the list is fetched, so concurrent first accesses
/// trigger exactly one fetch.
pub struct ChildCache<T> {
    slot: Mutex<Option<Vec<T>>>,
}

impl<T: Clone> ChildCache<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Vec<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(items) = slot.as_ref() {
            return Ok(items.clone());
        }
        let items = fetch().await?;
        *slot = Some(items.clone());
        Ok(items)
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    pub async fn is_cached(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

impl<T: Clone> Default for ChildCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcInfo {
    pub id: String,
    pub name: String,
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireInfo {
    pub id: String,
    pub name: String,
    pub zone_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub id: String,
    pub name: String,
    pub storage_type: String,
}

/// Instance as listed on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub host_id: String,
    #[serde(default)]
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub id: String,
    pub instance_id: String,
    pub port: u16,
    pub weight: u32,
}

/// Topology listing, implemented by providers
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn get_region(&self, region_id: &str) -> Result<RegionInfo>;

    async fn list_zones(&self, region_id: &str) -> Result<Vec<ZoneInfo>>;

    async fn list_vpcs(&self, region_id: &str) -> Result<Vec<VpcInfo>>;

    async fn list_wires(&self, vpc_id: &str) -> Result<Vec<WireInfo>>;

    async fn list_hosts(&self, zone_id: &str) -> Result<Vec<HostInfo>>;

    async fn list_storages(&self, zone_id: &str) -> Result<Vec<StorageInfo>>;

    async fn list_instances(&self, host_id: &str) -> Result<Vec<InstanceInfo>>;

    async fn list_load_balancer_backends(&self, lb_id: &str) -> Result<Vec<BackendInfo>>;

    async fn create_vpc(&self, region_id: &str, name: &str, cidr: &str) -> Result<VpcInfo>;

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;
}

fn find_by_id<T, F>(items: Vec<Arc<T>>, id: &str, kind: &str, item_id: F) -> Result<Arc<T>>
where
    F: Fn(&T) -> &str,
{
    items
        .into_iter()
        .find(|item| item_id(&**item) == id)
        .ok_or_else(|| CloudError::NotFound(format!("{} {}", kind, id)))
}

fn upgrade<T>(parent: &Weak<T>, what: &str) -> Result<Arc<T>> {
    parent
        .upgrade()
        .ok_or_else(|| CloudError::NotFound(format!("{} was dropped", what)))
}

pub struct Region {
    id: String,
    info: RwLock<RegionInfo>,
    source: Arc<dyn TopologySource>,
    me: Weak<Region>,
    zones: ChildCache<Arc<Zone>>,
    vpcs: ChildCache<Arc<Vpc>>,
}

impl Region {
    pub fn new(info: RegionInfo, source: Arc<dyn TopologySource>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: info.id.clone(),
            info: RwLock::new(info),
            source,
            me: me.clone(),
            zones: ChildCache::new(),
            vpcs: ChildCache::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn info(&self) -> RegionInfo {
        self.info.read().await.clone()
    }

    /// Re-read the region's own attributes. Child caches are kept.
    pub async fn refresh(&self) -> Result<()> {
        let info = self
            .source
            .get_region(&self.id)
            .await
            .with_context(|| format!("GetRegion({})", self.id))?;
        *self.info.write().await = info;
        Ok(())
    }

    /// Drop every cached child list, recursively
    pub async fn invalidate_children(&self) {
        if let Ok(zones) = self.cached_zones().await {
            for zone in zones {
                zone.invalidate_children().await;
            }
        }
        if let Ok(vpcs) = self.cached_vpcs().await {
            for vpc in vpcs {
                vpc.invalidate_children().await;
            }
        }
        self.zones.invalidate().await;
        self.vpcs.invalidate().await;
    }

    async fn cached_zones(&self) -> Result<Vec<Arc<Zone>>> {
        if self.zones.is_cached().await {
            self.zones().await
        } else {
            Ok(Vec::new())
        }
    }

    async fn cached_vpcs(&self) -> Result<Vec<Arc<Vpc>>> {
        if self.vpcs.is_cached().await {
            self.vpcs().await
        } else {
            Ok(Vec::new())
        }
    }

    pub async fn zones(&self) -> Result<Vec<Arc<Zone>>> {
        self.zones
            .get_or_fetch(|| async {
                tracing::debug!("Fetching zones of region {}", self.id);
                let zones = self
                    .source
                    .list_zones(&self.id)
                    .await
                    .with_context(|| format!("ListZones({})", self.id))?;
                Ok(zones
                    .into_iter()
                    .map(|info| Zone::new(info, self.me.clone(), self.source.clone()))
                    .collect())
            })
            .await
    }

    pub async fn zone_by_id(&self, zone_id: &str) -> Result<Arc<Zone>> {
        find_by_id(self.zones().await?, zone_id, "zone", Zone::id)
    }

    pub async fn vpcs(&self) -> Result<Vec<Arc<Vpc>>> {
        self.vpcs
            .get_or_fetch(|| async {
                tracing::debug!("Fetching VPCs of region {}", self.id);
                let vpcs = self
                    .source
                    .list_vpcs(&self.id)
                    .await
                    .with_context(|| format!("ListVpcs({})", self.id))?;
                Ok(vpcs
                    .into_iter()
                    .map(|info| Vpc::new(info, self.me.clone(), self.source.clone()))
                    .collect())
            })
            .await
    }

    pub async fn vpc_by_id(&self, vpc_id: &str) -> Result<Arc<Vpc>> {
        find_by_id(self.vpcs().await?, vpc_id, "vpc", Vpc::id)
    }

    pub async fn create_vpc(&self, name: &str, cidr: &str) -> Result<Arc<Vpc>> {
        let info = self
            .source
            .create_vpc(&self.id, name, cidr)
            .await
            .with_context(|| format!("CreateVpc({})", name))?;
        self.vpcs.invalidate().await;
        tracing::info!("Created VPC {} ({}) in {}", info.name, info.id, self.id);
        self.vpc_by_id(&info.id).await
    }

    pub async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        self.source
            .delete_vpc(vpc_id)
            .await
            .with_context(|| format!("DeleteVpc({})", vpc_id))?;
        self.vpcs.invalidate().await;
        tracing::info!("Deleted VPC {} in {}", vpc_id, self.id);
        Ok(())
    }

    /// Hosts of every zone
    pub async fn hosts(&self) -> Result<Vec<Arc<Host>>> {
        let zones = self.zones().await?;
        let per_zone = try_join_all(zones.iter().map(|zone| zone.hosts())).await?;
        Ok(per_zone.into_iter().flatten().collect())
    }

    pub async fn host_by_id(&self, host_id: &str) -> Result<Arc<Host>> {
        for zone in self.zones().await? {
            match zone.host_by_id(host_id).await {
                Ok(host) => return Ok(host),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CloudError::NotFound(format!("host {}", host_id)))
    }

    /// Storages of every zone
    pub async fn storages(&self) -> Result<Vec<Arc<Storage>>> {
        let zones = self.zones().await?;
        let per_zone = try_join_all(zones.iter().map(|zone| zone.storages())).await?;
        Ok(per_zone.into_iter().flatten().collect())
    }

    pub async fn storage_by_id(&self, storage_id: &str) -> Result<Arc<Storage>> {
        find_by_id(self.storages().await?, storage_id, "storage", Storage::id)
    }

    /// Instances of every host. Instance lists are not cached.
    async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        let hosts = self.hosts().await?;
        let per_host = try_join_all(hosts.iter().map(|host| host.instances())).await?;
        Ok(per_host.into_iter().flatten().collect())
    }

    pub async fn find_instance(&self, instance_id: &str) -> Result<InstanceInfo> {
        self.instances()
            .await?
            .into_iter()
            .find(|vm| vm.id == instance_id)
            .ok_or_else(|| CloudError::NotFound(format!("instance {}", instance_id)))
    }

    /// The instance holding `ip`
    pub async fn find_ip_owner(&self, ip: &str) -> Result<InstanceInfo> {
        let mut owners: Vec<InstanceInfo> = self
            .instances()
            .await?
            .into_iter()
            .filter(|vm| vm.ips.iter().any(|addr| addr == ip))
            .collect();
        match owners.len() {
            0 => Err(CloudError::NotFound(format!("owner of {}", ip))),
            1 => Ok(owners.remove(0)),
            n => Err(CloudError::AmbiguousResult(format!(
                "{} instances claim {}",
                n, ip
            ))),
        }
    }

    /// Backends of a load balancer, each resolved to a known instance
    pub async fn load_balancer_backends(&self, lb_id: &str) -> Result<Vec<(BackendInfo, InstanceInfo)>> {
        let backends = self
            .source
            .list_load_balancer_backends(lb_id)
            .await
            .with_context(|| format!("ListBackends({})", lb_id))?;
        let instances = self.instances().await?;

        backends
            .into_iter()
            .map(|backend| {
                let vm = instances
                    .iter()
                    .find(|vm| vm.id == backend.instance_id)
                    .cloned()
                    .ok_or_else(|| {
                        CloudError::NotFound(format!(
                            "instance {} behind {}",
                            backend.instance_id, lb_id
                        ))
                    })?;
                Ok((backend, vm))
            })
            .collect()
    }
}

pub struct Zone {
    info: ZoneInfo,
    region: Weak<Region>,
    source: Arc<dyn TopologySource>,
    me: Weak<Zone>,
    hosts: ChildCache<Arc<Host>>,
    storages: ChildCache<Arc<Storage>>,
}

impl Zone {
    fn new(info: ZoneInfo, region: Weak<Region>, source: Arc<dyn TopologySource>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            info,
            region,
            source,
            me: me.clone(),
            hosts: ChildCache::new(),
            storages: ChildCache::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &ZoneInfo {
        &self.info
    }

    pub fn region(&self) -> Result<Arc<Region>> {
        upgrade(&self.region, "region")
    }

    pub async fn invalidate_children(&self) {
        self.hosts.invalidate().await;
        self.storages.invalidate().await;
    }

    pub async fn hosts(&self) -> Result<Vec<Arc<Host>>> {
        self.hosts
            .get_or_fetch(|| async {
                tracing::debug!("Fetching hosts of zone {}", self.info.id);
                let hosts = self
                    .source
                    .list_hosts(&self.info.id)
                    .await
                    .with_context(|| format!("ListHosts({})", self.info.id))?;
                Ok(hosts
                    .into_iter()
                    .map(|info| {
                        Arc::new(Host {
                            info,
                            zone: self.me.clone(),
                            source: self.source.clone(),
                        })
                    })
                    .collect())
            })
            .await
    }

    pub async fn host_by_id(&self, host_id: &str) -> Result<Arc<Host>> {
        find_by_id(self.hosts().await?, host_id, "host", Host::id)
    }

    pub async fn storages(&self) -> Result<Vec<Arc<Storage>>> {
        self.storages
            .get_or_fetch(|| async {
                tracing::debug!("Fetching storages of zone {}", self.info.id);
                let storages = self
                    .source
                    .list_storages(&self.info.id)
                    .await
                    .with_context(|| format!("ListStorages({})", self.info.id))?;
                Ok(storages
                    .into_iter()
                    .map(|info| {
                        Arc::new(Storage {
                            info,
                            zone: self.me.clone(),
                        })
                    })
                    .collect())
            })
            .await
    }

    pub async fn storage_by_id(&self, storage_id: &str) -> Result<Arc<Storage>> {
        find_by_id(self.storages().await?, storage_id, "storage", Storage::id)
    }
}

pub struct Vpc {
    info: VpcInfo,
    region: Weak<Region>,
    source: Arc<dyn TopologySource>,
    me: Weak<Vpc>,
    wires: ChildCache<Arc<Wire>>,
}

impl Vpc {
    fn new(info: VpcInfo, region: Weak<Region>, source: Arc<dyn TopologySource>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            info,
            region,
            source,
            me: me.clone(),
            wires: ChildCache::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &VpcInfo {
        &self.info
    }

    pub fn region(&self) -> Result<Arc<Region>> {
        upgrade(&self.region, "region")
    }

    pub async fn invalidate_children(&self) {
        self.wires.invalidate().await;
    }

    pub async fn wires(&self) -> Result<Vec<Arc<Wire>>> {
        self.wires
            .get_or_fetch(|| async {
                tracing::debug!("Fetching wires of vpc {}", self.info.id);
                let wires = self
                    .source
                    .list_wires(&self.info.id)
                    .await
                    .with_context(|| format!("ListWires({})", self.info.id))?;
                Ok(wires
                    .into_iter()
                    .map(|info| {
                        Arc::new(Wire {
                            info,
                            vpc: self.me.clone(),
                        })
                    })
                    .collect())
            })
            .await
    }

    pub async fn wire_by_id(&self, wire_id: &str) -> Result<Arc<Wire>> {
        find_by_id(self.wires().await?, wire_id, "wire", Wire::id)
    }
}

pub struct Wire {
    info: WireInfo,
    vpc: Weak<Vpc>,
}

impl Wire {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &WireInfo {
        &self.info
    }

    pub fn vpc(&self) -> Result<Arc<Vpc>> {
        upgrade(&self.vpc, "vpc")
    }

    pub fn region(&self) -> Result<Arc<Region>> {
        self.vpc()?.region()
    }

    /// The zone this wire is bound to, looked up through the region
    pub async fn zone(&self) -> Result<Arc<Zone>> {
        self.region()?.zone_by_id(&self.info.zone_id).await
    }
}

pub struct Host {
    info: HostInfo,
    zone: Weak<Zone>,
    source: Arc<dyn TopologySource>,
}

impl Host {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &HostInfo {
        &self.info
    }

    pub fn zone(&self) -> Result<Arc<Zone>> {
        upgrade(&self.zone, "zone")
    }

    pub async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        self.source
            .list_instances(&self.info.id)
            .await
            .with_context(|| format!("ListInstances({})", self.info.id))
    }
}

pub struct Storage {
    info: StorageInfo,
    zone: Weak<Zone>,
}

impl Storage {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &StorageInfo {
        &self.info
    }

    pub fn zone(&self) -> Result<Arc<Zone>> {
        upgrade(&self.zone, "zone")
    }
}

// Nodes print their identity only; parents and caches would recurse.
impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region").field("id", &self.id).finish_non_exhaustive()
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone").field("info", &self.info).finish_non_exhaustive()
    }
}

impl fmt::Debug for Vpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vpc").field("info", &self.info).finish_non_exhaustive()
    }
}

impl fmt::Debug for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wire").field("info", &self.info).finish_non_exhaustive()
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").field("info", &self.info).finish_non_exhaustive()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").field("info", &self.info).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StaticTopology {
        zone_fetches: AtomicUsize,
        vpc_fetches: AtomicUsize,
        vpcs: std::sync::Mutex<Vec<VpcInfo>>,
        instances: HashMap<String, Vec<InstanceInfo>>,
    }

    fn vm(id: &str, host_id: &str, ip: &str) -> InstanceInfo {
        InstanceInfo {
            id: id.to_string(),
            name: id.to_string(),
            host_id: host_id.to_string(),
            ips: vec![ip.to_string()],
        }
    }

    impl StaticTopology {
        fn new() -> Self {
            let mut instances = HashMap::new();
            instances.insert("host-a1".to_string(), vec![vm("vm-1", "host-a1", "10.0.0.1")]);
            instances.insert("host-b1".to_string(), vec![vm("vm-2", "host-b1", "10.0.0.2")]);
            Self {
                vpcs: std::sync::Mutex::new(vec![VpcInfo {
                    id: "vpc-1".to_string(),
                    name: "default".to_string(),
                    cidr: "10.0.0.0/16".to_string(),
                }]),
                instances,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TopologySource for StaticTopology {
        async fn get_region(&self, region_id: &str) -> Result<RegionInfo> {
            Ok(RegionInfo {
                id: region_id.to_string(),
                name: "renamed".to_string(),
            })
        }

        async fn list_zones(&self, _region_id: &str) -> Result<Vec<ZoneInfo>> {
            self.zone_fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(["a", "b"]
                .iter()
                .map(|z| ZoneInfo {
                    id: format!("zone-{}", z),
                    name: z.to_string(),
                })
                .collect())
        }

        async fn list_vpcs(&self, _region_id: &str) -> Result<Vec<VpcInfo>> {
            self.vpc_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.vpcs.lock().unwrap().clone())
        }

        async fn list_wires(&self, vpc_id: &str) -> Result<Vec<WireInfo>> {
            Ok(vec![WireInfo {
                id: format!("{}-wire", vpc_id),
                name: "wire".to_string(),
                zone_id: "zone-b".to_string(),
            }])
        }

        async fn list_hosts(&self, zone_id: &str) -> Result<Vec<HostInfo>> {
            let suffix = zone_id.trim_start_matches("zone-");
            Ok(vec![HostInfo {
                id: format!("host-{}1", suffix),
                name: "host".to_string(),
            }])
        }

        async fn list_storages(&self, zone_id: &str) -> Result<Vec<StorageInfo>> {
            Ok(vec![StorageInfo {
                id: format!("{}-ssd", zone_id),
                name: "ssd".to_string(),
                storage_type: "ssd".to_string(),
            }])
        }

        async fn list_instances(&self, host_id: &str) -> Result<Vec<InstanceInfo>> {
            Ok(self.instances.get(host_id).cloned().unwrap_or_default())
        }

        async fn list_load_balancer_backends(&self, _lb_id: &str) -> Result<Vec<BackendInfo>> {
            Ok(vec![BackendInfo {
                id: "be-1".to_string(),
                instance_id: "vm-2".to_string(),
                port: 80,
                weight: 100,
            }])
        }

        async fn create_vpc(&self, _region_id: &str, name: &str, cidr: &str) -> Result<VpcInfo> {
            let info = VpcInfo {
                id: format!("vpc-{}", name),
                name: name.to_string(),
                cidr: cidr.to_string(),
            };
            self.vpcs.lock().unwrap().push(info.clone());
            Ok(info)
        }

        async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
            self.vpcs.lock().unwrap().retain(|v| v.id != vpc_id);
            Ok(())
        }
    }

    fn region() -> (Arc<StaticTopology>, Arc<Region>) {
        let source = Arc::new(StaticTopology::new());
        let region = Region::new(
            RegionInfo {
                id: "region-1".to_string(),
                name: "Region One".to_string(),
            },
            source.clone(),
        );
        (source, region)
    }

    #[tokio::test]
    async fn test_concurrent_first_access_fetches_once() {
        let (source, region) = region();

        let (a, b) = tokio::join!(region.zones(), region.zones());
        assert_eq!(a.unwrap().len(), 2);
        assert_eq!(b.unwrap().len(), 2);
        region.zones().await.unwrap();
        assert_eq!(source.zone_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nodes_debug_print_identity_only() {
        let (_source, region) = region();
        let zone = region.zone_by_id("zone-a").await.unwrap();
        let wire = region.vpc_by_id("vpc-1").await.unwrap().wires().await.unwrap()[0].clone();

        assert_eq!(format!("{:?}", region), r#"Region { id: "region-1", .. }"#);
        assert!(format!("{:?}", zone).contains("zone-a"));
        assert!(format!("{:?}", wire).contains("vpc-1-wire"));
        assert!(!format!("{:?}", wire).contains("Region"));
    }

    #[tokio::test]
    async fn test_lookup_misses_are_not_found() {
        let (_source, region) = region();
        assert!(region.zone_by_id("zone-z").await.unwrap_err().is_not_found());
        assert!(region.host_by_id("host-z1").await.unwrap_err().is_not_found());
        assert_eq!(region.host_by_id("host-b1").await.unwrap().id(), "host-b1");
    }

    #[tokio::test]
    async fn test_refresh_keeps_child_caches() {
        let (source, region) = region();
        region.vpcs().await.unwrap();
        region.refresh().await.unwrap();
        region.vpcs().await.unwrap();

        assert_eq!(region.info().await.name, "renamed");
        assert_eq!(source.vpc_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_vpc_writes_invalidate_cache() {
        let (source, region) = region();
        assert_eq!(region.vpcs().await.unwrap().len(), 1);

        let vpc = region.create_vpc("prod", "10.1.0.0/16").await.unwrap();
        assert_eq!(vpc.id(), "vpc-prod");
        assert_eq!(region.vpcs().await.unwrap().len(), 2);

        region.delete_vpc("vpc-prod").await.unwrap();
        assert!(region.vpc_by_id("vpc-prod").await.unwrap_err().is_not_found());
        assert_eq!(source.vpc_fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_back_references() {
        let (_source, region) = region();
        let vpc = region.vpc_by_id("vpc-1").await.unwrap();
        let wire = vpc.wire_by_id("vpc-1-wire").await.unwrap();

        assert_eq!(wire.region().unwrap().id(), "region-1");
        assert_eq!(wire.zone().await.unwrap().id(), "zone-b");

        let storage = region.storage_by_id("zone-a-ssd").await.unwrap();
        assert_eq!(storage.zone().unwrap().id(), "zone-a");
    }

    #[tokio::test]
    async fn test_instance_queries() {
        let (_source, region) = region();

        assert_eq!(region.find_instance("vm-2").await.unwrap().host_id, "host-b1");
        assert_eq!(region.find_ip_owner("10.0.0.1").await.unwrap().id, "vm-1");
        assert!(region.find_ip_owner("10.9.9.9").await.unwrap_err().is_not_found());

        let backends = region.load_balancer_backends("lb-1").await.unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].1.id, "vm-2");
    }

    #[tokio::test]
    async fn test_invalidate_children_forces_refetch() {
        let (source, region) = region();
        region.zones().await.unwrap();
        region.invalidate_children().await;
        region.zones().await.unwrap();
        assert_eq!(source.zone_fetches.load(Ordering::SeqCst), 2);
    }
}
