//! Simulated NAT gateways and load balancer ACLs

use crate::error::SimError;
use crate::world::{Change, NatRecord, Op, SimCloud, World, conflict, schedule};
use async_trait::async_trait;
use cloudweave_cloud::{
    AclEntry, CanonicalRule, CloudResource, Deletable, DnatRule, NatGateway, ResourceKind,
    ResourceStatus, Result, RuleStore, SnatRule,
};
use std::marker::PhantomData;

/// Entry type stored in one of a gateway's tables
pub trait NatEntry: CanonicalRule + 'static {
    const TABLE: &'static str;

    /// Pick this entry type's table out of a gateway
    fn table<'a>(dnat: &'a mut Vec<DnatRule>, snat: &'a mut Vec<SnatRule>) -> &'a mut Vec<Self>;

    fn external_id(&self) -> Option<&str>;

    fn with_id(self, external_id: String) -> Self;
}

impl NatEntry for DnatRule {
    const TABLE: &'static str = "dnat";

    fn table<'a>(dnat: &'a mut Vec<DnatRule>, _snat: &'a mut Vec<SnatRule>) -> &'a mut Vec<Self> {
        dnat
    }

    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    fn with_id(self, external_id: String) -> Self {
        self.with_external_id(external_id)
    }
}

impl NatEntry for SnatRule {
    const TABLE: &'static str = "snat";

    fn table<'a>(_dnat: &'a mut Vec<DnatRule>, snat: &'a mut Vec<SnatRule>) -> &'a mut Vec<Self> {
        snat
    }

    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    fn with_id(self, external_id: String) -> Self {
        self.with_external_id(external_id)
    }
}

/// One table of a gateway
#[derive(Debug, Clone)]
pub struct SimNatEntries<T> {
    cloud: SimCloud,
    gateway_id: String,
    entry: PhantomData<fn() -> T>,
}

impl<T: NatEntry> SimNatEntries<T> {
    fn new(cloud: SimCloud, gateway_id: String) -> Self {
        Self {
            cloud,
            gateway_id,
            entry: PhantomData,
        }
    }

    /// Edits need an available gateway
    fn editable<'w>(&self, world: &'w mut World) -> std::result::Result<&'w mut Vec<T>, SimError> {
        let record = world.nat_mut(&self.gateway_id)?;
        if record.status != ResourceStatus::Available || record.pending.is_some() {
            return Err(conflict(&self.gateway_id, record.status, "edit entries"));
        }
        Ok(T::table(&mut record.dnat, &mut record.snat))
    }
}

#[async_trait]
impl<T: NatEntry> RuleStore<T> for SimNatEntries<T> {
    async fn list(&self) -> Result<Vec<T>> {
        let mut world = self.cloud.lock();
        world.begin(Op::ListNatEntries)?;
        let record = world.nat_mut(&self.gateway_id)?;
        Ok(T::table(&mut record.dnat, &mut record.snat).clone())
    }

    async fn add(&self, entry: &T) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::AddNatEntry)?;
        let external_id = world.next_id(T::TABLE);
        let table = self.editable(&mut world)?;
        let key = entry.canonical_key();
        if table.iter().any(|e| e.canonical_key() == key) {
            return Err(SimError::InvalidRequest(format!("{} entry '{}' exists", T::TABLE, key)).into());
        }
        table.push(entry.clone().with_id(external_id));
        Ok(())
    }

    async fn remove(&self, entry: &T) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::RemoveNatEntry)?;
        let table = self.editable(&mut world)?;
        let position = match entry.external_id() {
            Some(id) => table.iter().position(|e| e.external_id() == Some(id)),
            None => {
                let key = entry.canonical_key();
                table.iter().position(|e| e.canonical_key() == key)
            }
        };
        match position {
            Some(position) => {
                table.remove(position);
                Ok(())
            }
            None => Err(SimError::not_found("nat entry", entry.canonical_key()).into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimNatGateway {
    cloud: SimCloud,
    id: String,
    record: NatRecord,
    dnat: SimNatEntries<DnatRule>,
    snat: SimNatEntries<SnatRule>,
}

impl SimCloud {
    pub fn nat_gateway(&self, id: &str) -> Result<SimNatGateway> {
        let record = self
            .lock()
            .nat_gateways
            .get(id)
            .cloned()
            .ok_or_else(|| SimError::not_found("nat gateway", id))?;
        Ok(SimNatGateway {
            cloud: self.clone(),
            id: id.to_string(),
            record,
            dnat: SimNatEntries::new(self.clone(), id.to_string()),
            snat: SimNatEntries::new(self.clone(), id.to_string()),
        })
    }

    pub fn acl(&self, acl_id: &str) -> SimAcl {
        SimAcl {
            cloud: self.clone(),
            acl_id: acl_id.to_string(),
        }
    }
}

#[async_trait]
impl CloudResource for SimNatGateway {
    fn kind(&self) -> ResourceKind {
        ResourceKind::NatGateway
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

    async fn refresh(&mut self) -> Result<()> {
        self.record = self.cloud.lock().refresh_nat(&self.id)?;
        Ok(())
    }
}

#[async_trait]
impl Deletable for SimNatGateway {
    async fn request_delete(&self) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::Delete)?;
        let delay = world.delay();
        let record = world.nat_mut(&self.id)?;
        match record.status {
            ResourceStatus::Available | ResourceStatus::Error if record.pending.is_none() => {
                record.status = ResourceStatus::Deleting;
                record.pending = schedule(delay, Change::Remove);
                Ok(())
            }
            other => Err(conflict(&self.id, other, "delete").into()),
        }
    }
}

impl NatGateway for SimNatGateway {
    fn dnat_table(&self) -> &dyn RuleStore<DnatRule> {
        &self.dnat
    }

    fn snat_table(&self) -> &dyn RuleStore<SnatRule> {
        &self.snat
    }
}

/// Load balancer access list
#[derive(Debug, Clone)]
pub struct SimAcl {
    cloud: SimCloud,
    acl_id: String,
}

impl SimAcl {
    fn entries<'w>(&self, world: &'w mut World) -> std::result::Result<&'w mut Vec<AclEntry>, SimError> {
        world
            .acls
            .get_mut(&self.acl_id)
            .ok_or_else(|| SimError::not_found("acl", &self.acl_id))
    }
}

#[async_trait]
impl RuleStore<AclEntry> for SimAcl {
    async fn list(&self) -> Result<Vec<AclEntry>> {
        let mut world = self.cloud.lock();
        world.begin(Op::ListAcl)?;
        Ok(self.entries(&mut world)?.clone())
    }

    async fn add(&self, entry: &AclEntry) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::AddAclEntry)?;
        let entries = self.entries(&mut world)?;
        if entries.iter().any(|e| e.cidr == entry.cidr) {
            return Err(SimError::InvalidRequest(format!("acl entry {} exists", entry.cidr)).into());
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn remove(&self, entry: &AclEntry) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::RemoveAclEntry)?;
        let entries = self.entries(&mut world)?;
        let before = entries.len();
        entries.retain(|e| e.cidr != entry.cidr);
        if entries.len() == before {
            return Err(SimError::not_found("acl entry", entry.cidr.to_string()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudweave_cloud::{ErrorKind, Protocol};

    fn forward(port: u16) -> DnatRule {
        DnatRule::new(
            Protocol::Tcp,
            "203.0.113.10".parse().unwrap(),
            port,
            "10.0.0.5".parse().unwrap(),
            port,
        )
    }

    #[tokio::test]
    async fn test_dnat_entries_get_ids_and_reject_duplicates() {
        let cloud = SimCloud::new();
        cloud.add_nat_gateway("nat-1", "edge");
        let gateway = cloud.nat_gateway("nat-1").unwrap();

        gateway.dnat_table().add(&forward(80)).await.unwrap();
        let entries = gateway.dnat_table().list().await.unwrap();
        assert!(entries[0].external_id.as_deref().unwrap().starts_with("dnat-"));

        let err = gateway.dnat_table().add(&forward(80)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(gateway.snat_table().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_gateway_rejects_edits() {
        let cloud = SimCloud::new();
        cloud.add_nat_gateway("nat-1", "edge");
        let gateway = cloud.nat_gateway("nat-1").unwrap();
        gateway.request_delete().await.unwrap();

        let err = gateway.dnat_table().add(&forward(80)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);
    }

    #[tokio::test]
    async fn test_acl_entries_keyed_by_cidr() {
        let cloud = SimCloud::new();
        cloud.add_acl("acl-1", Vec::new());
        let acl = cloud.acl("acl-1");
        let office = AclEntry::new("192.168.1.0/24".parse().unwrap());

        acl.add(&office).await.unwrap();
        assert!(acl.add(&office.clone().with_comment("again")).await.is_err());
        acl.remove(&office).await.unwrap();
        assert!(acl.list().await.unwrap().is_empty());
        assert!(acl.remove(&office).await.unwrap_err().is_not_found());
    }
}
