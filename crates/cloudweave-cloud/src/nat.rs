//! NAT gateway entries and load balancer ACLs
//!
//! Both are plain entry lists without normalization: they go through the
//! same sort-merge differ as security group rules, keyed by a canonical form
//! that leaves out provider-assigned ids.

use crate::differ::{ApplyReport, CanonicalRule, RuleStore, ensure_unique_keys, reconcile};
use crate::error::{Result, ResultExt};
use crate::lifecycle::{Guard, delete_resource};
use crate::poll::PollConfig;
use crate::resource::Deletable;
use crate::secrules::{Cidr, Protocol};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tokio_util::sync::CancellationToken;

/// Destination NAT (port forwarding) entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnatRule {
    pub protocol: Protocol,
    pub external_ip: Ipv4Addr,
    pub external_port: u16,
    pub internal_ip: Ipv4Addr,
    pub internal_port: u16,
    #[serde(default)]
    pub external_id: Option<String>,
}

impl DnatRule {
    pub fn new(
        protocol: Protocol,
        external_ip: Ipv4Addr,
        external_port: u16,
        internal_ip: Ipv4Addr,
        internal_port: u16,
    ) -> Self {
        Self {
            protocol,
            external_ip,
            external_port,
            internal_ip,
            internal_port,
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

impl CanonicalRule for DnatRule {
    fn canonical_key(&self) -> String {
        format!(
            "dnat {} {}:{} {}:{}",
            self.protocol, self.external_ip, self.external_port, self.internal_ip, self.internal_port
        )
    }
}

/// Source NAT entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnatRule {
    pub source_cidr: Cidr,
    pub snat_ip: Ipv4Addr,
    #[serde(default)]
    pub external_id: Option<String>,
}

impl SnatRule {
    pub fn new(source_cidr: Cidr, snat_ip: Ipv4Addr) -> Self {
        Self {
            source_cidr,
            snat_ip,
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

impl CanonicalRule for SnatRule {
    fn canonical_key(&self) -> String {
        format!("snat {} {}", self.source_cidr, self.snat_ip)
    }
}

/// Load balancer ACL entry, keyed by its network only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub cidr: Cidr,
    #[serde(default)]
    pub comment: String,
}

impl AclEntry {
    pub fn new(cidr: Cidr) -> Self {
        Self {
            cidr,
            comment: String::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

impl CanonicalRule for AclEntry {
    fn canonical_key(&self) -> String {
        self.cidr.to_string()
    }
}

/// NAT gateway. Its DNAT and SNAT tables are exposed as entry stores.
pub trait NatGateway: Deletable {
    fn dnat_table(&self) -> &dyn RuleStore<DnatRule>;

    fn snat_table(&self) -> &dyn RuleStore<SnatRule>;
}

/// Make a NAT table hold exactly `desired`.
///
/// Two desired entries with the same key (for example the same external
/// port forwarded twice) are rejected before anything is changed.
pub async fn sync_nat_entries<T, S>(table: &S, desired: Vec<T>) -> Result<ApplyReport>
where
    T: CanonicalRule,
    S: RuleStore<T> + ?Sized,
{
    ensure_unique_keys(&desired)?;
    reconcile(table, desired).await.context("SyncNatEntries")
}

/// Sync both tables of a gateway, DNAT first
pub async fn sync_nat_gateway<G>(
    gateway: &G,
    dnat: Vec<DnatRule>,
    snat: Vec<SnatRule>,
) -> Result<(ApplyReport, ApplyReport)>
where
    G: NatGateway + ?Sized,
{
    let id = gateway.id().to_string();
    let dnat = sync_nat_entries(gateway.dnat_table(), dnat)
        .await
        .with_context(|| format!("NatGateway({})", id))?;
    let snat = sync_nat_entries(gateway.snat_table(), snat)
        .await
        .with_context(|| format!("NatGateway({})", id))?;
    Ok((dnat, snat))
}

/// Make an ACL hold exactly `desired`. Entries whose networks collapse to
/// the same CIDR are merged, the first comment wins.
pub async fn sync_acl_entries<S>(acl: &S, desired: Vec<AclEntry>) -> Result<ApplyReport>
where
    S: RuleStore<AclEntry> + ?Sized,
{
    let mut unique: Vec<AclEntry> = Vec::with_capacity(desired.len());
    for entry in desired {
        if !unique.iter().any(|e| e.cidr == entry.cidr) {
            unique.push(entry);
        }
    }
    reconcile(acl, unique).await.context("SyncAclEntries")
}

/// Delete a NAT gateway and wait until it is gone
pub async fn delete_nat_gateway<G>(
    gateway: &mut G,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<()>
where
    G: NatGateway + ?Sized,
{
    delete_resource(gateway, &Guard::DELETE_NAT_GATEWAY, poll, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Table<T> {
        entries: Mutex<Vec<T>>,
        log: Mutex<Vec<String>>,
        next_id: Mutex<u32>,
    }

    impl<T> Table<T> {
        fn new(entries: Vec<T>) -> Self {
            Self {
                entries: Mutex::new(entries),
                log: Mutex::new(Vec::new()),
                next_id: Mutex::new(100),
            }
        }
    }

    #[async_trait]
    impl RuleStore<DnatRule> for Table<DnatRule> {
        async fn list(&self) -> Result<Vec<DnatRule>> {
            Ok(self.entries.lock().unwrap().clone())
        }

        async fn add(&self, entry: &DnatRule) -> Result<()> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let stored = entry.clone().with_external_id(format!("dnat-{}", next));
            self.log.lock().unwrap().push(format!("add {}", entry.canonical_key()));
            self.entries.lock().unwrap().push(stored);
            Ok(())
        }

        async fn remove(&self, entry: &DnatRule) -> Result<()> {
            let id = entry
                .external_id
                .clone()
                .ok_or_else(|| CloudError::ApiError("remote entry without id".to_string()))?;
            self.log.lock().unwrap().push(format!("remove {}", id));
            self.entries
                .lock()
                .unwrap()
                .retain(|e| e.external_id.as_deref() != Some(id.as_str()));
            Ok(())
        }
    }

    #[async_trait]
    impl RuleStore<AclEntry> for Table<AclEntry> {
        async fn list(&self) -> Result<Vec<AclEntry>> {
            Ok(self.entries.lock().unwrap().clone())
        }

        async fn add(&self, entry: &AclEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn remove(&self, entry: &AclEntry) -> Result<()> {
            self.entries.lock().unwrap().retain(|e| e.cidr != entry.cidr);
            Ok(())
        }
    }

    fn dnat(external_port: u16, internal_port: u16) -> DnatRule {
        DnatRule::new(
            Protocol::Tcp,
            "203.0.113.10".parse().unwrap(),
            external_port,
            "10.0.0.5".parse().unwrap(),
            internal_port,
        )
    }

    #[tokio::test]
    async fn test_dnat_sync_removes_by_external_id() {
        let table = Table::new(vec![
            dnat(80, 8080).with_external_id("dnat-1"),
            dnat(22, 22).with_external_id("dnat-2"),
        ]);

        let report = sync_nat_entries(&table, vec![dnat(80, 8080), dnat(443, 8443)])
            .await
            .unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.added, 1);
        let log = table.log.lock().unwrap().clone();
        assert_eq!(log[0], "remove dnat-2");
        assert!(log[1].starts_with("add dnat tcp 203.0.113.10:443"));
    }

    #[tokio::test]
    async fn test_duplicate_forwarding_is_rejected() {
        let table = Table::new(Vec::new());
        let err = sync_nat_entries(&table, vec![dnat(80, 8080), dnat(80, 8080)])
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::DuplicateId(_)));
        assert!(table.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acl_sync_collapses_equal_networks() {
        let acl = Table::new(vec![AclEntry::new("10.0.0.0/8".parse().unwrap())]);

        let report = sync_acl_entries(
            &acl,
            vec![
                AclEntry::new("192.168.1.7/24".parse().unwrap()).with_comment("office"),
                AclEntry::new("192.168.1.0/24".parse().unwrap()),
            ],
        )
        .await
        .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
        let entries = acl.entries.lock().unwrap().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].comment, "office");
    }
}
