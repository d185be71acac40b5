//! Security group reconciliation

use crate::differ::{ApplyReport, RuleStore, apply_rule_diff, compare_set, sync_rule_set};
use crate::error::{ErrorKind, Result, ResultExt};
use crate::resource::VirtualMachine;
use crate::secrules::SecurityRule;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupInfo {
    pub id: String,
    pub name: String,
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Security group CRUD, implemented by providers
#[async_trait]
pub trait SecurityGroupClient: Send + Sync {
    async fn get_security_group(&self, secgroup_id: &str) -> Result<SecurityGroupInfo>;

    /// Returns the new group's id
    async fn create_security_group(&self, vpc_id: &str, name: &str, description: &str) -> Result<String>;

    async fn list_rules(&self, secgroup_id: &str) -> Result<Vec<SecurityRule>>;

    async fn add_rule(&self, secgroup_id: &str, rule: &SecurityRule) -> Result<()>;

    async fn remove_rule(&self, secgroup_id: &str, rule: &SecurityRule) -> Result<()>;
}

/// The rules of one group seen as a [`RuleStore`]
pub struct GroupRules<'a, C: ?Sized> {
    client: &'a C,
    secgroup_id: &'a str,
}

impl<'a, C: SecurityGroupClient + ?Sized> GroupRules<'a, C> {
    pub fn new(client: &'a C, secgroup_id: &'a str) -> Self {
        Self { client, secgroup_id }
    }
}

#[async_trait]
impl<C: SecurityGroupClient + ?Sized> RuleStore<SecurityRule> for GroupRules<'_, C> {
    async fn list(&self) -> Result<Vec<SecurityRule>> {
        self.client.list_rules(self.secgroup_id).await
    }

    async fn add(&self, entry: &SecurityRule) -> Result<()> {
        self.client.add_rule(self.secgroup_id, entry).await
    }

    async fn remove(&self, entry: &SecurityRule) -> Result<()> {
        self.client.remove_rule(self.secgroup_id, entry).await
    }
}

/// Bring the rules of an existing group in line with `rules`
pub async fn sync_rules<C>(client: &C, secgroup_id: &str, rules: &[SecurityRule]) -> Result<ApplyReport>
where
    C: SecurityGroupClient + ?Sized,
{
    let store = GroupRules::new(client, secgroup_id);
    let diff = sync_rule_set(store.list(), rules)
        .await
        .with_context(|| format!("SyncRules({})", secgroup_id))?;
    if diff.is_empty() {
        tracing::debug!("Security group {} already in sync", secgroup_id);
        return Ok(ApplyReport::default());
    }

    tracing::info!("Security group {}: {}", secgroup_id, diff.summary());
    apply_rule_diff(&store, &diff)
        .await
        .with_context(|| format!("SyncRules({})", secgroup_id))
}

/// Ensure a security group exists and carries exactly `rules`.
///
/// An empty or unknown `secgroup_id` creates a new group in `vpc_id`. Names
/// equal to `default` are prefixed with the VPC id, since most providers
/// reserve that name. Returns the id of the group that was synced.
pub async fn sync_security_group<C>(
    client: &C,
    secgroup_id: &str,
    vpc_id: &str,
    name: &str,
    description: &str,
    rules: &[SecurityRule],
) -> Result<String>
where
    C: SecurityGroupClient + ?Sized,
{
    let existing = if secgroup_id.is_empty() {
        None
    } else {
        match client.get_security_group(secgroup_id).await {
            Ok(group) => Some(group.id),
            Err(e) if e.is_not_found() => {
                tracing::warn!("Security group {} not found, creating a new one", secgroup_id);
                None
            }
            Err(e) => return Err(e.context(format!("GetSecurityGroup({})", secgroup_id))),
        }
    };

    let secgroup_id = match existing {
        Some(id) => id,
        None => {
            let base = if name.eq_ignore_ascii_case("default") {
                format!("{}-{}", vpc_id, name)
            } else {
                name.to_string()
            };
            create_with_unique_name(client, vpc_id, &base, description).await?
        }
    };

    sync_rules(client, &secgroup_id, rules).await?;
    Ok(secgroup_id)
}

/// Attempts made to find a free group name before giving up
const NAME_ATTEMPTS: usize = 30;

/// Create a group named `base`, falling back to `base-1`, `base-2`, ... while
/// the provider reports the name as taken.
async fn create_with_unique_name<C>(
    client: &C,
    vpc_id: &str,
    base: &str,
    description: &str,
) -> Result<String>
where
    C: SecurityGroupClient + ?Sized,
{
    let mut attempt = 0;
    loop {
        let name = if attempt == 0 {
            base.to_string()
        } else {
            format!("{}-{}", base, attempt)
        };
        match client.create_security_group(vpc_id, &name, description).await {
            Ok(id) => {
                tracing::info!("Created security group {} ({}) in {}", name, id, vpc_id);
                return Ok(id);
            }
            Err(e) if e.kind() == ErrorKind::DuplicateId && attempt + 1 < NAME_ATTEMPTS => {
                tracing::warn!("Security group name {} is taken in {}", name, vpc_id);
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("CreateSecurityGroup({})", name))),
        }
    }
}

/// Make the instance's security groups exactly `desired`.
///
/// New groups are assigned before old ones are removed so the instance is
/// never left without a group.
pub async fn set_security_groups<V>(vm: &mut V, desired: &[String]) -> Result<()>
where
    V: VirtualMachine + ?Sized,
{
    let id = vm.id().to_string();
    vm.refresh().await.with_context(|| format!("Refresh({})", id))?;

    let (add, remove, _keep) = compare_set(&vm.security_group_ids(), desired);
    for secgroup_id in &add {
        vm.assign_security_group(secgroup_id)
            .await
            .with_context(|| format!("AssignSecurityGroup({}, {})", id, secgroup_id))?;
        tracing::info!("Assigned security group {} to {}", secgroup_id, id);
    }
    for secgroup_id in &remove {
        vm.unassign_security_group(secgroup_id)
            .await
            .with_context(|| format!("UnassignSecurityGroup({}, {})", id, secgroup_id))?;
        tracing::info!("Removed security group {} from {}", secgroup_id, id);
    }

    if !add.is_empty() || !remove.is_empty() {
        vm.refresh().await.with_context(|| format!("Refresh({})", id))?;
    }
    Ok(())
}
