//! Simulated security group API
//!
//! Like most providers the simulator only stores allow rules; deny rules
//! must be normalized away before they reach it.

use crate::error::SimError;
use crate::world::{GroupRecord, Op, SimCloud};
use async_trait::async_trait;
use cloudweave_cloud::{
    Result, RuleAction, SecurityGroupClient, SecurityGroupInfo, SecurityRule,
};

#[derive(Debug, Clone)]
pub struct SimSecurityGroups {
    cloud: SimCloud,
}

impl SimCloud {
    pub fn security_groups(&self) -> SimSecurityGroups {
        SimSecurityGroups {
            cloud: self.clone(),
        }
    }
}

#[async_trait]
impl SecurityGroupClient for SimSecurityGroups {
    async fn get_security_group(&self, secgroup_id: &str) -> Result<SecurityGroupInfo> {
        let mut world = self.cloud.lock();
        world.begin(Op::GetSecurityGroup)?;
        Ok(world.group_mut(secgroup_id)?.info.clone())
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String> {
        let mut world = self.cloud.lock();
        world.begin(Op::CreateSecurityGroup)?;
        if !world.vpcs.iter().any(|(_, vpc)| vpc.id == vpc_id) {
            return Err(SimError::not_found("vpc", vpc_id).into());
        }
        let taken = world
            .security_groups
            .values()
            .any(|group| group.info.name == name && group.info.vpc_id.as_deref() == Some(vpc_id));
        if taken {
            return Err(SimError::NameTaken {
                name: name.to_string(),
                scope: vpc_id.to_string(),
            }
            .into());
        }
        let id = world.next_id("sg");
        let info = SecurityGroupInfo {
            id: id.clone(),
            name: name.to_string(),
            vpc_id: Some(vpc_id.to_string()),
            description: description.to_string(),
        };
        world.security_groups.insert(
            id.clone(),
            GroupRecord {
                info,
                rules: Vec::new(),
            },
        );
        tracing::debug!("Simulated security group {} created in {}", id, vpc_id);
        Ok(id)
    }

    async fn list_rules(&self, secgroup_id: &str) -> Result<Vec<SecurityRule>> {
        let mut world = self.cloud.lock();
        world.begin(Op::ListRules)?;
        Ok(world.group_mut(secgroup_id)?.rules.clone())
    }

    async fn add_rule(&self, secgroup_id: &str, rule: &SecurityRule) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::AddRule)?;
        if rule.action == RuleAction::Deny {
            return Err(SimError::Unsupported(format!("deny rule '{}'", rule)).into());
        }
        let external_id = world.next_id("rule");
        let group = world.group_mut(secgroup_id)?;
        if group.rules.contains(rule) {
            return Err(SimError::InvalidRequest(format!(
                "rule '{}' already exists in {}",
                rule, secgroup_id
            ))
            .into());
        }
        group.rules.push(rule.clone().with_external_id(external_id));
        Ok(())
    }

    async fn remove_rule(&self, secgroup_id: &str, rule: &SecurityRule) -> Result<()> {
        let mut world = self.cloud.lock();
        world.begin(Op::RemoveRule)?;
        let group = world.group_mut(secgroup_id)?;
        let position = match &rule.external_id {
            Some(external_id) => group
                .rules
                .iter()
                .position(|r| r.external_id.as_ref() == Some(external_id)),
            None => group.rules.iter().position(|r| r == rule),
        };
        let Some(position) = position else {
            return Err(SimError::not_found("rule", rule.to_string()).into());
        };
        group.rules.remove(position);
        Ok(())
    }
}
