//! Cloudweave convergence engine
//!
//! This crate drives remote cloud providers toward a desired state. Providers
//! implement a handful of narrow traits; the engine owns the diffing, the
//! polling and the per-resource state machines.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  caller / controller             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               cloudweave-cloud                   │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │  differ /    │  │  lifecycle   │             │
//! │  │  normalize   │  │  (guards)    │             │
//! │  └──────┬───────┘  └──────┬───────┘             │
//! │  ┌──────▼─────────────────▼───────┐             │
//! │  │ job poller · waiter · retry    │             │
//! │  │        (poll deadline)         │             │
//! │  └────────────────────────────────┘             │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │ resource     │  │ graph        │             │
//! │  │ traits       │  │ (region tree)│             │
//! │  └──────────────┘  └──────────────┘             │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ sim provider  │ │ real provider │
//! └───────────────┘ └───────────────┘
//! ```

pub mod billing;
pub mod differ;
pub mod error;
pub mod graph;
pub mod job;
pub mod lifecycle;
pub mod nat;
pub mod normalize;
pub mod poll;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod secgroup;
pub mod secrules;
pub mod waiter;

// Re-exports
pub use billing::{OrderClient, await_order_resource_id, wait_order_resource};
pub use differ::{
    ApplyReport, CanonicalRule, RuleDiff, RuleStore, apply_rule_diff, compare_set, diff_rules,
    reconcile, sync_rule_set,
};
pub use error::{CloudError, ErrorKind, Result, ResultExt};
pub use graph::{
    BackendInfo, ChildCache, Host, HostInfo, InstanceInfo, Region, RegionInfo, Storage,
    StorageInfo, TopologySource, Vpc, VpcInfo, Wire, WireInfo, Zone, ZoneInfo,
};
pub use job::{
    AsyncJob, JobClient, JobStatus, all_sub_task_entity_ids, await_entity_id, single_entity_id,
    submit_and_await, task_entity_ids, wait_task_status,
};
pub use lifecycle::{
    Guard, Transition, allocate_eip, associate_eip, attach_disk, change_config, create_image,
    create_instance, delete_resource, delete_vm, detach_disk, dissociate_eip, guard,
    rebuild_root, start_vm, stop_vm,
};
pub use nat::{
    AclEntry, DnatRule, NatGateway, SnatRule, delete_nat_gateway, sync_acl_entries,
    sync_nat_entries, sync_nat_gateway,
};
pub use normalize::{is_representable, normalize_desired, to_allow_set};
pub use poll::{PollConfig, PollDeadline};
pub use provider::{CloudProvider, ProviderConfig, ProviderFactory, ProviderRegistry};
pub use resource::{
    CloudResource, Deletable, ElasticIp, ResourceKind, ResourceStatus, VirtualMachine,
};
pub use retry::{ErrorClass, RetryOutcome, RetryPolicy, classify, retry, retry_with};
pub use secgroup::{
    GroupRules, SecurityGroupClient, SecurityGroupInfo, set_security_groups,
    sync_rules, sync_security_group,
};
pub use secrules::{Cidr, Direction, PortRange, Protocol, RuleAction, RulePeer, SecurityRule};
pub use waiter::{wait_deleted, wait_resource, wait_status, wait_status_with_delay, wait_until};

/// Cancellation token accepted by every wait primitive
pub use tokio_util::sync::CancellationToken;
