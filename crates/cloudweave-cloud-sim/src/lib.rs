//! Simulated cloud provider for Cloudweave
//!
//! This crate implements the engine's provider traits against an in-memory
//! world. It is used to exercise convergence end to end without a real
//! account.
//!
//! # Features
//!
//! - Instances, elastic IPs and NAT gateways with delayed status transitions
//! - Asynchronous jobs, batch creation and prepaid orders
//! - Security groups that only accept allow rules
//! - Fault injection and per-call counters
//! - Worlds described in YAML ([`SimSeed`])
//!
//! # Example
//!
//! ```ignore
//! use cloudweave_cloud::{start_vm, CancellationToken, PollConfig};
//! use cloudweave_cloud_sim::{SimCloud, SimSeed};
//! use std::time::Duration;
//!
//! let cloud = SimCloud::from_seed(&SimSeed::from_yaml(SEED)?)?;
//! let poll = PollConfig::new(Duration::from_secs(1), Duration::from_secs(60));
//! let mut vm = cloud.instance("i-web")?;
//! start_vm(&mut vm, &poll, &CancellationToken::new()).await?;
//! ```

pub mod eip;
pub mod error;
pub mod instance;
pub mod jobs;
pub mod nat;
pub mod provider;
pub mod secgroup;
pub mod seed;
pub mod topology;
mod world;

pub use eip::SimEip;
pub use error::{Result, SimError};
pub use instance::SimInstance;
pub use jobs::SimJobs;
pub use nat::{NatEntry, SimAcl, SimNatEntries, SimNatGateway};
pub use provider::{SIM_PROVIDER_ID, SimProvider, SimProviderFactory};
pub use secgroup::SimSecurityGroups;
pub use seed::{
    EipSeed, HostSeed, InstanceSeed, NatGatewaySeed, RegionSeed, SecurityGroupSeed, SimSeed,
    VpcSeed, ZoneSeed,
};
pub use topology::SimTopology;
pub use world::{COMPUTE_SERVICE, IMAGE_SERVICE, InstanceSpec, Op, SimCloud, Timing};
