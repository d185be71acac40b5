//! Walk a small simulated account to its desired state.
//!
//! Run with `RUST_LOG=debug cargo run -p cloudweave-cloud-sim --example demo`
//! to see every poll.

use anyhow::Result;
use cloudweave_cloud::{
    CancellationToken, CloudProvider, CloudResource, DnatRule, ElasticIp, PollConfig, Protocol,
    RetryPolicy, SecurityRule, SnatRule, VirtualMachine, allocate_eip, associate_eip, attach_disk,
    set_security_groups, start_vm, sync_nat_gateway, sync_security_group,
};
use cloudweave_cloud_sim::{SimCloud, SimProvider, SimSeed};
use cloudweave_config::EngineConfig;
use std::net::Ipv4Addr;
use tracing_subscriber::EnvFilter;

const WORLD: &str = r#"
timing:
  transition_refreshes: 2
  job_polls: 1
regions:
  - id: demo-1
    name: Demo
    zones:
      - id: demo-1a
        name: A
        hosts:
          - id: host-1
            name: h1
            instances:
              - id: i-app
                name: app
                instance_type: s1.small
                status: stopped
                ips: ["10.8.0.10"]
                disks: [disk-root-app]
                security_groups: [sg-old]
    vpcs:
      - id: vpc-demo
        name: demo
        cidr: 10.8.0.0/16
security_groups:
  - id: sg-old
    name: legacy
    vpc_id: vpc-demo
    rules:
      - "in:allow any any 0.0.0.0/0"
nat_gateways:
  - id: nat-demo
    name: edge
disks: [disk-logs]
"#;

// Fast cadence so the walk-through finishes in a few seconds
const SETTINGS: &str = r#"
power: { interval_ms: 250, timeout_ms: 10000 }
eip: { interval_ms: 250, timeout_ms: 10000 }
retry: { interval_ms: 250, max_duration_ms: 5000 }
"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = EngineConfig::from_yaml(SETTINGS)?;
    settings.validate()?;
    let power = PollConfig::from(&settings.power);
    let eip_poll = PollConfig::from(&settings.eip);
    let retry = RetryPolicy::from(&settings.retry);
    let cancel = CancellationToken::new();

    let cloud = SimCloud::from_seed(&SimSeed::from_yaml(WORLD)?)?;
    let provider = SimProvider::new("demo", cloud.clone());
    let region = provider.region_by_id("demo-1").await?;

    // Resolve the instance from the address we know it by
    let owner = region.find_ip_owner("10.8.0.10").await?;
    tracing::info!("10.8.0.10 belongs to {} on {}", owner.name, owner.host_id);

    let mut vm = cloud.instance(&owner.id)?;
    start_vm(&mut vm, &power, &cancel).await?;
    attach_disk(&mut vm, "disk-logs", &retry, &power, &cancel).await?;

    let rules: Vec<SecurityRule> = [
        "in:allow tcp 1-1024 0.0.0.0/0",
        "in:deny tcp 23 0.0.0.0/0",
        "in:allow icmp any 10.0.0.0/8",
    ]
    .iter()
    .map(|line| line.parse::<SecurityRule>())
    .collect::<cloudweave_cloud::Result<_>>()?;
    let groups = cloud.security_groups();
    let group_id = sync_security_group(&groups, "", "vpc-demo", "default", "app", &rules).await?;
    set_security_groups(&mut vm, &[group_id.clone()]).await?;

    let mut eip = allocate_eip(|| cloud.allocate_eip(), &eip_poll, &cancel).await?;
    associate_eip(&mut eip, vm.id(), &eip_poll, &cancel).await?;
    let public_ip: Ipv4Addr = eip.ip_addr().parse()?;

    let gateway = cloud.nat_gateway("nat-demo")?;
    let (dnat, snat) = sync_nat_gateway(
        &gateway,
        vec![DnatRule::new(Protocol::Tcp, public_ip, 443, "10.8.0.10".parse()?, 8443)],
        vec![SnatRule::new("10.8.0.0/16".parse()?, public_ip)],
    )
    .await?;

    tracing::info!(
        "{} is {:?} with disks {:?} behind {}",
        vm.name(),
        vm.status(),
        vm.disk_ids(),
        eip.ip_addr()
    );
    tracing::info!("Security group {}: {} rules", group_id, cloud.rules_of(&group_id).len());
    tracing::info!("NAT: dnat {}, snat {}", dnat.summary(), snat.summary());
    Ok(())
}
