use cloudweave_cloud::{CancellationToken, PollConfig, RetryPolicy};
use cloudweave_cloud_sim::{SimCloud, SimSeed};
use std::time::Duration;

pub const SEED: &str = r#"
timing:
  transition_refreshes: 2
  job_polls: 2
regions:
  - id: north-1
    name: North
    zones:
      - id: north-1a
        name: A
        hosts:
          - id: host-1
            name: h1
            instances:
              - id: i-web
                name: web
                instance_type: s1.small
                status: stopped
                ips: ["10.0.0.5"]
                disks: [disk-root-web]
                security_groups: [sg-web]
              - id: i-db
                name: db
                instance_type: s1.medium
                status: running
                ips: ["10.0.0.6"]
                disks: [disk-root-db]
                security_groups: [sg-web]
        storages:
          - id: st-ssd
            name: ssd
            storage_type: ssd
      - id: north-1b
        name: B
        hosts:
          - id: host-2
            name: h2
            instances:
              - id: i-cache
                name: cache
                instance_type: s1.small
                ips: ["10.0.1.5"]
    vpcs:
      - id: vpc-main
        name: main
        cidr: 10.0.0.0/16
        wires:
          - id: wire-a
            name: a
            zone_id: north-1a
security_groups:
  - id: sg-web
    name: web
    vpc_id: vpc-main
    rules:
      - "in:allow tcp 22 0.0.0.0/0"
      - "in:allow tcp 8080 0.0.0.0/0"
      - "out:allow any any 0.0.0.0/0"
  - id: sg-admin
    name: admin
    vpc_id: vpc-main
nat_gateways:
  - id: nat-edge
    name: edge
disks: [disk-data]
load_balancers:
  lb-front:
    - id: be-1
      instance_id: i-web
      port: 80
      weight: 10
    - id: be-2
      instance_id: i-cache
      port: 80
      weight: 5
acls:
  acl-front:
    - cidr: 10.0.0.0/8
      comment: internal
sold_out: [s1.large]
"#;

pub fn cloud() -> SimCloud {
    SimCloud::from_seed(&SimSeed::from_yaml(SEED).unwrap()).unwrap()
}

#[allow(dead_code)]
pub fn poll() -> PollConfig {
    PollConfig::new(Duration::from_secs(5), Duration::from_secs(120))
}

#[allow(dead_code)]
pub fn retry_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(30))
}

#[allow(dead_code)]
pub fn cancel() -> CancellationToken {
    CancellationToken::new()
}
