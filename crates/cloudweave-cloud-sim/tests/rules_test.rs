mod common;

use cloudweave_cloud::{
    AclEntry, DnatRule, ErrorKind, NatGateway, Protocol, RuleAction, RuleStore,
    SecurityGroupClient, SecurityGroupInfo, SecurityRule, SnatRule, delete_nat_gateway,
    sync_acl_entries, sync_nat_gateway, sync_rules, sync_security_group,
};
use cloudweave_cloud_sim::Op;
use common::{cancel, cloud, poll};

fn rules(lines: &[&str]) -> Vec<SecurityRule> {
    lines.iter().map(|line| line.parse().unwrap()).collect()
}

fn keys(rules: &[SecurityRule]) -> Vec<String> {
    let mut keys: Vec<String> = rules.iter().map(|r| r.canonical_key()).collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn test_deny_rules_are_normalized_before_reaching_provider() {
    let cloud = cloud();
    let groups = cloud.security_groups();
    let desired = rules(&["in:allow tcp 1-1024 10.0.0.0/8", "in:deny tcp 22 10.0.0.0/8"]);

    let report = sync_rules(&groups, "sg-web", &desired).await.unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(report.added, 2);

    let remote = cloud.rules_of("sg-web");
    assert!(remote.iter().all(|r| r.action == RuleAction::Allow));
    assert_eq!(
        keys(&remote),
        vec![
            "in tcp 1-21 10.0.0.0/8 allow",
            "in tcp 23-1024 10.0.0.0/8 allow",
            "out any any 0.0.0.0/0 allow",
        ]
    );
}

#[tokio::test]
async fn test_converged_group_is_left_alone() {
    let cloud = cloud();
    let groups = cloud.security_groups();
    let desired = rules(&[
        "in:allow tcp 22 0.0.0.0/0",
        "in:allow tcp 8080 0.0.0.0/0",
        "out:allow any any 0.0.0.0/0",
    ]);

    let report = sync_rules(&groups, "sg-web", &desired).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(cloud.calls(Op::AddRule), 0);
    assert_eq!(cloud.calls(Op::RemoveRule), 0);
}

#[tokio::test]
async fn test_missing_group_is_created_with_vpc_prefixed_default_name() {
    let cloud = cloud();
    let groups = cloud.security_groups();
    let desired = rules(&["in:allow tcp 443 0.0.0.0/0"]);

    let id = sync_security_group(&groups, "sg-gone", "vpc-main", "default", "", &desired)
        .await
        .unwrap();
    assert_ne!(id, "sg-gone");

    let info = groups.get_security_group(&id).await.unwrap();
    assert_eq!(info.name, "vpc-main-default");
    assert_eq!(info.vpc_id.as_deref(), Some("vpc-main"));
    // An empty egress side means "allow all outbound"
    assert_eq!(cloud.rules_of(&id).len(), 2);
}

#[tokio::test]
async fn test_colliding_default_name_gets_a_suffix() {
    let cloud = cloud();
    cloud.add_security_group(
        SecurityGroupInfo {
            id: "sg-squatter".into(),
            name: "vpc-main-default".into(),
            vpc_id: Some("vpc-main".into()),
            description: String::new(),
        },
        Vec::new(),
    );
    let groups = cloud.security_groups();

    let id = sync_security_group(&groups, "", "vpc-main", "default", "", &[])
        .await
        .unwrap();
    assert_ne!(id, "sg-squatter");
    assert_eq!(
        groups.get_security_group(&id).await.unwrap().name,
        "vpc-main-default-1"
    );
    assert_eq!(cloud.calls(Op::CreateSecurityGroup), 2);
}

#[tokio::test]
async fn test_throttled_rule_add_surfaces_as_transient() {
    let cloud = cloud();
    cloud.inject_fault(Op::AddRule, 1);
    let groups = cloud.security_groups();
    let desired = rules(&["in:allow tcp 443 0.0.0.0/0", "out:allow any any 0.0.0.0/0"]);

    let err = sync_rules(&groups, "sg-admin", &desired).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);

    // The next pass picks up where the failed one stopped
    let report = sync_rules(&groups, "sg-admin", &desired).await.unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(cloud.rules_of("sg-admin").len(), 2);
}

fn forward(external_port: u16, internal_port: u16) -> DnatRule {
    DnatRule::new(
        Protocol::Tcp,
        "203.0.113.10".parse().unwrap(),
        external_port,
        "10.0.0.5".parse().unwrap(),
        internal_port,
    )
}

#[tokio::test(start_paused = true)]
async fn test_nat_gateway_tables_converge_then_gateway_is_deleted() {
    let cloud = cloud();
    let mut gateway = cloud.nat_gateway("nat-edge").unwrap();
    let snat = vec![SnatRule::new(
        "10.0.0.0/16".parse().unwrap(),
        "203.0.113.10".parse().unwrap(),
    )];

    let (dnat_report, snat_report) =
        sync_nat_gateway(&gateway, vec![forward(80, 8080), forward(443, 8443)], snat.clone())
            .await
            .unwrap();
    assert_eq!(dnat_report.added, 2);
    assert_eq!(snat_report.added, 1);

    let (dnat_report, snat_report) =
        sync_nat_gateway(&gateway, vec![forward(80, 8080), forward(443, 9443)], snat)
            .await
            .unwrap();
    assert_eq!((dnat_report.removed, dnat_report.added), (1, 1));
    assert!(snat_report.is_noop());
    assert_eq!(gateway.dnat_table().list().await.unwrap().len(), 2);

    delete_nat_gateway(&mut gateway, &poll(), &cancel())
        .await
        .unwrap();
    assert!(cloud.nat_gateway("nat-edge").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_acl_converges_by_network() {
    let cloud = cloud();
    let acl = cloud.acl("acl-front");

    let report = sync_acl_entries(
        &acl,
        vec![
            AclEntry::new("10.0.0.0/8".parse().unwrap()).with_comment("internal"),
            AclEntry::new("192.168.1.0/24".parse().unwrap()).with_comment("office"),
        ],
    )
    .await
    .unwrap();

    assert_eq!((report.removed, report.added), (0, 1));
    assert_eq!(acl.list().await.unwrap().len(), 2);
    assert_eq!(cloud.calls(Op::RemoveAclEntry), 0);
}
