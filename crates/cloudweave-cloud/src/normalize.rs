//! Allow-list normalization
//!
//! Providers differ in how they evaluate rules: some honour priorities and
//! explicit denies, others only accept allow rules. Desired policies are
//! therefore flattened into an equivalent, minimal set of allow rules per
//! direction before they are diffed against remote state.

use crate::error::{CloudError, Result};
use crate::secrules::{Cidr, Direction, PortRange, Protocol, RuleAction, RulePeer, SecurityRule};

/// Whether the model can represent a rule.
///
/// Rules peering with another security group or with an IPv6 network are
/// left alone by the differ.
pub fn is_representable(rule: &SecurityRule) -> bool {
    matches!(rule.peer, RulePeer::Cidr(_))
}

/// Flatten the rules of one direction into an allow-only set.
///
/// Rules are evaluated in priority order (higher value first, deny before
/// allow on ties). Each allow rule loses whatever an earlier deny already
/// blocks. No allow in the output is covered by another one, whatever the
/// input order. The output contains no deny rules.
pub fn to_allow_set(rules: &[SecurityRule]) -> Result<Vec<SecurityRule>> {
    let mut ordered: Vec<&SecurityRule> = rules.iter().collect();
    for rule in &ordered {
        if !is_representable(rule) {
            return Err(CloudError::InvalidRule(format!(
                "peer of '{}' is not an IPv4 network",
                rule
            )));
        }
    }
    ordered.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| deny_first(a.action).cmp(&deny_first(b.action)))
    });

    let mut denies: Vec<SecurityRule> = Vec::new();
    let mut allows: Vec<SecurityRule> = Vec::new();
    for rule in ordered {
        match rule.action {
            RuleAction::Deny => denies.push(rule.clone()),
            RuleAction::Allow => {
                let mut fragments = vec![rule.clone()];
                for deny in &denies {
                    fragments = fragments
                        .into_iter()
                        .flat_map(|fragment| subtract_rule(&fragment, deny))
                        .collect();
                }
                for fragment in fragments {
                    if allows.iter().any(|allow| covers(allow, &fragment)) {
                        continue;
                    }
                    allows.retain(|allow| !covers(&fragment, allow));
                    allows.push(fragment);
                }
            }
        }
    }
    Ok(allows)
}

/// Normalize a full desired policy.
///
/// Each direction is flattened separately. A policy without any egress rule
/// gains a single allow-all egress rule.
pub fn normalize_desired(rules: &[SecurityRule]) -> Result<Vec<SecurityRule>> {
    let (ingress, egress): (Vec<SecurityRule>, Vec<SecurityRule>) = rules
        .iter()
        .cloned()
        .partition(|rule| rule.direction == Direction::Ingress);

    let mut normalized = to_allow_set(&ingress)?;
    if egress.is_empty() {
        normalized.push(SecurityRule::allow_all_egress());
    } else {
        normalized.extend(to_allow_set(&egress)?);
    }

    normalized.sort_by_key(SecurityRule::canonical_key);
    normalized.dedup();
    Ok(normalized)
}

fn deny_first(action: RuleAction) -> u8 {
    match action {
        RuleAction::Deny => 0,
        RuleAction::Allow => 1,
    }
}

fn rule_cidr(rule: &SecurityRule) -> Cidr {
    rule.cidr().copied().unwrap_or(Cidr::ANY)
}

fn with_parts(base: &SecurityRule, protocol: Protocol, ports: PortRange, cidr: Cidr) -> SecurityRule {
    let mut rule = SecurityRule::new(
        base.direction,
        base.action,
        protocol,
        ports,
        RulePeer::Cidr(cidr),
    );
    rule.priority = base.priority;
    rule.description = base.description.clone();
    rule
}

/// Whether `outer` admits every packet `inner` admits
fn covers(outer: &SecurityRule, inner: &SecurityRule) -> bool {
    outer.direction == inner.direction
        && outer.protocol.covers(&inner.protocol)
        && outer.ports.contains(&inner.ports)
        && rule_cidr(outer).contains(&rule_cidr(inner))
}

/// The parts of `allow` that `deny` does not block
fn subtract_rule(allow: &SecurityRule, deny: &SecurityRule) -> Vec<SecurityRule> {
    if allow.direction != deny.direction {
        return vec![allow.clone()];
    }
    // An `any` allow against a specific deny splits per protocol first
    if allow.protocol == Protocol::Any && deny.protocol != Protocol::Any {
        return allow
            .protocol
            .expand()
            .iter()
            .flat_map(|protocol| {
                let part = with_parts(allow, *protocol, allow.ports, rule_cidr(allow));
                subtract_rule(&part, deny)
            })
            .collect();
    }
    if !deny.protocol.covers(&allow.protocol) {
        return vec![allow.clone()];
    }

    let allow_cidr = rule_cidr(allow);
    let deny_cidr = rule_cidr(deny);
    if !allow.ports.overlaps(&deny.ports) || !allow_cidr.overlaps(&deny_cidr) {
        return vec![allow.clone()];
    }

    let mut rest = Vec::new();
    // Addresses outside the deny keep every port
    for cidr in allow_cidr.subtract(&deny_cidr) {
        rest.push(with_parts(allow, allow.protocol, allow.ports, cidr));
    }
    // Addresses inside the deny keep only the ports it leaves open
    let shared = if deny_cidr.contains(&allow_cidr) {
        allow_cidr
    } else {
        deny_cidr
    };
    for ports in allow.ports.subtract(&deny.ports) {
        rest.push(with_parts(allow, allow.protocol, ports, shared));
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(lines: &[&str]) -> Vec<SecurityRule> {
        lines.iter().map(|line| line.parse().unwrap()).collect()
    }

    fn keys(rules: &[SecurityRule]) -> Vec<String> {
        rules.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_missing_egress_gains_allow_all() {
        let normalized = normalize_desired(&rules(&["in:allow tcp 22 0.0.0.0/0"])).unwrap();

        let egress: Vec<_> = normalized
            .iter()
            .filter(|r| r.direction == Direction::Egress)
            .collect();
        assert_eq!(egress.len(), 1);
        assert_eq!(egress[0].to_string(), "out:allow any any 0.0.0.0/0");
    }

    #[test]
    fn test_explicit_egress_is_kept() {
        let normalized = normalize_desired(&rules(&[
            "in:allow tcp 22 0.0.0.0/0",
            "out:allow tcp 443 0.0.0.0/0",
        ]))
        .unwrap();
        assert_eq!(
            keys(&normalized),
            vec!["in:allow tcp 22 0.0.0.0/0", "out:allow tcp 443 0.0.0.0/0"]
        );
    }

    #[test]
    fn test_higher_priority_deny_carves_ports() {
        let input = vec![
            "in:deny tcp 22 0.0.0.0/0".parse::<SecurityRule>().unwrap().with_priority(100),
            "in:allow tcp any 0.0.0.0/0".parse::<SecurityRule>().unwrap().with_priority(1),
        ];
        let allows = to_allow_set(&input).unwrap();
        assert_eq!(
            keys(&allows),
            vec!["in:allow tcp 1-21 0.0.0.0/0", "in:allow tcp 23-65535 0.0.0.0/0"]
        );
    }

    #[test]
    fn test_lower_priority_deny_is_shadowed() {
        let input = vec![
            "in:allow tcp 22 0.0.0.0/0".parse::<SecurityRule>().unwrap().with_priority(100),
            "in:deny tcp 22 10.0.0.0/8".parse::<SecurityRule>().unwrap().with_priority(1),
        ];
        assert_eq!(
            keys(&to_allow_set(&input).unwrap()),
            vec!["in:allow tcp 22 0.0.0.0/0"]
        );
    }

    #[test]
    fn test_deny_wins_priority_tie() {
        let input = rules(&["in:allow tcp 22 10.0.0.0/8", "in:deny tcp 22 10.0.0.0/8"]);
        assert!(to_allow_set(&input).unwrap().is_empty());
    }

    #[test]
    fn test_deny_on_subnet_splits_network() {
        let input = vec![
            "in:deny tcp 22 10.0.0.0/9".parse::<SecurityRule>().unwrap().with_priority(10),
            "in:allow tcp 22 10.0.0.0/8".parse::<SecurityRule>().unwrap().with_priority(1),
        ];
        assert_eq!(
            keys(&to_allow_set(&input).unwrap()),
            vec!["in:allow tcp 22 10.128.0.0/9"]
        );
    }

    #[test]
    fn test_any_protocol_allow_against_tcp_deny() {
        let input = vec![
            "in:deny tcp any 0.0.0.0/0".parse::<SecurityRule>().unwrap().with_priority(10),
            "in:allow any any 0.0.0.0/0".parse::<SecurityRule>().unwrap().with_priority(1),
        ];
        assert_eq!(
            keys(&to_allow_set(&input).unwrap()),
            vec!["in:allow udp any 0.0.0.0/0", "in:allow icmp any 0.0.0.0/0"]
        );
    }

    #[test]
    fn test_covered_allows_are_dropped() {
        let input = rules(&["in:allow tcp any 0.0.0.0/0", "in:allow tcp 22 10.0.0.0/8"]);
        assert_eq!(
            keys(&to_allow_set(&input).unwrap()),
            vec!["in:allow tcp any 0.0.0.0/0"]
        );

        let reversed = rules(&["in:allow tcp 22 10.0.0.0/8", "in:allow tcp any 0.0.0.0/0"]);
        assert_eq!(
            keys(&to_allow_set(&reversed).unwrap()),
            vec!["in:allow tcp any 0.0.0.0/0"]
        );
    }

    #[test]
    fn test_later_broad_allow_absorbs_several_narrow_ones() {
        let input = rules(&[
            "in:allow tcp 22 10.1.0.0/16",
            "in:allow udp 53 10.0.0.0/8",
            "in:allow tcp 443 10.2.0.0/16",
            "in:allow tcp 1-1024 10.0.0.0/8",
        ]);
        assert_eq!(
            keys(&to_allow_set(&input).unwrap()),
            vec!["in:allow udp 53 10.0.0.0/8", "in:allow tcp 1-1024 10.0.0.0/8"]
        );
    }

    #[test]
    fn test_only_denies_egress_means_no_egress() {
        let normalized = normalize_desired(&rules(&[
            "in:allow tcp 22 0.0.0.0/0",
            "out:deny any any 0.0.0.0/0",
        ]))
        .unwrap();
        assert!(normalized.iter().all(|r| r.direction == Direction::Ingress));
    }

    #[test]
    fn test_desired_group_peer_is_rejected() {
        let err = normalize_desired(&rules(&["in:allow tcp 22 sg:sg-1"])).unwrap_err();
        assert!(matches!(err, CloudError::InvalidRule(_)));
    }
}
