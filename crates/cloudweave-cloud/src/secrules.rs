//! Security group rule model
//!
//! Rules have a compact text form used in tests and configuration:
//!
//! ```text
//! in:allow tcp 22 0.0.0.0/0
//! out:deny udp 1000-2000 10.0.0.0/8
//! in:allow any any sg:sg-web
//! ```

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Ingress => write!(f, "in"),
            Direction::Egress => write!(f, "out"),
        }
    }
}

impl FromStr for Direction {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "in" | "ingress" => Ok(Direction::Ingress),
            "out" | "egress" => Ok(Direction::Egress),
            other => Err(CloudError::InvalidRule(format!("unknown direction '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    /// Protocols that carry port numbers
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }

    /// Concrete protocols covered by this one
    pub fn expand(&self) -> &'static [Protocol] {
        match self {
            Protocol::Any => &[Protocol::Tcp, Protocol::Udp, Protocol::Icmp],
            Protocol::Tcp => &[Protocol::Tcp],
            Protocol::Udp => &[Protocol::Udp],
            Protocol::Icmp => &[Protocol::Icmp],
        }
    }

    pub fn covers(&self, other: &Protocol) -> bool {
        *self == Protocol::Any || self == other
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Any => write!(f, "any"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "any" | "all" | "-1" => Ok(Protocol::Any),
            "tcp" | "6" => Ok(Protocol::Tcp),
            "udp" | "17" => Ok(Protocol::Udp),
            "icmp" | "1" => Ok(Protocol::Icmp),
            other => Err(CloudError::InvalidRule(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Inclusive port range within 1-65535
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub const ALL: PortRange = PortRange {
        start: 1,
        end: u16::MAX,
    };

    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(CloudError::InvalidRule(format!(
                "invalid port range {}-{}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(port: u16) -> Result<Self> {
        Self::new(port, port)
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn is_all(&self) -> bool {
        *self == Self::ALL
    }

    pub fn contains(&self, other: &PortRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The parts of `self` not covered by `hole`
    pub fn subtract(&self, hole: &PortRange) -> Vec<PortRange> {
        if !self.overlaps(hole) {
            return vec![*self];
        }
        let mut rest = Vec::with_capacity(2);
        if self.start < hole.start {
            rest.push(PortRange {
                start: self.start,
                end: hole.start - 1,
            });
        }
        if hole.end < self.end {
            rest.push(PortRange {
                start: hole.end + 1,
                end: self.end,
            });
        }
        rest
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_all() {
            write!(f, "any")
        } else if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PortRange {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let parse_port = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| CloudError::InvalidRule(format!("invalid port '{}'", p)))
        };

        match s {
            "any" | "all" | "" => Ok(Self::ALL),
            _ => match s.split_once('-') {
                Some((start, end)) => Self::new(parse_port(start)?, parse_port(end)?),
                None => Self::single(parse_port(s)?),
            },
        }
    }
}

/// IPv4 network, always stored masked to its network address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl Cidr {
    pub const ANY: Cidr = Cidr {
        addr: Ipv4Addr::UNSPECIFIED,
        prefix: 0,
    };

    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(CloudError::InvalidRule(format!("invalid prefix /{}", prefix)));
        }
        Ok(Self {
            addr: Ipv4Addr::from(u32::from(addr) & prefix_mask(prefix)),
            prefix,
        })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, other: &Cidr) -> bool {
        self.prefix <= other.prefix
            && u32::from(other.addr) & prefix_mask(self.prefix) == u32::from(self.addr)
    }

    pub fn contains_ip(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & prefix_mask(self.prefix) == u32::from(self.addr)
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// The networks covering `self` minus `hole`.
    ///
    /// When `hole` sits inside `self` the result is the chain of sibling
    /// networks from `self`'s prefix down to `hole`'s.
    pub fn subtract(&self, hole: &Cidr) -> Vec<Cidr> {
        if !self.overlaps(hole) {
            return vec![*self];
        }
        if hole.contains(self) {
            return Vec::new();
        }

        let hole_bits = u32::from(hole.addr);
        (self.prefix + 1..=hole.prefix)
            .map(|len| {
                let flip = 1u32 << (32 - u32::from(len));
                Cidr {
                    addr: Ipv4Addr::from((hole_bits & prefix_mask(len)) ^ flip),
                    prefix: len,
                }
            })
            .collect()
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = CloudError;

    /// A bare address is read as a /32
    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| CloudError::InvalidRule(format!("invalid prefix in '{}'", s)))?;
                (addr, prefix)
            }
            None => (s, 32),
        };
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| CloudError::InvalidRule(format!("invalid IPv4 network '{}'", s)))?;
        Cidr::new(addr, prefix)
    }
}

impl TryFrom<String> for Cidr {
    type Error = CloudError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}

/// The other side of a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePeer {
    Cidr(Cidr),
    /// IPv6 network, kept verbatim
    Ipv6(String),
    /// Another security group, by id
    SecurityGroup(String),
}

impl RulePeer {
    pub fn as_cidr(&self) -> Option<&Cidr> {
        match self {
            RulePeer::Cidr(cidr) => Some(cidr),
            _ => None,
        }
    }
}

impl std::fmt::Display for RulePeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RulePeer::Cidr(cidr) => write!(f, "{}", cidr),
            RulePeer::Ipv6(net) => write!(f, "{}", net),
            RulePeer::SecurityGroup(id) => write!(f, "sg:{}", id),
        }
    }
}

impl FromStr for RulePeer {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(id) = s.strip_prefix("sg:") {
            if id.is_empty() {
                return Err(CloudError::InvalidRule("empty security group peer".to_string()));
            }
            return Ok(RulePeer::SecurityGroup(id.to_string()));
        }
        if s.contains(':') {
            let addr = s.split('/').next().unwrap_or(s);
            addr.parse::<Ipv6Addr>()
                .map_err(|_| CloudError::InvalidRule(format!("invalid IPv6 network '{}'", s)))?;
            return Ok(RulePeer::Ipv6(s.to_ascii_lowercase()));
        }
        Ok(RulePeer::Cidr(s.parse()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Allow => write!(f, "allow"),
            RuleAction::Deny => write!(f, "deny"),
        }
    }
}

impl FromStr for RuleAction {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" | "accept" => Ok(RuleAction::Allow),
            "deny" | "drop" => Ok(RuleAction::Deny),
            other => Err(CloudError::InvalidRule(format!("unknown action '{}'", other))),
        }
    }
}

/// A single security group rule.
///
/// Equality, hashing and ordering use the canonical key only: `priority`,
/// `external_id` and `description` never make two rules different.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRule {
    pub priority: i32,
    pub direction: Direction,
    pub protocol: Protocol,
    pub ports: PortRange,
    pub peer: RulePeer,
    pub action: RuleAction,
    /// Provider-side rule id, used only to delete the exact remote rule
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl SecurityRule {
    /// Port ranges are dropped for protocols without ports
    pub fn new(
        direction: Direction,
        action: RuleAction,
        protocol: Protocol,
        ports: PortRange,
        peer: RulePeer,
    ) -> Self {
        let ports = if protocol.has_ports() {
            ports
        } else {
            PortRange::ALL
        };
        Self {
            priority: 1,
            direction,
            protocol,
            ports,
            peer,
            action,
            external_id: None,
            description: String::new(),
        }
    }

    /// Allow everything outbound
    pub fn allow_all_egress() -> Self {
        Self::new(
            Direction::Egress,
            RuleAction::Allow,
            Protocol::Any,
            PortRange::ALL,
            RulePeer::Cidr(Cidr::ANY),
        )
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn cidr(&self) -> Option<&Cidr> {
        self.peer.as_cidr()
    }

    /// Direction, protocol, ports, peer and action
    pub fn canonical_key(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.direction, self.protocol, self.ports, self.peer, self.action
        )
    }
}

impl PartialEq for SecurityRule {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for SecurityRule {}

impl std::hash::Hash for SecurityRule {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical_key().hash(state);
    }
}

impl std::fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} {} {} {}",
            self.direction, self.action, self.protocol, self.ports, self.peer
        )
    }
}

impl FromStr for SecurityRule {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let [head, protocol, ports, peer] = tokens.as_slice() else {
            return Err(CloudError::InvalidRule(format!(
                "expected '<dir>:<action> <protocol> <ports> <peer>', got '{}'",
                s
            )));
        };
        let (direction, action) = head
            .split_once(':')
            .ok_or_else(|| CloudError::InvalidRule(format!("missing action in '{}'", s)))?;

        let protocol: Protocol = protocol.parse()?;
        if !protocol.has_ports() && !matches!(*ports, "any" | "all") {
            return Err(CloudError::InvalidRule(format!(
                "{} rules take no ports: '{}'",
                protocol, s
            )));
        }

        Ok(SecurityRule::new(
            direction.parse()?,
            action.parse()?,
            protocol,
            ports.parse()?,
            peer.parse()?,
        ))
    }
}
