//! Symbolic firewall rules.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use netlab_core::IpPool;
use serde::{Deserialize, Serialize};

use crate::error::{FirewallError, Result};

/// What happens to traffic matching a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Forward the traffic (`ACCEPT`).
    Allow,
    /// Silently drop the traffic (`DROP`).
    #[default]
    Deny,
}

impl RuleAction {
    /// Returns the iptables jump target.
    pub fn target(&self) -> &'static str {
        match self {
            Self::Allow => "ACCEPT",
            Self::Deny => "DROP",
        }
    }

    /// Maps an iptables jump target back to an action, ignoring case.
    pub fn from_target(target: &str) -> Option<Self> {
        if target.eq_ignore_ascii_case("ACCEPT") {
            Some(Self::Allow)
        } else if target.eq_ignore_ascii_case("DROP") {
            Some(Self::Deny)
        } else {
            None
        }
    }

    /// Returns the name of this action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl FromStr for RuleAction {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            _ => Err(FirewallError::InvalidAction(s.to_string())),
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One side of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// The whole managed subnet, written `*`.
    #[default]
    Any,
    /// A node, by name.
    Node(String),
    /// A literal address or network.
    Network(Ipv4Net),
}

impl Endpoint {
    /// Resolves the endpoint into the network used in iptables commands.
    pub fn resolve(&self, pool: &IpPool) -> Result<Ipv4Net> {
        match self {
            Self::Any => Ok(pool.subnet()),
            Self::Node(name) => pool
                .address_of(name)
                .map(host_net)
                .ok_or_else(|| FirewallError::UnknownEndpoint(name.clone())),
            Self::Network(net) => Ok(*net),
        }
    }

    /// Maps a network found in the live chain back to an endpoint.
    ///
    /// The whole subnet becomes `*`, a host address held by a node becomes
    /// that node, anything else stays literal.
    pub fn from_network(net: Ipv4Net, pool: &IpPool) -> Self {
        if net == pool.subnet() {
            return Self::Any;
        }
        if net.prefix_len() == 32 {
            if let Some(name) = pool.name_of(net.addr()) {
                return Self::Node(name.to_string());
            }
        }
        Self::Network(net)
    }
}

impl FromStr for Endpoint {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::Any);
        }
        if let Some(net) = parse_network(s) {
            return Ok(Self::Network(net));
        }
        if is_valid_name(s) {
            return Ok(Self::Node(s.to_string()));
        }
        Err(FirewallError::InvalidEndpoint(s.to_string()))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = FirewallError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Node(name) => f.write_str(name),
            Self::Network(net) if net.prefix_len() == 32 => write!(f, "{}", net.addr()),
            Self::Network(net) => write!(f, "{}", net),
        }
    }
}

/// A symbolic firewall edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Traffic source.
    #[serde(default)]
    pub source: Endpoint,
    /// Traffic destination.
    #[serde(default)]
    pub target: Endpoint,
    /// What to do with the traffic.
    #[serde(default)]
    pub action: RuleAction,
}

impl Rule {
    /// Creates a rule.
    pub fn new(source: Endpoint, target: Endpoint, action: RuleAction) -> Self {
        Self {
            source,
            target,
            action,
        }
    }

    /// Parses a rule from its three textual parts.
    pub fn parse(source: &str, target: &str, action: &str) -> Result<Self> {
        Ok(Self::new(source.parse()?, target.parse()?, action.parse()?))
    }

    /// Returns the same rule in the opposite direction.
    pub fn mirrored(&self) -> Self {
        Self::new(self.target.clone(), self.source.clone(), self.action)
    }

    /// Returns this rule followed by its mirror, unless `one_way`.
    pub fn expand(&self, one_way: bool) -> Vec<Rule> {
        if one_way {
            vec![self.clone()]
        } else {
            vec![self.clone(), self.mirrored()]
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.action, self.source, self.target)
    }
}

/// A rule installed when the chain is brought up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRule {
    /// The rule.
    #[serde(flatten)]
    pub rule: Rule,
    /// Install only the stated direction.
    #[serde(default)]
    pub one_way: bool,
}

impl BaselineRule {
    /// Creates a baseline rule.
    pub fn new(rule: Rule, one_way: bool) -> Self {
        Self { rule, one_way }
    }
}

pub(crate) fn host_net(addr: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::from(addr)
}

/// Parses `a.b.c.d` or `a.b.c.d/len`, a bare address meaning a single host.
pub(crate) fn parse_network(s: &str) -> Option<Ipv4Net> {
    if let Ok(net) = s.parse::<Ipv4Net>() {
        return Some(net.trunc());
    }
    s.parse::<Ipv4Addr>().ok().map(host_net)
}

fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> IpPool {
        let mut pool = IpPool::new("10.0.0.0/24".parse().unwrap(), None, None).unwrap();
        pool.assign("node-a").unwrap();
        pool.assign("node-b").unwrap();
        pool
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("allow".parse::<RuleAction>().unwrap(), RuleAction::Allow);
        assert_eq!("DENY".parse::<RuleAction>().unwrap(), RuleAction::Deny);
        assert!("reject".parse::<RuleAction>().is_err());
        assert_eq!(RuleAction::from_target("accept"), Some(RuleAction::Allow));
        assert_eq!(RuleAction::from_target("REJECT"), None);
        assert_eq!(RuleAction::default(), RuleAction::Deny);
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!("*".parse::<Endpoint>().unwrap(), Endpoint::Any);
        assert_eq!(
            "node-a".parse::<Endpoint>().unwrap(),
            Endpoint::Node("node-a".into())
        );
        assert_eq!(
            "10.0.0.9".parse::<Endpoint>().unwrap(),
            Endpoint::Network("10.0.0.9/32".parse().unwrap())
        );
        assert_eq!(
            "10.0.1.7/24".parse::<Endpoint>().unwrap(),
            Endpoint::Network("10.0.1.0/24".parse().unwrap())
        );
        assert!("".parse::<Endpoint>().is_err());
        assert!("-rf".parse::<Endpoint>().is_err());
        assert!("a b".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_resolve() {
        let pool = pool();
        assert_eq!(
            Endpoint::Any.resolve(&pool).unwrap(),
            "10.0.0.0/24".parse::<Ipv4Net>().unwrap()
        );
        assert_eq!(
            Endpoint::Node("node-b".into()).resolve(&pool).unwrap(),
            "10.0.0.2/32".parse::<Ipv4Net>().unwrap()
        );
        let err = Endpoint::Node("node-z".into()).resolve(&pool).unwrap_err();
        assert!(matches!(err, FirewallError::UnknownEndpoint(name) if name == "node-z"));
    }

    #[test]
    fn test_endpoint_from_network() {
        let pool = pool();
        let from = |s: &str| Endpoint::from_network(s.parse().unwrap(), &pool);

        assert_eq!(from("10.0.0.0/24"), Endpoint::Any);
        assert_eq!(from("10.0.0.1/32"), Endpoint::Node("node-a".into()));
        assert_eq!(from("10.0.0.77/32").to_string(), "10.0.0.77");
        assert_eq!(from("10.0.0.0/25").to_string(), "10.0.0.0/25");
    }

    #[test]
    fn test_rule_display_and_mirror() {
        let rule = Rule::parse("node-a", "*", "allow").unwrap();
        assert_eq!(rule.to_string(), "allow: node-a -> *");
        assert_eq!(rule.mirrored().to_string(), "allow: * -> node-a");
        assert_eq!(rule.expand(true).len(), 1);
        assert_eq!(rule.expand(false), vec![rule.clone(), rule.mirrored()]);
    }

    #[test]
    fn test_rule_serde() {
        let rule = Rule::parse("node-a", "10.0.0.5", "deny").unwrap();
        let json = serde_json::to_string(&rule).unwrap();
        assert_eq!(
            json,
            r#"{"source":"node-a","target":"10.0.0.5","action":"deny"}"#
        );
        let back: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_baseline_defaults() {
        let baseline: BaselineRule = serde_json::from_str(r#"{"source":"node-a"}"#).unwrap();
        assert_eq!(baseline.rule.source, Endpoint::Node("node-a".into()));
        assert_eq!(baseline.rule.target, Endpoint::Any);
        assert_eq!(baseline.rule.action, RuleAction::Deny);
        assert!(!baseline.one_way);

        let baseline: BaselineRule =
            serde_json::from_str(r#"{"action":"allow","one_way":true}"#).unwrap();
        assert_eq!(baseline.rule, Rule::new(Endpoint::Any, Endpoint::Any, RuleAction::Allow));
        assert!(baseline.one_way);

        assert!(serde_json::from_str::<BaselineRule>(r#"{"action":"reject"}"#).is_err());
    }
}
