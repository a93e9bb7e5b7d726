// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Route rules of one network.
//!
//! Rules are kept per family, ordered so that a rule always comes before any rule whose
//! network contains it. A lookup returns the first match, which is the most specific one.

use crate::errors::NetworkError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use net::Vni;
use std::net::IpAddr;

pub const DEFAULT_RULE_V4: &str = "default";
pub const DEFAULT_RULE_V6: &str = "default-v6";

/// Where a matching packet goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Deliver inside the network with this vni, which may be another VPC.
    Vni(Vni),
    /// Forward to a gateway inside this network.
    Gateway(IpAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub name: String,
    pub network: IpNet,
    pub target: RouteTarget,
}

impl RouteRule {
    #[must_use]
    pub fn to_vni(name: &str, network: IpNet, vni: Vni) -> Self {
        Self {
            name: name.to_owned(),
            network,
            target: RouteTarget::Vni(vni),
        }
    }

    #[must_use]
    pub fn via(name: &str, network: IpNet, gateway: IpAddr) -> Self {
        Self {
            name: name.to_owned(),
            network,
            target: RouteTarget::Gateway(gateway),
        }
    }

    /// The rule delivers straight into `vni` itself.
    #[must_use]
    pub fn is_local_direct(&self, vni: Vni) -> bool {
        self.target == RouteTarget::Vni(vni)
    }
}

impl std::fmt::Display for RouteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target {
            RouteTarget::Vni(vni) => {
                write!(f, "{} -> network {} vni {vni}", self.name, self.network)
            }
            RouteTarget::Gateway(ip) => {
                write!(f, "{} -> network {} via {ip}", self.name, self.network)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    v4network: Ipv4Net,
    v6network: Option<Ipv6Net>,
    rules_v4: Vec<RouteRule>,
    rules_v6: Vec<RouteRule>,
}

impl RouteTable {
    /// A table with the default rules of a network.
    #[must_use]
    pub fn new(vni: Vni, v4network: Ipv4Net, v6network: Option<Ipv6Net>) -> Self {
        let rules_v4 = vec![RouteRule::to_vni(DEFAULT_RULE_V4, v4network.into(), vni)];
        let rules_v6 = v6network
            .map(|n| RouteRule::to_vni(DEFAULT_RULE_V6, n.into(), vni))
            .into_iter()
            .collect();
        Self {
            v4network,
            v6network,
            rules_v4,
            rules_v6,
        }
    }

    /// First rule matching `ip`.
    #[must_use]
    pub fn lookup(&self, ip: IpAddr) -> Option<&RouteRule> {
        let rules = match ip {
            IpAddr::V4(_) => &self.rules_v4,
            IpAddr::V6(_) => &self.rules_v6,
        };
        rules.iter().find(|r| r.network.contains(&ip))
    }

    /// All rules, v4 first.
    pub fn rules(&self) -> impl Iterator<Item = &RouteRule> {
        self.rules_v4.iter().chain(self.rules_v6.iter())
    }

    fn in_network(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(ip) => self.v4network.contains(&ip),
            IpAddr::V6(ip) => self.v6network.is_some_and(|n| n.contains(&ip)),
        }
    }

    /// Add a rule, placed before any rule that contains it.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate name or network, on an attempt to redefine a default rule, or on
    /// a gateway that is not inside this network or not of the rule's family.
    pub fn add_rule(&mut self, rule: RouteRule) -> Result<(), NetworkError> {
        for existing in self.rules() {
            if existing.name == rule.name {
                return Err(NetworkError::DuplicateRoute(rule.name));
            }
            if existing.network == rule.network {
                return Err(NetworkError::DuplicateRouteNetwork {
                    existing: existing.name.clone(),
                    network: rule.network,
                });
            }
        }
        if rule.name == DEFAULT_RULE_V4 || rule.name == DEFAULT_RULE_V6 {
            return Err(NetworkError::DefaultRoute(rule.name));
        }
        if let RouteTarget::Gateway(gateway) = rule.target {
            if gateway.is_ipv6() && self.v6network.is_none() {
                return Err(NetworkError::NoIpv6);
            }
            if gateway.is_ipv4() != matches!(rule.network, IpNet::V4(_)) {
                return Err(NetworkError::GatewayFamilyMismatch {
                    gateway,
                    network: rule.network,
                });
            }
            if !self.in_network(gateway) {
                return Err(NetworkError::GatewayOutsideNetwork(gateway));
            }
        }
        let rules = match rule.network {
            IpNet::V4(_) => &mut self.rules_v4,
            IpNet::V6(_) => &mut self.rules_v6,
        };
        let index = rules
            .iter()
            .position(|r| r.network.contains(&rule.network))
            .unwrap_or(rules.len());
        rules.insert(index, rule);
        Ok(())
    }

    /// Remove a rule by name.
    ///
    /// # Errors
    ///
    /// Fails if the rule does not exist or is a default rule.
    pub fn del_rule(&mut self, name: &str) -> Result<RouteRule, NetworkError> {
        if name == DEFAULT_RULE_V4 || name == DEFAULT_RULE_V6 {
            return Err(NetworkError::DefaultRoute(name.to_owned()));
        }
        for rules in [&mut self.rules_v4, &mut self.rules_v6] {
            if let Some(index) = rules.iter().position(|r| r.name == name) {
                return Ok(rules.remove(index));
            }
        }
        Err(NetworkError::UnknownRoute(name.to_owned()))
    }
}
