// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Switch configuration, loaded from YAML.
//!
//! ```yaml
//! mac_table_timeout: 300000
//! trace: "l2=debug"
//! networks:
//!   - vni: 1
//!     v4: 10.1.0.0/24
//!     ips:
//!       - { ip: 10.1.0.1, mac: "02:00:00:00:01:01" }
//!     routes:
//!       - { name: to-vpc2, network: 10.2.0.0/24, vni: 2 }
//! ```

use crate::errors::ConfigError;
use crate::network::route_table::RouteRule;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use net::{Mac, Vni};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

use tracectl::trace_target;
trace_target!("config", LevelFilter::INFO, &["vswitch"]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwitchConfig {
    /// Milliseconds a learned mac stays valid.
    pub mac_table_timeout: u64,
    /// Milliseconds a learned neighbor stays valid.
    pub arp_table_timeout: u64,
    /// Milliseconds a half-open tcp connection or a udp flow may stay idle.
    pub conntrack_timeout: u64,
    pub max_syn_backlog: usize,
    pub udp_recv_queue_capacity: usize,
    /// Hop count above which the vxlan loop detection kicks in.
    pub loop_detect_threshold: u8,
    /// A tracectl string such as `"l2=debug,l3=info"`.
    pub trace: Option<String>,
    pub networks: Vec<NetworkConfig>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            mac_table_timeout: 300_000,
            arp_table_timeout: 14_400_000,
            conntrack_timeout: 60_000,
            max_syn_backlog: 128,
            udp_recv_queue_capacity: 128,
            loop_detect_threshold: 250,
            trace: None,
            networks: Vec::new(),
        }
    }
}

impl SwitchConfig {
    /// Parse a configuration.
    ///
    /// # Errors
    ///
    /// Fails if the document is not valid YAML or does not match the schema.
    pub fn from_yaml(input: &str) -> Result<Self, ConfigError> {
        let config: SwitchConfig = serde_yaml_ng::from_str(input)?;
        debug!("Parsed config with {} networks", config.networks.len());
        Ok(config)
    }

    #[must_use]
    pub fn mac_timeout(&self) -> Duration {
        Duration::from_millis(self.mac_table_timeout)
    }

    #[must_use]
    pub fn arp_timeout(&self) -> Duration {
        Duration::from_millis(self.arp_table_timeout)
    }

    #[must_use]
    pub fn conntrack_timeout(&self) -> Duration {
        Duration::from_millis(self.conntrack_timeout)
    }

    /// Apply the `trace` setting to the global trace control, if any.
    ///
    /// # Errors
    ///
    /// Fails if the string is malformed or names an unknown tag.
    pub fn apply_trace(&self) -> Result<(), ConfigError> {
        if let Some(trace) = &self.trace {
            let tctl = tracectl::get_trace_ctl();
            tctl.setup_from_string(trace)?;
            info!("Applied trace configuration '{trace}'");
            tctl.dump();
        }
        Ok(())
    }
}

/// A synthetic ip of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpConfig {
    pub ip: IpAddr,
    pub mac: Mac,
    #[serde(default = "default_routing")]
    pub routing: bool,
}

fn default_routing() -> bool {
    true
}

/// A route rule. Exactly one of `vni` and `via` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub name: String,
    pub network: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vni: Option<Vni>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<IpAddr>,
}

impl RouteConfig {
    /// # Errors
    ///
    /// Fails unless exactly one target is given.
    pub fn to_rule(&self) -> Result<RouteRule, ConfigError> {
        match (self.vni, self.via) {
            (Some(vni), None) => Ok(RouteRule::to_vni(&self.name, self.network, vni)),
            (None, Some(gw)) => Ok(RouteRule::via(&self.name, self.network, gw)),
            _ => Err(ConfigError::RouteTarget(self.name.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub vni: Vni,
    pub v4: Ipv4Net,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v6: Option<Ipv6Net>,
    #[serde(default)]
    pub ips: Vec<IpConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = SwitchConfig::from_yaml("max_syn_backlog: 4\n").unwrap();
        assert_eq!(config.max_syn_backlog, 4);
        assert_eq!(config.loop_detect_threshold, 250);
        assert_eq!(config.mac_timeout(), Duration::from_secs(300));
        assert_eq!(config.conntrack_timeout(), Duration::from_secs(60));
        assert!(config.networks.is_empty());
    }

    #[test]
    fn networks_and_routes() {
        let yaml = r#"
networks:
  - vni: 1
    v4: 10.1.0.0/24
    v6: fd01::/64
    ips:
      - { ip: 10.1.0.1, mac: "02:00:00:00:01:01" }
      - { ip: "fd01::1", mac: "02:00:00:00:01:01", routing: false }
    routes:
      - { name: to-vpc2, network: 10.2.0.0/24, vni: 2 }
      - { name: out, network: 0.0.0.0/0, via: 10.1.0.254 }
"#;
        let config = SwitchConfig::from_yaml(yaml).unwrap();
        let net = &config.networks[0];
        assert_eq!(net.vni, Vni::new_checked(1).unwrap());
        assert_eq!(net.ips.len(), 2);
        assert!(net.ips[0].routing);
        assert!(!net.ips[1].routing);
        let rule = net.routes[1].to_rule().unwrap();
        assert_eq!(rule.name, "out");
    }

    #[test]
    fn route_needs_exactly_one_target() {
        let route = RouteConfig {
            name: "bad".to_owned(),
            network: "10.2.0.0/24".parse().unwrap(),
            vni: None,
            via: None,
        };
        assert!(matches!(route.to_rule(), Err(ConfigError::RouteTarget(_))));
    }

    #[test]
    fn trace_setting_reaches_the_trace_control() {
        let config = SwitchConfig::from_yaml("trace: \"config=trace\"\n").unwrap();
        config.apply_trace().unwrap();
        let targets = tracectl::get_trace_ctl().get_targets_by_tag("config");
        assert!(!targets.is_empty());
        for t in targets {
            assert_eq!(t.level(), tracectl::LevelFilter::TRACE);
        }

        let bad = SwitchConfig {
            trace: Some("no-such-tag=info".to_owned()),
            ..SwitchConfig::default()
        };
        assert!(matches!(bad.apply_trace(), Err(ConfigError::Trace(_))));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            SwitchConfig::from_yaml("bogus: 1\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
