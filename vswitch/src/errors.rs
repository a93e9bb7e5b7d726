// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors returned by the control operations of the switch.
//!
//! Per-packet failures never show up here: they end in the `error-drop` node.

use ipnet::IpNet;
use net::Vni;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node name '{0}'")]
    DuplicateNode(&'static str),
    #[error("Unknown node '{0}'")]
    UnknownNode(&'static str),
    #[error("Node '{node}' has edges on egress '{egress}' but never resolves it")]
    UnresolvedEgress {
        node: &'static str,
        egress: &'static str,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Network with vni {0} already exists")]
    DuplicateNetwork(Vni),
    #[error("No network with vni {0}")]
    UnknownNetwork(Vni),
    #[error("Route '{0}' already exists")]
    DuplicateRoute(String),
    #[error("Route '{existing}' already covers {network}")]
    DuplicateRouteNetwork { existing: String, network: IpNet },
    #[error("No route named '{0}'")]
    UnknownRoute(String),
    #[error("Route '{0}' is a default route and cannot be changed")]
    DefaultRoute(String),
    #[error("Gateway {0} is not inside the network")]
    GatewayOutsideNetwork(IpAddr),
    #[error("Gateway {gateway} does not match the family of {network}")]
    GatewayFamilyMismatch { gateway: IpAddr, network: IpNet },
    #[error("The network does not have an ipv6 range")]
    NoIpv6,
    #[error("Address {0} is not inside the network")]
    IpOutsideNetwork(IpAddr),
    #[error("Address {0} already exists")]
    DuplicateIp(IpAddr),
    #[error("Address {0} is already being listened on")]
    AlreadyListening(std::net::SocketAddr),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("Invalid node graph: {0}")]
    Graph(#[from] GraphError),
    #[error("Invalid network configuration: {0}")]
    Network(#[from] NetworkError),
    #[error("Route '{0}' needs exactly one of 'vni' and 'via'")]
    RouteTarget(String),
    #[error("Invalid trace configuration: {0}")]
    Trace(#[from] tracectl::TraceCtlError),
}
