use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::TopologyError;
use crate::{NetworkId, NodeId};

/// Interface carrying a router's loopback subnet.
pub const LOOPBACK_INTERFACE: &str = "lo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "index", rename_all = "lowercase")]
pub enum NodeRole {
    Router(u32),
    Host(u32),
}

impl NodeRole {
    pub fn index(&self) -> u32 {
        match self {
            NodeRole::Router(index) | NodeRole::Host(index) => *index,
        }
    }

    pub fn is_router(&self) -> bool {
        matches!(self, NodeRole::Router(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
}

impl Node {
    pub fn router(index: u32) -> Self {
        Self {
            id: format!("R{}", index),
            role: NodeRole::Router(index),
        }
    }

    pub fn host(index: u32) -> Self {
        Self {
            id: format!("PC{}", index),
            role: NodeRole::Host(index),
        }
    }

    pub fn is_router(&self) -> bool {
        self.role.is_router()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeId,
    pub interface: String,
}

impl Endpoint {
    pub fn new(node: impl Into<NodeId>, interface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            interface: interface.into(),
        }
    }

    /// Parses the `node:interface` notation used in topology files.
    pub fn parse(raw: &str) -> Result<Self, TopologyError> {
        match raw.split_once(':') {
            Some((node, interface)) if !node.is_empty() && !interface.is_empty() => {
                Ok(Self::new(node, interface))
            }
            _ => Err(TopologyError::MalformedEndpoint(raw.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

/// An unordered pair of endpoints on two distinct nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    endpoints: [Endpoint; 2],
}

impl Link {
    pub fn new(a: Endpoint, b: Endpoint) -> Result<Self, TopologyError> {
        if a.node == b.node {
            return Err(TopologyError::SelfLink(a.node));
        }
        Ok(Self { endpoints: [a, b] })
    }

    pub fn endpoints(&self) -> (&Endpoint, &Endpoint) {
        (&self.endpoints[0], &self.endpoints[1])
    }
}

/// A static route as installed on one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub destination: NetworkId,
    pub gateway: Ipv4Addr,
    pub interface: String,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {} dev {}", self.destination, self.gateway, self.interface)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteInstall {
    pub node: NodeId,
    pub route: Route,
}
