use indexmap::IndexMap;
use serde::Serialize;
use std::net::Ipv4Addr;

use crate::error::TopologyError;
use crate::{NetworkId, NodeId};

/// Address of a node on one directly attached subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub address: Ipv4Addr,
    pub interface: String,
}

/// Directly attached subnets per node, in binding order.
///
/// The first subnet bound to a node is the one it advertises as a route
/// destination; for routers that is always the loopback `/32`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddressMap {
    nodes: IndexMap<NodeId, IndexMap<NetworkId, Binding>>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_subnet(
        &mut self,
        node: &str,
        subnet: NetworkId,
        address: Ipv4Addr,
        interface: &str,
    ) -> Result<(), TopologyError> {
        let subnets = self.nodes.entry(node.to_string()).or_default();
        let subnet = subnet.trunc();

        if subnets.contains_key(&subnet) {
            return Err(TopologyError::DuplicateSubnet {
                node: node.to_string(),
                subnet,
            });
        }

        subnets.insert(
            subnet,
            Binding {
                address,
                interface: interface.to_string(),
            },
        );
        Ok(())
    }

    pub fn advertised_subnet(&self, node: &str) -> Option<NetworkId> {
        self.nodes
            .get(node)
            .and_then(|subnets| subnets.keys().next().copied())
    }

    pub fn owns(&self, node: &str, subnet: &NetworkId) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|subnets| subnets.contains_key(subnet))
    }

    pub fn binding(&self, node: &str, subnet: &NetworkId) -> Option<&Binding> {
        self.nodes.get(node)?.get(subnet)
    }

    pub fn subnets(&self, node: &str) -> impl Iterator<Item = (&NetworkId, &Binding)> {
        self.nodes.get(node).into_iter().flat_map(|subnets| subnets.iter())
    }

    /// Subnets attached to both nodes, in `node`'s binding order.
    pub fn shared_subnets(&self, node: &str, other: &str) -> Vec<NetworkId> {
        let Some(theirs) = self.nodes.get(other) else {
            return Vec::new();
        };
        self.subnets(node)
            .map(|(subnet, _)| *subnet)
            .filter(|subnet| theirs.contains_key(subnet))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
