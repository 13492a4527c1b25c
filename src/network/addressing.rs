use ipnet::Ipv4Net;
use log::debug;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::address_map::AddressMap;
use super::topology::Topology;
use crate::NodeId;
use crate::error::AddressingError;
use crate::types::{LOOPBACK_INTERFACE, NodeRole};

const LOOPBACK_PREFIX: u8 = 32;
const LINK_PREFIX: u8 = 24;

/// Base networks for the three kinds of addresses handed out in the lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressPlan {
    /// Router `Ri` gets `<base>.<i+1>/32` on its loopback
    pub loopback_base: Ipv4Addr,
    /// The n-th router-router link uses `<base>.<n>.0/24`
    pub transit_base: Ipv4Addr,
    /// The link between `Ri` and its host uses `<base>.<i+1>.0/24`
    pub access_base: Ipv4Addr,
}

impl Default for AddressPlan {
    fn default() -> Self {
        Self {
            loopback_base: Ipv4Addr::new(10, 10, 10, 0),
            transit_base: Ipv4Addr::new(192, 168, 0, 0),
            access_base: Ipv4Addr::new(172, 25, 0, 0),
        }
    }
}

/// One interface address to configure on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub node: NodeId,
    pub interface: String,
    pub address: Ipv4Net,
}

impl AddressPlan {
    pub fn loopbacks(
        &self,
        topology: &Topology,
        addresses: &mut AddressMap,
    ) -> Result<Vec<Assignment>, AddressingError> {
        let [a, b, c, _] = self.loopback_base.octets();
        let mut assignments = Vec::new();

        for router in topology.routers() {
            let host = octet(&router.id, router.role.index(), 1)?;
            let address = Ipv4Net::new(Ipv4Addr::new(a, b, c, host), LOOPBACK_PREFIX)?;
            assignments.push(bind(addresses, &router.id, LOOPBACK_INTERFACE, address)?);
        }

        Ok(assignments)
    }

    pub fn transit_links(
        &self,
        topology: &Topology,
        addresses: &mut AddressMap,
    ) -> Result<Vec<Assignment>, AddressingError> {
        let [a, b, _, _] = self.transit_base.octets();
        let mut assignments = Vec::new();
        let mut counter: u32 = 1;

        for link in topology.links() {
            let (fst, snd) = link.endpoints();
            let (Some(NodeRole::Router(fst_index)), Some(NodeRole::Router(snd_index))) =
                (topology.role_of(&fst.node), topology.role_of(&snd.node))
            else {
                continue;
            };

            let subnet = u8::try_from(counter)
                .map_err(|_| AddressingError::TransitExhausted(counter - 1))?;

            for (endpoint, index) in [(fst, fst_index), (snd, snd_index)] {
                let host = octet(&endpoint.node, index, 1)?;
                let address = Ipv4Net::new(Ipv4Addr::new(a, b, subnet, host), LINK_PREFIX)?;
                assignments.push(bind(addresses, &endpoint.node, &endpoint.interface, address)?);
            }

            counter += 1;
        }

        Ok(assignments)
    }

    pub fn access_links(
        &self,
        topology: &Topology,
        addresses: &mut AddressMap,
    ) -> Result<Vec<Assignment>, AddressingError> {
        let [a, b, _, _] = self.access_base.octets();
        let mut assignments = Vec::new();

        for link in topology.links() {
            let (fst, snd) = link.endpoints();
            let (router, host) = match (topology.role_of(&fst.node), topology.role_of(&snd.node)) {
                (Some(NodeRole::Router(index)), Some(NodeRole::Host(_))) => ((fst, index), snd),
                (Some(NodeRole::Host(_)), Some(NodeRole::Router(index))) => ((snd, index), fst),
                _ => continue,
            };
            let (router, index) = router;

            let subnet = octet(&router.node, index, 1)?;
            let router_address =
                Ipv4Net::new(Ipv4Addr::new(a, b, subnet, octet(&router.node, index, 1)?), LINK_PREFIX)?;
            let host_address =
                Ipv4Net::new(Ipv4Addr::new(a, b, subnet, octet(&router.node, index, 2)?), LINK_PREFIX)?;

            assignments.push(bind(addresses, &router.node, &router.interface, router_address)?);
            assignments.push(bind(addresses, &host.node, &host.interface, host_address)?);
        }

        Ok(assignments)
    }
}

fn octet(node: &str, index: u32, offset: u32) -> Result<u8, AddressingError> {
    index
        .checked_add(offset)
        .and_then(|value| u8::try_from(value).ok())
        .filter(|value| *value < u8::MAX)
        .ok_or_else(|| AddressingError::IndexOutOfRange {
            node: node.to_string(),
            index,
        })
}

fn bind(
    addresses: &mut AddressMap,
    node: &str,
    interface: &str,
    address: Ipv4Net,
) -> Result<Assignment, AddressingError> {
    addresses.bind_subnet(node, address.trunc(), address.addr(), interface)?;
    debug!("{} {} -> {}", node, interface, address);
    Ok(Assignment {
        node: node.to_string(),
        interface: interface.to_string(),
        address,
    })
}
