use indexmap::IndexSet;
use log::debug;

use crate::NodeId;
use crate::algorithms::shortest_path;
use crate::error::RoutingError;
use crate::network::{AddressMap, RoutingGraph};
use crate::types::{Route, RouteInstall};

/// Every ordered pair of distinct nodes, in graph order.
pub fn node_pairs(graph: &RoutingGraph) -> impl Iterator<Item = (&NodeId, &NodeId)> {
    graph.nodes().flat_map(move |source| {
        graph
            .nodes()
            .filter(move |destination| *destination != source)
            .map(move |destination| (source, destination))
    })
}

/// Routes needed so `source` and every hop after it can reach the advertised
/// subnet of `destination`.
///
/// The path is walked back from the destination. `anchor` is the hop closest
/// to the destination already known to reach its subnet; each hop that does
/// not own the subnet itself gets a route through the anchor, on the subnet
/// the two share.
pub fn synthesize(
    graph: &RoutingGraph,
    addresses: &AddressMap,
    source: &str,
    destination: &str,
) -> Result<Vec<RouteInstall>, RoutingError> {
    let path = shortest_path(graph, source, destination);
    let Some(target) = path.last() else {
        return Err(RoutingError::Unreachable {
            from: source.to_string(),
            to: destination.to_string(),
        });
    };
    let target_subnet = addresses
        .advertised_subnet(target)
        .ok_or_else(|| RoutingError::NoAdvertisedSubnet(target.clone()))?;

    let mut anchor = target;
    let mut installs = Vec::new();

    for node in path.iter().rev().skip(1) {
        if addresses.owns(node, &target_subnet) {
            anchor = node;
            continue;
        }

        let shared = addresses.shared_subnets(node, anchor);
        let gateway = shared
            .first()
            .and_then(|subnet| Some((addresses.binding(anchor, subnet)?, addresses.binding(node, subnet)?)));
        let Some((theirs, ours)) = gateway else {
            return Err(RoutingError::NoSharedSubnet {
                node: node.clone(),
                anchor: anchor.clone(),
            });
        };

        let route = Route {
            destination: target_subnet,
            gateway: theirs.address,
            interface: ours.interface.clone(),
        };
        debug!("{}: {}", node, route);
        installs.push(RouteInstall {
            node: node.clone(),
            route,
        });

        anchor = node;
    }

    Ok(installs)
}

/// Routes for every ordered pair of distinct nodes.
///
/// Paths through the same hop toward the same destination yield the same
/// install; each one is kept once, in the order first produced.
pub fn synthesize_all(
    graph: &RoutingGraph,
    addresses: &AddressMap,
) -> Result<Vec<RouteInstall>, RoutingError> {
    let mut installs = IndexSet::new();
    for (source, destination) in node_pairs(graph) {
        installs.extend(synthesize(graph, addresses, source, destination)?);
    }
    debug!("{} distinct route installs", installs.len());
    Ok(installs.into_iter().collect())
}
