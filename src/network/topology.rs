use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::graph::RoutingGraph;
use crate::NodeId;
use crate::error::TopologyError;
use crate::types::{Endpoint, LOOPBACK_INTERFACE, Link, Node, NodeRole};

/// Topology document as written by the lab generator.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyFile {
    #[serde(default)]
    pub name: Option<String>,
    pub topology: TopologyDescription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopologyDescription {
    pub nodes: IndexMap<String, NodeDescription>,
    #[serde(default)]
    pub links: Vec<LinkDescription>,
}

/// Only the role is read; container settings stay with the lab runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeDescription {
    #[serde(default)]
    pub role: Option<RoleKind>,
    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Router,
    Host,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkDescription {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub name: Option<String>,
    nodes: IndexMap<NodeId, Node>,
    links: Vec<Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| TopologyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: TopologyFile = serde_yaml::from_str(&content)?;
        let mut topology = Self::from_description(&file.topology)?;
        topology.name = file.name;
        Ok(topology)
    }

    pub fn from_description(description: &TopologyDescription) -> Result<Self, TopologyError> {
        let mut topology = Self::new();

        for (id, node) in &description.nodes {
            let role = resolve_role(id, node)?;
            topology.add_node(Node {
                id: id.clone(),
                role,
            });
        }

        for link in &description.links {
            if link.endpoints.len() != 2 {
                return Err(TopologyError::EndpointCount(link.endpoints.len()));
            }
            let a = Endpoint::parse(&link.endpoints[0])?;
            let b = Endpoint::parse(&link.endpoints[1])?;
            topology.add_link(&a.node, &a.interface, &b.node, &b.interface)?;
        }

        debug!(
            "Loaded topology with {} nodes and {} links",
            topology.nodes.len(),
            topology.links.len()
        );

        Ok(topology)
    }

    /// Lab layout: routers `R0..Rn` in a ring, host `PCi` hanging off `Ri`.
    /// Interfaces are numbered per node starting at `eth1`.
    pub fn ring(routers: u32) -> Self {
        let mut topology = Self::new();
        for index in 0..routers {
            topology.add_node(Node::router(index));
        }
        for index in 0..routers {
            topology.add_node(Node::host(index));
        }

        let mut next_port: IndexMap<NodeId, u32> = IndexMap::new();
        let mut port = |node: &str| {
            let counter = next_port.entry(node.to_string()).or_insert(0);
            *counter += 1;
            format!("eth{}", counter)
        };

        // A single router has no ring to close.
        if routers > 1 {
            for index in 0..routers {
                let node = format!("R{}", index);
                let next = format!("R{}", (index + 1) % routers);
                let (a, b) = (port(&node), port(&next));
                topology.push_link(Endpoint::new(node, a), Endpoint::new(next, b));
            }
        }

        for index in 0..routers {
            let host = format!("PC{}", index);
            let router = format!("R{}", index);
            let (a, b) = (port(&host), port(&router));
            topology.push_link(Endpoint::new(host, a), Endpoint::new(router, b));
        }

        topology
    }

    fn push_link(&mut self, a: Endpoint, b: Endpoint) {
        if let Ok(link) = Link::new(a, b) {
            self.links.push(link);
        }
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Registers a bidirectional link between two known nodes.
    pub fn add_link(
        &mut self,
        node_a: &str,
        iface_a: &str,
        node_b: &str,
        iface_b: &str,
    ) -> Result<(), TopologyError> {
        for node in [node_a, node_b] {
            if !self.nodes.contains_key(node) {
                return Err(TopologyError::UnknownNode(node.to_string()));
            }
        }
        let link = Link::new(Endpoint::new(node_a, iface_a), Endpoint::new(node_b, iface_b))?;
        self.links.push(link);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn routers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|node| node.is_router())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn role_of(&self, id: &str) -> Option<NodeRole> {
        self.nodes.get(id).map(|node| node.role)
    }

    /// Builds the adjacency used for path search. Must run after every link
    /// is registered; addressing never changes the result.
    pub fn build_routing_graph(&self) -> RoutingGraph {
        let mut graph = RoutingGraph::new();

        for link in &self.links {
            let (a, b) = link.endpoints();
            graph.add_edge(&a.node, &b.node, &a.interface);
            graph.add_edge(&b.node, &a.node, &b.interface);
        }

        for node in self.nodes.values() {
            graph.ensure_node(&node.id);
        }

        for router in self.routers() {
            graph.add_edge(&router.id, &router.id, LOOPBACK_INTERFACE);
        }

        graph
    }
}

fn resolve_role(id: &str, node: &NodeDescription) -> Result<NodeRole, TopologyError> {
    let conventional = conventional_role(id);

    match (node.role, node.index) {
        (Some(RoleKind::Router), Some(index)) => Ok(NodeRole::Router(index)),
        (Some(RoleKind::Host), Some(index)) => Ok(NodeRole::Host(index)),
        (Some(kind), None) => match (kind, conventional) {
            (RoleKind::Router, Some(role)) => Ok(NodeRole::Router(role.index())),
            (RoleKind::Host, Some(role)) => Ok(NodeRole::Host(role.index())),
            _ => Err(TopologyError::UnknownRole(id.to_string())),
        },
        (None, _) => conventional.ok_or_else(|| TopologyError::UnknownRole(id.to_string())),
    }
}

/// `R<n>` names a router and `PC<n>` names a host.
fn conventional_role(id: &str) -> Option<NodeRole> {
    if let Some(index) = id.strip_prefix("PC") {
        return index.parse().ok().map(NodeRole::Host);
    }
    id.strip_prefix('R')?.parse().ok().map(NodeRole::Router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_ring_layout_matches_lab_generator() {
        let topology = Topology::ring(3);
        let links: Vec<String> = topology
            .links()
            .iter()
            .map(|link| {
                let (a, b) = link.endpoints();
                format!("{} {}", a, b)
            })
            .collect();

        assert_eq!(
            links,
            vec![
                "R0:eth1 R1:eth1",
                "R1:eth2 R2:eth1",
                "R2:eth2 R0:eth2",
                "PC0:eth1 R0:eth3",
                "PC1:eth1 R1:eth3",
                "PC2:eth1 R2:eth3",
            ]
        );
    }

    #[test]
    fn test_single_router_ring_has_no_self_link() {
        let topology = Topology::ring(1);
        assert_eq!(topology.links().len(), 1);
    }

    #[test]
    fn test_self_edge_iff_router() {
        let topology = Topology::ring(3);
        let graph = topology.build_routing_graph();

        for node in topology.nodes() {
            assert_eq!(graph.has_self_edge(&node.id), node.is_router(), "{}", node.id);
        }
    }

    #[test]
    fn test_graph_order_follows_links() {
        let graph = Topology::ring(3).build_routing_graph();
        let order: Vec<&str> = graph.nodes().map(String::as_str).collect();
        assert_eq!(order, vec!["R0", "R1", "R2", "PC0", "PC1", "PC2"]);
        // two ring links + one host link + loopback on every router, one link on every host
        assert_eq!(graph.edge_count(), 3 * 4 + 3);
    }

    #[test]
    fn test_isolated_node_is_still_in_graph() {
        let mut topology = Topology::new();
        topology.add_node(Node::router(0));
        topology.add_node(Node::host(0));

        let graph = topology.build_routing_graph();
        assert!(graph.contains("PC0"));
        assert!(graph.edges("PC0").is_empty());
        assert_eq!(graph.edges("R0").len(), 1);
    }

    #[test]
    fn test_add_link_rejects_unknown_and_self_links() {
        let mut topology = Topology::new();
        topology.add_node(Node::router(0));

        assert!(matches!(
            topology.add_link("R0", "eth1", "R9", "eth1"),
            Err(TopologyError::UnknownNode(node)) if node == "R9"
        ));
        assert!(matches!(
            topology.add_link("R0", "eth1", "R0", "eth2"),
            Err(TopologyError::SelfLink(_))
        ));
    }

    #[test]
    fn test_load_resolves_roles() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "name": "static_routing",
                "topology": {{
                    "nodes": {{
                        "R0": {{ "kind": "linux", "image": "quay.io/frrouting/frr:9.1.0" }},
                        "edge": {{ "role": "router", "index": 4 }},
                        "PC0": {{ "kind": "linux" }}
                    }},
                    "links": [
                        {{ "endpoints": ["R0:eth1", "edge:eth1"] }},
                        {{ "endpoints": ["PC0:eth1", "R0:eth2"] }}
                    ]
                }}
            }}"#
        )
        .unwrap();

        let topology = Topology::load(file.path()).unwrap();
        assert_eq!(topology.name.as_deref(), Some("static_routing"));
        assert_eq!(topology.role_of("R0"), Some(NodeRole::Router(0)));
        assert_eq!(topology.role_of("edge"), Some(NodeRole::Router(4)));
        assert_eq!(topology.role_of("PC0"), Some(NodeRole::Host(0)));
        assert_eq!(topology.links().len(), 2);
    }

    #[test]
    fn test_load_generator_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"name: static_routing
prefix: ''
mgmt:
    network: statics
    ipv4-subnet: 172.20.20.0/24
topology:
    nodes:
        R0:
            kind: linux
            image: quay.io/frrouting/frr:9.1.0
            binds:
            - ./.init/daemons:/etc/frr/daemons
            mgmt-ipv4: 172.20.20.2
        R1:
            kind: linux
            image: quay.io/frrouting/frr:9.1.0
            mgmt-ipv4: 172.20.20.3
        PC0:
            kind: linux
            image: frrouting/frr-debian:latest
            mgmt-ipv4: 172.20.20.4
        PC1:
            kind: linux
            image: frrouting/frr-debian:latest
            mgmt-ipv4: 172.20.20.5
    links:
    -   endpoints:
        - R0:eth1
        - R1:eth1
    -   endpoints:
        - R1:eth2
        - R0:eth2
    -   endpoints:
        - PC0:eth1
        - R0:eth3
    -   endpoints:
        - PC1:eth1
        - R1:eth3
"#,
        )
        .unwrap();

        let topology = Topology::load(file.path()).unwrap();
        assert_eq!(topology.name.as_deref(), Some("static_routing"));
        assert_eq!(
            topology.nodes().map(|node| node.id.as_str()).collect::<Vec<_>>(),
            ["R0", "R1", "PC0", "PC1"]
        );
        assert_eq!(topology.role_of("PC1"), Some(NodeRole::Host(1)));

        let links: Vec<String> = topology
            .links()
            .iter()
            .map(|link| {
                let (a, b) = link.endpoints();
                format!("{} {}", a, b)
            })
            .collect();
        assert_eq!(
            links,
            ["R0:eth1 R1:eth1", "R1:eth2 R0:eth2", "PC0:eth1 R0:eth3", "PC1:eth1 R1:eth3"]
        );
    }

    #[test]
    fn test_load_rejects_malformed_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"topology:\n    links: [\n").unwrap();
        assert!(matches!(
            Topology::load(file.path()),
            Err(TopologyError::Parse(_))
        ));
    }

    #[test]
    fn test_load_rejects_bad_links() {
        let nodes = IndexMap::from([
            ("R0".to_string(), NodeDescription::default()),
            ("R1".to_string(), NodeDescription::default()),
        ]);

        let three = TopologyDescription {
            nodes: nodes.clone(),
            links: vec![LinkDescription {
                endpoints: vec!["R0:eth1".into(), "R1:eth1".into(), "R1:eth2".into()],
            }],
        };
        assert!(matches!(
            Topology::from_description(&three),
            Err(TopologyError::EndpointCount(3))
        ));

        let malformed = TopologyDescription {
            nodes,
            links: vec![LinkDescription {
                endpoints: vec!["R0".into(), "R1:eth1".into()],
            }],
        };
        assert!(matches!(
            Topology::from_description(&malformed),
            Err(TopologyError::MalformedEndpoint(_))
        ));
    }

    #[test]
    fn test_unknown_role() {
        let description = TopologyDescription {
            nodes: IndexMap::from([("switch".to_string(), NodeDescription::default())]),
            links: Vec::new(),
        };
        assert!(matches!(
            Topology::from_description(&description),
            Err(TopologyError::UnknownRole(id)) if id == "switch"
        ));
    }
}
