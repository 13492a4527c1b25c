pub mod address_map;
pub mod addressing;
pub mod graph;
pub mod topology;

pub use address_map::{AddressMap, Binding};
pub use addressing::{AddressPlan, Assignment};
pub use graph::{GraphEdge, RoutingGraph};
pub use topology::Topology;
