use crate::NodeId;
use crate::network::RoutingGraph;

const UNREACHED: u32 = u32::MAX;

/// Distances and predecessors from one source, indexed by graph position.
#[derive(Debug)]
struct SearchTree {
    distances: Vec<u32>,
    previous: Vec<Option<usize>>,
}

/// Unit-weight Dijkstra with a linear scan for the closest unvisited node.
///
/// Ties go to the node inserted first, so the same graph always yields the
/// same tree. O(V²), which is fine for lab-sized topologies.
fn search(graph: &RoutingGraph, source: usize) -> SearchTree {
    let count = graph.node_count();
    let mut distances = vec![UNREACHED; count];
    let mut previous = vec![None; count];
    let mut visited = vec![false; count];
    distances[source] = 0;

    loop {
        let mut current = None;
        for index in 0..count {
            if visited[index] {
                continue;
            }
            match current {
                Some(best) if distances[best] <= distances[index] => {}
                _ => current = Some(index),
            }
        }

        let Some(current) = current else { break };
        if distances[current] == UNREACHED {
            break;
        }
        visited[current] = true;

        let Some(node) = graph.node_at(current) else { break };
        for edge in graph.edges(node) {
            let Some(neighbor) = graph.position(&edge.neighbor) else {
                continue;
            };
            let alt = distances[current] + 1;
            if alt < distances[neighbor] {
                distances[neighbor] = alt;
                previous[neighbor] = Some(current);
            }
        }
    }

    SearchTree {
        distances,
        previous,
    }
}

/// Shortest path from `source` to `destination`, both ends included.
///
/// Empty when the destination is unreachable, when either node is not in the
/// graph, or when `source == destination`; callers never ask for the latter.
pub fn shortest_path(graph: &RoutingGraph, source: &str, destination: &str) -> Vec<NodeId> {
    let (Some(from), Some(to)) = (graph.position(source), graph.position(destination)) else {
        return Vec::new();
    };
    let tree = search(graph, from);

    let mut path = Vec::new();
    let mut current = to;
    while let Some(prev) = tree.previous[current] {
        path.push(current);
        current = prev;
    }
    if !path.is_empty() {
        path.push(current);
    }

    path.into_iter()
        .rev()
        .filter_map(|index| graph.node_at(index).cloned())
        .collect()
}

/// Hop count between two nodes, if one exists.
pub fn distance(graph: &RoutingGraph, source: &str, destination: &str) -> Option<u32> {
    let from = graph.position(source)?;
    let to = graph.position(destination)?;
    let tree = search(graph, from);
    Some(tree.distances[to]).filter(|hops| *hops != UNREACHED)
}
