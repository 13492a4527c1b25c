pub mod dijkstra;

pub use dijkstra::{distance, shortest_path};
