pub mod algorithms;
pub mod config;
pub mod error;
pub mod exec;
pub mod network;
pub mod protocol;
pub mod routing;
pub mod session;
pub mod types;

pub use error::{Error, Result};

pub type NodeId = String;
pub type NetworkId = ipnet::Ipv4Net;
