//! Error types for topology loading, route synthesis and vtysh sessions.

use std::io;
use std::path::PathBuf;

use ipnet::Ipv4Net;
use thiserror::Error;

use crate::NodeId;
use crate::session::Phase;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Run-level error. Every variant aborts the run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("addressing error: {0}")]
    Addressing(#[from] AddressingError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// A failure tagged with the phase and node it happened on
    #[error("{phase} failed on {node}: {source}")]
    Phase {
        phase: Phase,
        node: NodeId,
        #[source]
        source: Box<Error>,
    },

    /// Address planning or route synthesis failed in `phase`
    #[error("{phase} failed: {source}")]
    Planning {
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn planning(phase: Phase, source: impl Into<Error>) -> Self {
        Error::Planning {
            phase,
            source: Box::new(source.into()),
        }
    }

    pub fn in_phase(phase: Phase, node: impl Into<NodeId>, source: impl Into<Error>) -> Self {
        Error::Phase {
            phase,
            node: node.into(),
            source: Box::new(source.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cannot read topology {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse topology: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("cannot infer role of node {0}")]
    UnknownRole(String),

    #[error("malformed endpoint {0:?}, expected node:interface")]
    MalformedEndpoint(String),

    #[error("link has {0} endpoints, expected 2")]
    EndpointCount(usize),

    #[error("link references unknown node {0}")]
    UnknownNode(String),

    #[error("link connects {0} to itself")]
    SelfLink(String),

    #[error("subnet {subnet} already bound on {node}")]
    DuplicateSubnet { node: NodeId, subnet: Ipv4Net },
}

#[derive(Debug, Error)]
pub enum AddressingError {
    #[error("transit address space exhausted after {0} links")]
    TransitExhausted(u32),

    #[error("index {index} of {node} does not fit the address plan")]
    IndexOutOfRange { node: NodeId, index: u32 },

    #[error("invalid prefix length: {0}")]
    InvalidPrefix(#[from] ipnet::PrefixLenError),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no path from {from} to {to}")]
    Unreachable { from: NodeId, to: NodeId },

    #[error("{0} has no bound subnet to advertise")]
    NoAdvertisedSubnet(NodeId),

    #[error("{node} shares no subnet with {anchor}")]
    NoSharedSubnet { node: NodeId, anchor: NodeId },
}

/// Frame-level errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown stream identifier 0x{0:02X}")]
    UnknownStream(u8),

    #[error("frame header too short: expected {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum DriverError {
    /// The shell never accepted the command; the session is unusable
    #[error("write timed out on {node} sending {command:?}")]
    WriteTimeout { node: NodeId, command: String },

    #[error("frame on {node} truncated: expected {expected} bytes, got {received}")]
    TruncatedFrame {
        node: NodeId,
        expected: usize,
        received: usize,
    },

    #[error("malformed frame on {node}: {source}")]
    Frame {
        node: NodeId,
        #[source]
        source: FrameError,
    },

    #[error("i/o error on {node}: {source}")]
    Io {
        node: NodeId,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot spawn shell on {node}: {source}")]
    Spawn {
        node: NodeId,
        #[source]
        source: io::Error,
    },

    #[error("cannot release shell on {node}: {source}")]
    Release {
        node: NodeId,
        #[source]
        source: io::Error,
    },

    #[error("{0} produced no startup banner")]
    MissingBanner(NodeId),

    #[error("{node} cannot {operation} while {state}")]
    InvalidState {
        node: NodeId,
        state: String,
        operation: &'static str,
    },

    #[error("{node} reported {message:?} before {command:?}")]
    ShellDiagnostic {
        node: NodeId,
        command: String,
        message: String,
    },

    #[error("no session for node {0}")]
    UnknownNode(NodeId),
}
