//! Endpoints and hops — the two value types every route is made of.

use std::net::{IpAddr, Ipv4Addr};

use super::id::NodeId;

/// The loopback address that short-circuits gateway resolution.
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// One side of a network hop: a port on a node, with the IP bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Endpoint {
    pub node: NodeId,
    pub port: u32,
    pub ip: IpAddr,
}

impl Endpoint {
    pub fn new(node: impl Into<NodeId>, port: u32, ip: IpAddr) -> Self {
        Endpoint {
            node: node.into(),
            port,
            ip,
        }
    }

    /// An origin whose outbound interface has not been resolved yet.
    pub fn unbound(node: impl Into<NodeId>) -> Self {
        Endpoint::new(node, 0, IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// The intra-node loopback endpoint of `node`.
    pub fn loopback(node: impl Into<NodeId>) -> Self {
        Endpoint::new(node, 0, LOOPBACK)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.node, self.port, self.ip)
    }
}

/// A single hop: departure endpoint and arrival endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Hop {
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl Hop {
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        Hop { src, dst }
    }

    /// The same link traversed in the opposite direction.
    pub fn swap(self) -> Self {
        Hop {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl std::fmt::Display for Hop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.src, self.dst)
    }
}
