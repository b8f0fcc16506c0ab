//! The topology seam: everything the routing core needs to know about
//! nodes, interfaces, and gateways, and nothing more.

use std::net::IpAddr;

use crate::error::SessionError;
use crate::message::Request;

use super::endpoint::Endpoint;
use super::id::NodeId;
use super::session::Session;

/// Whether a node only terminates traffic or also forwards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    Host,
    Router,
}

/// A numbered network interface of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Interface {
    /// Port number on the owning node.
    pub index: u32,
    pub ip: IpAddr,
    /// Length of the network prefix, in bits.
    pub prefix_len: u8,
    /// The endpoint on the other side of the link, if connected.
    pub endpoint: Option<Endpoint>,
}

impl Interface {
    pub fn new(index: u32, ip: IpAddr, prefix_len: u8) -> Self {
        Interface {
            index,
            ip,
            prefix_len,
            endpoint: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Does `addr` fall inside this interface's subnet?
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.ip, addr) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                let len = u32::from(self.prefix_len.min(32));
                let mask = u32::MAX.checked_shl(32 - len).unwrap_or(0);
                u32::from(a) & mask == u32::from(b) & mask
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                let len = u32::from(self.prefix_len.min(128));
                let mask = u128::MAX.checked_shl(128 - len).unwrap_or(0);
                u128::from(a) & mask == u128::from(b) & mask
            }
            _ => false,
        }
    }
}

/// A simulated node as seen by the routing core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub interfaces: Vec<Interface>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Node {
            id: id.into(),
            kind,
            interfaces: Vec::new(),
        }
    }

    pub fn interface(&self, port: u32) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.index == port)
    }

    /// Does any interface of this node own `ip`?
    pub fn has_ip(&self, ip: IpAddr) -> bool {
        self.interfaces.iter().any(|i| i.ip == ip)
    }
}

/// Read-only view of the simulated network consumed by the Router and
/// the messaging facade.
pub trait Topology {
    /// Look a node up; `None` if it does not exist (or was torn down).
    fn node_by_id(&self, id: NodeId) -> Option<&Node>;

    /// The gateway endpoint and local outbound port through which `node`
    /// reaches `dst_ip`, or `None` if it has no route.
    fn gateway_for(&self, node: NodeId, dst_ip: IpAddr) -> Option<(Endpoint, u32)>;

    /// The interface behind `port` on `node`.
    fn interface(&self, node: NodeId, port: u32) -> Option<Interface>;

    /// Materialize a new session from the route `request` has taken.
    fn create_session_from(&self, request: &Request) -> Result<Session, SessionError>;
}
