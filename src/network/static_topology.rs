//! In-memory topology: a fixed set of hosts and routers wired together
//! by point-to-point links.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::IpAddr;
use std::rc::Rc;

use crate::error::{SessionError, TopologyError};
use crate::message::Request;

use super::endpoint::{Endpoint, Hop};
use super::id::NodeId;
use super::session::Session;
use super::topology::{Interface, Node, NodeKind, Topology};

/// A topology built up front and then only read by the routing core.
///
/// Gateway resolution, first match wins:
///
/// 1. a connected interface whose subnet holds the destination and whose
///    neighbour owns it;
/// 2. the first hop toward the nearest node owning the destination,
///    found breadth-first over the links in port order;
/// 3. for hosts only, the first connected interface (the default
///    gateway). A router with no route to an address has no gateway,
///    so traffic to unowned addresses is refused instead of looping.
#[derive(Debug, Default)]
pub struct StaticTopology {
    nodes: BTreeMap<NodeId, Node>,
    next_session_id: Cell<u64>,
}

impl StaticTopology {
    pub fn new() -> Self {
        StaticTopology {
            nodes: BTreeMap::new(),
            next_session_id: Cell::new(0),
        }
    }

    // ── Construction ──────────────────────────────────────────────

    pub fn add_node(&mut self, id: impl Into<NodeId>, kind: NodeKind) -> Result<(), TopologyError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(TopologyError::DuplicateNode(id));
        }
        self.nodes.insert(id, Node::new(id, kind));
        Ok(())
    }

    pub fn add_host(&mut self, id: impl Into<NodeId>) -> Result<(), TopologyError> {
        self.add_node(id, NodeKind::Host)
    }

    pub fn add_router(&mut self, id: impl Into<NodeId>) -> Result<(), TopologyError> {
        self.add_node(id, NodeKind::Router)
    }

    /// Add an unconnected interface on `port` of `node`.
    pub fn add_interface(
        &mut self,
        node: impl Into<NodeId>,
        port: u32,
        ip: IpAddr,
        prefix_len: u8,
    ) -> Result<(), TopologyError> {
        let node = node.into();
        let n = self
            .nodes
            .get_mut(&node)
            .ok_or(TopologyError::UnknownNode(node))?;
        if n.interface(port).is_some() {
            return Err(TopologyError::PortInUse { node, port });
        }
        n.interfaces.push(Interface::new(port, ip, prefix_len));
        n.interfaces.sort_by_key(|i| i.index);
        Ok(())
    }

    /// Link `a:port_a` and `b:port_b` in both directions.
    pub fn connect(
        &mut self,
        a: impl Into<NodeId>,
        port_a: u32,
        b: impl Into<NodeId>,
        port_b: u32,
    ) -> Result<(), TopologyError> {
        let (a, b) = (a.into(), b.into());
        self.connect_one_way(a, port_a, b, port_b)?;
        self.connect_one_way(b, port_b, a, port_a)
    }

    /// Link `a:port_a` toward `b:port_b` only; `b` does not learn about `a`.
    pub fn connect_one_way(
        &mut self,
        a: impl Into<NodeId>,
        port_a: u32,
        b: impl Into<NodeId>,
        port_b: u32,
    ) -> Result<(), TopologyError> {
        let (a, b) = (a.into(), b.into());
        let remote_ip = self
            .nodes
            .get(&b)
            .ok_or(TopologyError::UnknownNode(b))?
            .interface(port_b)
            .ok_or(TopologyError::UnknownInterface { node: b, port: port_b })?
            .ip;
        let iface = self
            .nodes
            .get_mut(&a)
            .ok_or(TopologyError::UnknownNode(a))?
            .interfaces
            .iter_mut()
            .find(|i| i.index == port_a)
            .ok_or(TopologyError::UnknownInterface { node: a, port: port_a })?;
        iface.endpoint = Some(Endpoint::new(b, port_b, remote_ip));
        Ok(())
    }

    /// Tear a node down. Messages whose origin it was become undeliverable.
    pub fn remove_node(&mut self, id: impl Into<NodeId>) -> Option<Node> {
        self.nodes.remove(&id.into())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ── Sessions ──────────────────────────────────────────────────

    fn mint_session_id(&self) -> u64 {
        let id = self.next_session_id.get();
        self.next_session_id.set(id + 1);
        id
    }

    /// Build a session through `waypoints`, where each consecutive pair
    /// must be directly linked.
    ///
    /// The path is first attempted from the first waypoint to the last.
    /// If some link is missing in that direction, it is attempted from the
    /// last waypoint to the first and the resulting hops are reversed and
    /// swapped, so the session always starts at the first waypoint.
    pub fn create_session(
        &self,
        owner: &str,
        waypoints: &[NodeId],
        src_service: Option<String>,
        dst_service: Option<String>,
        parent: Option<Rc<Session>>,
    ) -> Result<Session, SessionError> {
        if waypoints.len() < 2 {
            return Err(SessionError::TooFewWaypoints(waypoints.len()));
        }
        if let Some(missing) = waypoints.iter().find(|id| !self.nodes.contains_key(id)) {
            return Err(SessionError::UnknownNode(*missing));
        }

        let path = match self.link_path(waypoints.iter().copied()) {
            Ok(path) => path,
            Err(forward_err) => {
                let mut reversed = self
                    .link_path(waypoints.iter().rev().copied())
                    .map_err(|_| forward_err)?;
                reversed.reverse();
                reversed.into_iter().map(Hop::swap).collect()
            }
        };

        Session::new(self.mint_session_id(), owner, path, src_service, dst_service, parent)
            .ok_or(SessionError::TooFewWaypoints(waypoints.len()))
    }

    fn link_path(&self, waypoints: impl Iterator<Item = NodeId>) -> Result<Vec<Hop>, SessionError> {
        let ids: Vec<NodeId> = waypoints.collect();
        ids.windows(2)
            .map(|pair| self.direct_hop(pair[0], pair[1]))
            .collect()
    }

    fn first_hop_toward(&self, from: NodeId, dst_ip: IpAddr) -> Option<(Endpoint, u32)> {
        let start = self.nodes.get(&from)?;
        let mut seen = BTreeSet::from([from]);
        let mut queue = VecDeque::new();
        for iface in &start.interfaces {
            if let Some(remote) = iface.endpoint {
                if seen.insert(remote.node) {
                    queue.push_back((remote.node, (remote, iface.index)));
                }
            }
        }

        while let Some((id, first)) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.has_ip(dst_ip) {
                return Some(first);
            }
            for remote in node.interfaces.iter().filter_map(|i| i.endpoint) {
                if seen.insert(remote.node) {
                    queue.push_back((remote.node, first));
                }
            }
        }
        None
    }

    fn direct_hop(&self, from: NodeId, to: NodeId) -> Result<Hop, SessionError> {
        let node = self.nodes.get(&from).ok_or(SessionError::UnknownNode(from))?;
        node.interfaces
            .iter()
            .find_map(|iface| {
                let remote = iface.endpoint?;
                (remote.node == to).then(|| Hop::new(Endpoint::new(from, iface.index, iface.ip), remote))
            })
            .ok_or(SessionError::Unreachable { from, to })
    }
}

impl Topology for StaticTopology {
    fn node_by_id(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn gateway_for(&self, node: NodeId, dst_ip: IpAddr) -> Option<(Endpoint, u32)> {
        let here = self.nodes.get(&node)?;
        let connected = || here.interfaces.iter().filter(|i| i.is_connected());
        let on_link = connected().find(|i| {
            i.contains(dst_ip)
                && i.endpoint
                    .and_then(|remote| self.nodes.get(&remote.node))
                    .is_some_and(|n| n.has_ip(dst_ip))
        });
        if let Some(iface) = on_link {
            return iface.endpoint.map(|gw| (gw, iface.index));
        }
        if let Some(hop) = self.first_hop_toward(node, dst_ip) {
            return Some(hop);
        }
        if here.kind != NodeKind::Host {
            return None;
        }
        let iface = connected().next()?;
        iface.endpoint.map(|gw| (gw, iface.index))
    }

    fn interface(&self, node: NodeId, port: u32) -> Option<Interface> {
        self.nodes.get(&node)?.interface(port).copied()
    }

    fn create_session_from(&self, request: &Request) -> Result<Session, SessionError> {
        let header = request.header();
        Session::new(
            self.mint_session_id(),
            header.src_service.clone(),
            header.path.clone(),
            Some(header.src_service.clone()),
            Some(header.dst_service.clone()),
            header.session.clone(),
        )
        .ok_or(SessionError::EmptyPath(header.id))
    }
}
