/// Next-hop resolution.
///
/// Pure decision logic: given a message and a read-only topology, fill
/// in the message's next hop (and, on the first hop, its source address
/// and departure interface). No queueing, no metadata, no I/O.
///
/// Branches, first match wins:
///
/// 1. a next hop is already set → nothing to do;
/// 2. request with a session → the session's next forward hop;
/// 3. response → back along the request's route, then through the
///    session once the response has reached the session's far end;
/// 4. request without a session → loopback shortcut, or the gateway the
///    topology picks for the destination.
///
/// Timeouts are never routed.
///
/// A session always overrides gateway resolution, even if its recorded
/// path no longer matches the topology.
use std::rc::Rc;

use crate::error::RoutingError;
use crate::message::{Header, Message, Response};
use crate::network::{Endpoint, Hop, Session, Topology, LOOPBACK};

/// Which branch produced the next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// The message already had a next hop.
    AlreadyRouted,
    /// Taken from the session the message travels in.
    Session,
    /// Taken backward from the route the request travelled.
    ReturnPath,
    /// Intra-node delivery to 127.0.0.1.
    Loopback,
    /// Through the gateway the topology resolved.
    Gateway,
}

/// Compute and set the next hop of `message`.
pub fn route<T: Topology + ?Sized>(
    message: &mut Message,
    topology: &T,
) -> Result<RouteDecision, RoutingError> {
    if message.next_hop().is_some() {
        return Ok(RouteDecision::AlreadyRouted);
    }

    match message {
        Message::Request(req) => match req.header.session.as_ref().map(Rc::clone) {
            Some(session) => route_in_session(&mut req.header, &session),
            None => route_request(&mut req.header, topology),
        },
        Message::Response(resp) => route_response(resp),
        Message::Timeout(t) => Err(RoutingError::NotRoutable { message: t.header.id }),
    }
}

fn route_in_session(header: &mut Header, session: &Session) -> Result<RouteDecision, RoutingError> {
    let hop = header
        .cursor
        .next_forward(session)
        .ok_or(RoutingError::SessionExhausted {
            session: session.id(),
            message: header.id,
        })?;

    if header.is_first_hop() && hop.src.node == header.origin.node {
        header.origin = hop.src;
    }
    header.src_ip = Some(session.startpoint().ip);
    header.set_next_hop(hop);
    Ok(RouteDecision::Session)
}

fn route_response(resp: &mut Response) -> Result<RouteDecision, RoutingError> {
    let session = resp.header.session.as_ref().map(Rc::clone);

    if let Some(s) = &session {
        if !resp.in_session && resp.header.current == s.endpoint() {
            resp.in_session = true;
        }
    }

    if !resp.in_session {
        if let Some(hop) = resp.next_return_hop() {
            resp.header.set_next_hop(hop);
            return Ok(RouteDecision::ReturnPath);
        }
    }

    // Out of return hops: the rest of the way back is the session.
    let Some(session) = session else {
        return Err(RoutingError::ReturnPathExhausted {
            message: resp.header.id,
        });
    };
    let exhausted = RoutingError::SessionExhausted {
        session: session.id(),
        message: resp.header.id,
    };

    let hop = session
        .reverse_hop(resp.header.cursor.position())
        .ok_or_else(|| exhausted.clone())?;
    // The session only picks the response up where it stands.
    if hop.src.node != resp.header.current.node {
        return Err(exhausted);
    }
    resp.header.cursor.next_reverse(&session);
    resp.in_session = true;
    resp.header.set_next_hop(hop);
    Ok(RouteDecision::Session)
}

fn route_request<T: Topology + ?Sized>(
    header: &mut Header,
    topology: &T,
) -> Result<RouteDecision, RoutingError> {
    let node = header.current.node;

    if header.dst_ip == LOOPBACK {
        let here = Endpoint::loopback(node);
        header.src_ip = Some(LOOPBACK);
        header.set_next_hop(Hop::new(here, here));
        return Ok(RouteDecision::Loopback);
    }

    let (_, port) = topology
        .gateway_for(node, header.dst_ip)
        .ok_or(RoutingError::NoGateway {
            node,
            dst_ip: header.dst_ip,
        })?;
    let iface = topology
        .interface(node, port)
        .ok_or(RoutingError::NoInterface { node, port })?;
    let remote = iface.endpoint.ok_or(RoutingError::NoInterface { node, port })?;

    let departure = Endpoint::new(node, port, iface.ip);
    if header.is_first_hop() {
        header.src_ip = Some(iface.ip);
        header.origin = departure;
    }
    header.set_next_hop(Hop::new(departure, remote));
    Ok(RouteDecision::Gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::net::IpAddr;

    use crate::error::SessionError;
    use crate::message::{Action, MessageId, Request, Status};
    use crate::network::{Interface, Node, NodeId, SessionCursor};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    /// Node 1 has a single interface on port 1 linked to node 2, and
    /// counts how often it is asked for a gateway.
    struct OneGateway {
        node: Node,
        lookups: Cell<u32>,
    }

    impl OneGateway {
        fn new() -> Self {
            let mut node = Node::new(1, crate::network::NodeKind::Host);
            let mut iface = Interface::new(1, ip("10.0.0.1"), 24);
            iface.endpoint = Some(Endpoint::new(2, 1, ip("10.0.0.1")));
            node.interfaces.push(iface);
            OneGateway {
                node,
                lookups: Cell::new(0),
            }
        }
    }

    impl Topology for OneGateway {
        fn node_by_id(&self, id: NodeId) -> Option<&Node> {
            (id == self.node.id).then_some(&self.node)
        }

        fn gateway_for(&self, node: NodeId, _dst_ip: IpAddr) -> Option<(Endpoint, u32)> {
            self.lookups.set(self.lookups.get() + 1);
            (node == self.node.id).then(|| (Endpoint::new(2, 1, ip("10.0.0.1")), 1))
        }

        fn interface(&self, node: NodeId, port: u32) -> Option<Interface> {
            (node == self.node.id).then(|| self.node.interface(port).copied()).flatten()
        }

        fn create_session_from(&self, request: &Request) -> Result<Session, SessionError> {
            Err(SessionError::EmptyPath(request.header.id))
        }
    }

    /// Fails the test if the router ever asks it for a gateway.
    struct NoGatewayAllowed;

    impl Topology for NoGatewayAllowed {
        fn node_by_id(&self, _id: NodeId) -> Option<&Node> {
            None
        }

        fn gateway_for(&self, _node: NodeId, _dst_ip: IpAddr) -> Option<(Endpoint, u32)> {
            panic!("gateway lookup must not happen for session traffic");
        }

        fn interface(&self, _node: NodeId, _port: u32) -> Option<Interface> {
            panic!("interface lookup must not happen for session traffic");
        }

        fn create_session_from(&self, request: &Request) -> Result<Session, SessionError> {
            Err(SessionError::EmptyPath(request.header.id))
        }
    }

    /// Resolves every gateway to port 1 of node 1 and answers interface
    /// lookups with `iface`.
    struct DanglingPort {
        node: Node,
        iface: Option<Interface>,
    }

    impl DanglingPort {
        fn new(iface: Option<Interface>) -> Self {
            DanglingPort {
                node: Node::new(1, crate::network::NodeKind::Host),
                iface,
            }
        }
    }

    impl Topology for DanglingPort {
        fn node_by_id(&self, id: NodeId) -> Option<&Node> {
            (id == self.node.id).then_some(&self.node)
        }

        fn gateway_for(&self, _node: NodeId, _dst_ip: IpAddr) -> Option<(Endpoint, u32)> {
            Some((Endpoint::new(2, 1, ip("10.0.0.1")), 1))
        }

        fn interface(&self, _node: NodeId, _port: u32) -> Option<Interface> {
            self.iface
        }

        fn create_session_from(&self, request: &Request) -> Result<Session, SessionError> {
            Err(SessionError::EmptyPath(request.header.id))
        }
    }

    fn request(origin: u64, dst: &str, session: Option<Rc<Session>>) -> Message {
        Message::Request(Request {
            header: Header::new(
                MessageId::new(1),
                Endpoint::unbound(origin),
                "client".into(),
                ip(dst),
                "api".into(),
                session,
                None,
            ),
            action: Action::new("scan:ping"),
            metadata: None,
        })
    }

    fn response_at(at: Endpoint, return_path: Vec<Hop>, session: Option<Rc<Session>>) -> Message {
        let mut header = Header::new(
            MessageId::new(2),
            at,
            "api".into(),
            ip("10.0.0.2"),
            "client".into(),
            session,
            None,
        );
        header.src_ip = Some(at.ip);
        Message::Response(Response {
            header,
            request_id: MessageId::new(1),
            status: Status::ok(),
            content: None,
            in_session: false,
            return_path,
            return_taken: 0,
        })
    }

    fn session() -> Rc<Session> {
        let path = vec![
            Hop::new(Endpoint::new(1, 0, ip("10.0.0.2")), Endpoint::new(2, 0, ip("10.0.0.1"))),
            Hop::new(Endpoint::new(2, 1, ip("10.0.1.1")), Endpoint::new(3, 0, ip("10.0.1.2"))),
        ];
        Rc::new(Session::new(9, "client", path, None, None, None).unwrap())
    }

    #[test]
    fn test_gateway_route_sets_origin_and_src_ip() {
        let topo = OneGateway::new();
        let mut msg = request(1, "10.0.0.5", None);

        assert_eq!(route(&mut msg, &topo), Ok(RouteDecision::Gateway));

        let expected = Hop::new(Endpoint::new(1, 1, ip("10.0.0.1")), Endpoint::new(2, 1, ip("10.0.0.1")));
        assert_eq!(msg.next_hop(), Some(expected));
        assert_eq!(msg.src_ip(), Some(ip("10.0.0.1")));
        assert_eq!(msg.origin(), expected.src);
        assert_eq!(msg.current(), expected.src);
        assert_eq!(msg.path(), &[expected]);
    }

    #[test]
    fn test_already_routed_is_noop() {
        let topo = OneGateway::new();
        let mut msg = request(1, "10.0.0.5", None);
        route(&mut msg, &topo).unwrap();
        let before = msg.next_hop();

        assert_eq!(route(&mut msg, &topo), Ok(RouteDecision::AlreadyRouted));
        assert_eq!(msg.next_hop(), before);
        assert_eq!(msg.path().len(), 1);
        assert_eq!(topo.lookups.get(), 1);
    }

    #[test]
    fn test_no_gateway_is_fatal() {
        let topo = OneGateway::new();
        let mut msg = request(7, "10.0.0.5", None);
        assert_eq!(
            route(&mut msg, &topo),
            Err(RoutingError::NoGateway {
                node: NodeId::new(7),
                dst_ip: ip("10.0.0.5"),
            })
        );
        assert!(msg.next_hop().is_none());
    }

    #[test]
    fn test_gateway_port_without_interface() {
        let mut msg = request(1, "10.0.0.5", None);
        assert_eq!(
            route(&mut msg, &DanglingPort::new(None)),
            Err(RoutingError::NoInterface {
                node: NodeId::new(1),
                port: 1,
            })
        );
        assert!(msg.next_hop().is_none());
        assert!(msg.path().is_empty());
    }

    #[test]
    fn test_unconnected_gateway_interface() {
        let unlinked = Interface::new(1, ip("10.0.0.1"), 24);
        assert!(unlinked.endpoint.is_none());

        let mut msg = request(1, "10.0.0.5", None);
        assert_eq!(
            route(&mut msg, &DanglingPort::new(Some(unlinked))),
            Err(RoutingError::NoInterface {
                node: NodeId::new(1),
                port: 1,
            })
        );
        assert!(msg.next_hop().is_none());
    }

    #[test]
    fn test_loopback_short_circuits() {
        for origin in [1, 2, 77] {
            let mut msg = request(origin, "127.0.0.1", None);
            assert_eq!(route(&mut msg, &NoGatewayAllowed), Ok(RouteDecision::Loopback));
            let hop = msg.next_hop().unwrap();
            assert_eq!(hop.src, hop.dst);
            assert_eq!(hop.src, Endpoint::loopback(origin));
            assert_eq!(msg.src_ip(), Some(LOOPBACK));
        }
    }

    #[test]
    fn test_session_request_never_resolves_gateway() {
        let s = session();
        let mut msg = request(1, "10.0.1.2", Some(Rc::clone(&s)));

        assert_eq!(route(&mut msg, &NoGatewayAllowed), Ok(RouteDecision::Session));
        assert_eq!(msg.next_hop(), s.forward_hop(0));
        assert_eq!(msg.src_ip(), Some(ip("10.0.0.2")));
        assert_eq!(msg.origin(), s.startpoint());

        // Second leg, still through the session.
        msg.arrive();
        assert_eq!(route(&mut msg, &NoGatewayAllowed), Ok(RouteDecision::Session));
        assert_eq!(msg.next_hop(), s.forward_hop(1));

        msg.arrive();
        assert_eq!(
            route(&mut msg, &NoGatewayAllowed),
            Err(RoutingError::SessionExhausted {
                session: 9,
                message: MessageId::new(1),
            })
        );
    }

    #[test]
    fn test_response_at_session_end_enters_session() {
        let s = session();
        let mut msg = response_at(s.endpoint(), Vec::new(), Some(Rc::clone(&s)));

        assert_eq!(route(&mut msg, &NoGatewayAllowed), Ok(RouteDecision::Session));
        assert!(msg.as_response().unwrap().in_session());
        assert_eq!(msg.next_hop(), s.reverse_hop(0));

        msg.arrive();
        route(&mut msg, &NoGatewayAllowed).unwrap();
        assert_eq!(msg.next_hop().map(|h| h.dst), Some(s.startpoint()));

        msg.arrive();
        assert!(matches!(
            route(&mut msg, &NoGatewayAllowed),
            Err(RoutingError::SessionExhausted { .. })
        ));
    }

    #[test]
    fn test_response_walks_return_path_before_session() {
        let s = session();
        let beyond = Hop::new(s.endpoint(), Endpoint::new(4, 0, ip("10.0.2.2")));
        let mut msg = response_at(beyond.dst, vec![beyond], Some(Rc::clone(&s)));

        assert_eq!(route(&mut msg, &NoGatewayAllowed), Ok(RouteDecision::ReturnPath));
        assert!(!msg.as_response().unwrap().in_session());
        assert_eq!(msg.next_hop(), Some(beyond.swap()));

        msg.arrive();
        assert_eq!(msg.current(), s.endpoint());
        assert_eq!(route(&mut msg, &NoGatewayAllowed), Ok(RouteDecision::Session));
        assert!(msg.as_response().unwrap().in_session());
    }

    #[test]
    fn test_mid_session_response_starts_where_it_is() {
        let s = session();
        // The request took only the first of two session hops.
        let at = s.forward_hop(0).unwrap().dst;
        let mut msg = response_at(at, Vec::new(), Some(Rc::clone(&s)));
        msg.header_mut().cursor = SessionCursor::at(1);

        assert_eq!(route(&mut msg, &NoGatewayAllowed), Ok(RouteDecision::Session));
        let hop = msg.next_hop().unwrap();
        assert_eq!(hop, s.forward_hop(0).unwrap().swap());
        assert_eq!(hop.src.node, NodeId::new(2));
        assert_eq!(msg.current(), at);

        msg.arrive();
        assert!(matches!(
            route(&mut msg, &NoGatewayAllowed),
            Err(RoutingError::SessionExhausted { .. })
        ));
    }

    #[test]
    fn test_response_off_session_is_refused() {
        let s = session();
        let mut msg = response_at(Endpoint::new(5, 0, ip("10.0.5.5")), Vec::new(), Some(Rc::clone(&s)));

        assert_eq!(
            route(&mut msg, &NoGatewayAllowed),
            Err(RoutingError::SessionExhausted {
                session: 9,
                message: MessageId::new(2),
            })
        );
        assert!(msg.next_hop().is_none());
        assert!(!msg.as_response().unwrap().in_session());
        assert_eq!(msg.current().node, NodeId::new(5));
    }

    #[test]
    fn test_timeout_is_not_routed() {
        let mut msg = Message::Timeout(crate::message::Timeout {
            header: Header::new(
                MessageId::new(3),
                Endpoint::unbound(1),
                "api".into(),
                ip("0.0.0.0"),
                "api".into(),
                None,
                None,
            ),
            started_at: crate::time::VirtualTime::ZERO,
            duration: 5,
            parameter: None,
        });
        assert_eq!(
            route(&mut msg, &NoGatewayAllowed),
            Err(RoutingError::NotRoutable {
                message: MessageId::new(3),
            })
        );
    }

    #[test]
    fn test_sessionless_response_exhausts_return_path() {
        let h = Hop::new(Endpoint::new(1, 1, ip("10.0.0.1")), Endpoint::new(2, 1, ip("10.0.0.1")));
        let mut msg = response_at(h.dst, vec![h], None);

        assert_eq!(route(&mut msg, &NoGatewayAllowed), Ok(RouteDecision::ReturnPath));
        assert_eq!(msg.next_hop(), Some(h.swap()));
        msg.arrive();
        assert_eq!(
            route(&mut msg, &NoGatewayAllowed),
            Err(RoutingError::ReturnPathExhausted {
                message: MessageId::new(2),
            })
        );
    }

    #[test]
    fn test_forwarded_request_keeps_sender_address() {
        let topo = OneGateway::new();
        let mut msg = request(1, "10.0.0.5", None);
        route(&mut msg, &topo).unwrap();
        let src_ip = msg.src_ip();
        let origin = msg.origin();

        // Pretend the message came back to node 1 and is routed again.
        msg.arrive();
        msg.header_mut().current = origin;
        route(&mut msg, &topo).unwrap();
        assert_eq!(msg.src_ip(), src_ip);
        assert_eq!(msg.origin(), origin);
        assert_eq!(msg.path().len(), 2);
    }
}
