/// Simulated network messages.
///
/// A message is a `Request`, a `Response`, or a `Timeout` a service set
/// for itself. All carry a common routing [`Header`]; the variants add
/// what only one side needs (the action and metadata of a request, the
/// status and return path of a response, the wakeup parameter of a
/// timeout). The Router matches on the variant exhaustively, so every
/// routing branch is checked at compile time.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::rc::Rc;

use crate::metadata::Metadata;
use crate::network::{Endpoint, Hop, NodeId, Session, SessionCursor};
use crate::time::VirtualTime;

// ── Message ID ────────────────────────────────────────────────────────

/// Identifier minted by the messaging facade for every message it builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageId(u64);

impl MessageId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        MessageId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M{}", self.0)
    }
}

// ── Action ────────────────────────────────────────────────────────────

/// What a request asks the destination to do.
///
/// Identified by `namespace:verb`, e.g. `scan:active_service_discovery`.
/// The namespace selects the metadata provider.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Action {
    id: String,
    pub parameters: BTreeMap<String, String>,
}

impl Action {
    pub fn new(id: impl Into<String>) -> Self {
        Action {
            id: id.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Everything before the first `:`, or the whole id if there is none.
    pub fn namespace(&self) -> &str {
        self.id.split_once(':').map_or(self.id.as_str(), |(ns, _)| ns)
    }

    /// Everything after the first `:`; empty if there is no namespace separator.
    pub fn verb(&self) -> &str {
        self.id.split_once(':').map_or("", |(_, verb)| verb)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

// ── Status ────────────────────────────────────────────────────────────

/// Which layer produced a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusOrigin {
    Network,
    Node,
    Service,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusValue {
    Success,
    Failure,
    Error,
}

/// Outcome carried by a response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Status {
    pub origin: StatusOrigin,
    pub value: StatusValue,
    pub detail: Option<String>,
}

impl Status {
    pub fn new(origin: StatusOrigin, value: StatusValue) -> Self {
        Status {
            origin,
            value,
            detail: None,
        }
    }

    /// A successful service-level outcome.
    pub fn ok() -> Self {
        Status::new(StatusOrigin::Service, StatusValue::Success)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{:?}", self.origin, self.value)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Opaque credential carried along with a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AuthToken(pub String);

// ── Header ────────────────────────────────────────────────────────────

/// Routing state shared by requests and responses.
#[derive(Debug, Clone)]
pub struct Header {
    pub(crate) id: MessageId,
    pub(crate) origin: Endpoint,
    pub(crate) current: Endpoint,
    pub(crate) next_hop: Option<Hop>,
    pub(crate) path: Vec<Hop>,
    pub(crate) session: Option<Rc<Session>>,
    pub(crate) cursor: SessionCursor,
    pub(crate) src_ip: Option<IpAddr>,
    pub(crate) dst_ip: IpAddr,
    pub(crate) src_service: String,
    pub(crate) dst_service: String,
    pub(crate) auth: Option<AuthToken>,
    pub(crate) sent: bool,
}

impl Header {
    pub(crate) fn new(
        id: MessageId,
        origin: Endpoint,
        src_service: String,
        dst_ip: IpAddr,
        dst_service: String,
        session: Option<Rc<Session>>,
        auth: Option<AuthToken>,
    ) -> Self {
        Header {
            id,
            origin,
            current: origin,
            next_hop: None,
            path: Vec::new(),
            session,
            cursor: SessionCursor::new(),
            src_ip: None,
            dst_ip,
            src_service,
            dst_service,
            auth,
            sent: false,
        }
    }

    /// Record `hop` as the next hop: the message now sits at `hop.src`
    /// and the hop is appended to the accumulated path.
    pub(crate) fn set_next_hop(&mut self, hop: Hop) {
        self.current = hop.src;
        self.next_hop = Some(hop);
        self.path.push(hop);
    }

    /// `true` until the first hop has been recorded.
    pub(crate) fn is_first_hop(&self) -> bool {
        self.path.is_empty()
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn current(&self) -> Endpoint {
        self.current
    }

    pub fn path(&self) -> &[Hop] {
        &self.path
    }

    pub fn session(&self) -> Option<&Rc<Session>> {
        self.session.as_ref()
    }

    pub fn src_service(&self) -> &str {
        &self.src_service
    }

    pub fn dst_service(&self) -> &str {
        &self.dst_service
    }
}

// ── Request / Response ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) header: Header,
    pub(crate) action: Action,
    pub(crate) metadata: Option<Metadata>,
}

impl Request {
    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) header: Header,
    pub(crate) request_id: MessageId,
    pub(crate) status: Status,
    pub(crate) content: Option<String>,
    pub(crate) in_session: bool,
    /// Hops the request took outside its session, walked backward.
    pub(crate) return_path: Vec<Hop>,
    pub(crate) return_taken: usize,
}

impl Response {
    pub fn request_id(&self) -> MessageId {
        self.request_id
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn in_session(&self) -> bool {
        self.in_session
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Next hop back along the request's session-less route, if any remain.
    pub(crate) fn next_return_hop(&mut self) -> Option<Hop> {
        let remaining = self.return_path.len().checked_sub(self.return_taken + 1)?;
        self.return_taken += 1;
        Some(self.return_path[remaining].swap())
    }
}

/// A wakeup scheduled by a service on its own node.
///
/// Never routed: it is delivered where it was set, after `duration` ticks.
#[derive(Debug, Clone)]
pub struct Timeout {
    pub(crate) header: Header,
    pub(crate) started_at: VirtualTime,
    pub(crate) duration: u64,
    pub(crate) parameter: Option<String>,
}

impl Timeout {
    /// When the timeout was set.
    pub fn started_at(&self) -> VirtualTime {
        self.started_at
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Opaque value handed back to the service on wakeup.
    pub fn parameter(&self) -> Option<&str> {
        self.parameter.as_deref()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

// ── Message ───────────────────────────────────────────────────────────

/// Discriminant of a [`Message`], for logs and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageKind {
    Request,
    Response,
    Timeout,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Request => f.write_str("request"),
            MessageKind::Response => f.write_str("response"),
            MessageKind::Timeout => f.write_str("timeout"),
        }
    }
}

/// An in-flight request or response, or a pending timeout.
#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
    Timeout(Timeout),
}

impl Message {
    pub(crate) fn header(&self) -> &Header {
        match self {
            Message::Request(r) => &r.header,
            Message::Response(r) => &r.header,
            Message::Timeout(t) => &t.header,
        }
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        match self {
            Message::Request(r) => &mut r.header,
            Message::Response(r) => &mut r.header,
            Message::Timeout(t) => &mut t.header,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request(_) => MessageKind::Request,
            Message::Response(_) => MessageKind::Response,
            Message::Timeout(_) => MessageKind::Timeout,
        }
    }

    pub fn id(&self) -> MessageId {
        self.header().id
    }

    pub fn origin(&self) -> Endpoint {
        self.header().origin
    }

    pub fn current(&self) -> Endpoint {
        self.header().current
    }

    pub fn next_hop(&self) -> Option<Hop> {
        self.header().next_hop
    }

    pub fn path(&self) -> &[Hop] {
        &self.header().path
    }

    pub fn session(&self) -> Option<&Rc<Session>> {
        self.header().session.as_ref()
    }

    pub fn src_ip(&self) -> Option<IpAddr> {
        self.header().src_ip
    }

    pub fn dst_ip(&self) -> IpAddr {
        self.header().dst_ip
    }

    pub fn src_service(&self) -> &str {
        &self.header().src_service
    }

    pub fn dst_service(&self) -> &str {
        &self.header().dst_service
    }

    pub fn auth(&self) -> Option<&AuthToken> {
        self.header().auth.as_ref()
    }

    pub fn is_sent(&self) -> bool {
        self.header().sent
    }

    /// Metadata attached at send time. Only requests carry any.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Message::Request(r) => r.metadata.as_ref(),
            Message::Response(_) | Message::Timeout(_) => None,
        }
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_timeout(&self) -> Option<&Timeout> {
        match self {
            Message::Timeout(t) => Some(t),
            _ => None,
        }
    }

    /// Node the message will arrive at once its next hop is taken.
    pub fn next_node(&self) -> Option<NodeId> {
        self.header().next_hop.map(|hop| hop.dst.node)
    }

    /// Take the pending hop: move to its arrival endpoint and clear it.
    ///
    /// Returns the new location, or `None` if no hop was pending.
    pub fn arrive(&mut self) -> Option<Endpoint> {
        let header = self.header_mut();
        let hop = header.next_hop.take()?;
        header.current = hop.dst;
        Some(hop.dst)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let h = self.header();
        write!(
            f,
            "{} {} [{}:{} → {}:{}] at {}",
            self.kind(),
            h.id,
            h.src_ip.map_or_else(|| "?".to_string(), |ip| ip.to_string()),
            h.src_service,
            h.dst_ip,
            h.dst_service,
            h.current
        )?;
        if let Some(hop) = h.next_hop {
            write!(f, ", next {}", hop)?;
        }
        match self {
            Message::Request(r) => write!(f, ", action {}", r.action),
            Message::Response(r) => write!(f, ", status {}", r.status),
            Message::Timeout(t) => write!(f, ", after {} ticks", t.duration),
        }
    }
}
