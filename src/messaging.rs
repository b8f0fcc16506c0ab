//! The messaging facade: build, route, describe and schedule messages.
//!
//! This is the only place that wires the Router, the metadata registry
//! and the scheduler together. Node logic talks to it directly, or
//! through a [`MessagingProxy`] bound to one node and service.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;

use crate::config::{PausePoint, SimConfig};
use crate::error::{RoutingError, SchedulingError, SimResult, ValidationError};
use crate::event::Sequence;
use crate::message::{Action, AuthToken, Header, Message, MessageId, Request, Response, Status, Timeout};
use crate::metadata::{MetadataProvider, MetadataRegistry};
use crate::network::{Endpoint, NodeId, Session, SessionCursor, Topology};
use crate::router::{self, RouteDecision};
use crate::scheduler::Scheduler;
use crate::time::VirtualTime;

/// What happened to a message handed to [`Messaging::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for delivery.
    Queued {
        deliver_at: VirtualTime,
        sequence: Sequence,
    },
    /// The sending node does not exist; the message was discarded.
    Dropped,
}

impl SendOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued { .. })
    }
}

/// Messaging facade over a topology.
///
/// Owns the scheduler, so every message of a run draws its sequence from
/// one counter.
#[derive(Debug)]
pub struct Messaging<T: Topology> {
    topology: T,
    scheduler: Scheduler,
    metadata: MetadataRegistry,
    next_message_id: u64,
    pause_on_request: BTreeSet<PausePoint>,
    pause_on_response: BTreeSet<PausePoint>,
    pause_requested: bool,
}

impl<T: Topology> Messaging<T> {
    pub fn new(topology: T) -> Self {
        Messaging {
            topology,
            scheduler: Scheduler::new(),
            metadata: MetadataRegistry::new(),
            next_message_id: 0,
            pause_on_request: BTreeSet::new(),
            pause_on_response: BTreeSet::new(),
            pause_requested: false,
        }
    }

    /// Start the clock and register the pause points from `config`.
    pub fn with_config(topology: T, config: &SimConfig) -> Self {
        let mut messaging = Messaging::new(topology);
        messaging.scheduler = Scheduler::starting_at(config.start_time);
        messaging.pause_on_request.extend(config.pause_on_request.iter().cloned());
        messaging.pause_on_response.extend(config.pause_on_response.iter().cloned());
        messaging
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn topology(&self) -> &T {
        &self.topology
    }

    /// Mutable topology access, for changes between deliveries.
    pub fn topology_mut(&mut self) -> &mut T {
        &mut self.topology
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.scheduler.now()
    }

    pub fn metadata_registry(&self) -> &MetadataRegistry {
        &self.metadata
    }

    /// Number of queued deliveries.
    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    fn mint_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    // ── Construction ──────────────────────────────────────────────

    /// Build an unsent, unrouted request departing from `origin`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_request(
        &mut self,
        origin: impl Into<NodeId>,
        src_service: impl Into<String>,
        dst_ip: IpAddr,
        dst_service: impl Into<String>,
        action: Action,
        session: Option<Rc<Session>>,
        auth: Option<AuthToken>,
    ) -> Message {
        let header = Header::new(
            self.mint_message_id(),
            Endpoint::unbound(origin),
            src_service.into(),
            dst_ip,
            dst_service.into(),
            session,
            auth,
        );
        Message::Request(Request {
            header,
            action,
            metadata: None,
        })
    }

    /// Build the response to `request`.
    ///
    /// The response departs from where the request currently is, toward
    /// the request's source, with addresses and services swapped. Without
    /// an explicit `session` it travels back through the request's one,
    /// starting from the hop the request last took. Hops the request took
    /// after leaving its session are walked back first.
    pub fn create_response(
        &mut self,
        request: &Message,
        status: Status,
        content: Option<String>,
        session: Option<Rc<Session>>,
        auth: Option<AuthToken>,
    ) -> Result<Message, ValidationError> {
        let Message::Request(req) = request else {
            return Err(ValidationError::NotARequest(request.id()));
        };
        let rh = &req.header;

        let skip = if rh.session.is_some() { rh.cursor.position() } else { 0 };
        let return_path = rh.path.iter().skip(skip).copied().collect();

        // Walking the request's own session back, the first reverse hop is
        // the last forward hop the request took.
        let cursor = match &rh.session {
            Some(own) if session.as_ref().map_or(true, |s| Rc::ptr_eq(s, own)) => {
                SessionCursor::at(own.len().saturating_sub(rh.cursor.position()))
            }
            _ => SessionCursor::new(),
        };

        let mut header = Header::new(
            self.mint_message_id(),
            rh.current,
            rh.dst_service.clone(),
            rh.src_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            rh.src_service.clone(),
            session.or_else(|| rh.session.clone()),
            auth,
        );
        header.src_ip = Some(rh.dst_ip);
        header.cursor = cursor;

        Ok(Message::Response(Response {
            header,
            request_id: rh.id,
            status,
            content,
            in_session: false,
            return_path,
            return_taken: 0,
        }))
    }

    /// Materialize the route `request` has travelled as a session.
    ///
    /// Every call builds a new session; nothing is cached.
    pub fn open_session(&self, request: &Message) -> SimResult<Rc<Session>> {
        let req = request
            .as_request()
            .ok_or(ValidationError::NotARequest(request.id()))?;
        let session = self.topology.create_session_from(req)?;
        tracing::debug!(%session, message = %request.id(), "session opened");
        Ok(Rc::new(session))
    }

    // ── Sending ───────────────────────────────────────────────────

    /// Resolve the next hop of `message` without sending it.
    ///
    /// On failure the caller still owns the message and may fix the
    /// topology and retry. A routed message keeps its next hop when it is
    /// later handed to [`send_message`](Self::send_message) or
    /// [`forward`](Self::forward).
    pub fn route_message(&self, message: &mut Message) -> Result<RouteDecision, RoutingError> {
        router::route(message, &self.topology)
    }

    /// Route `message`, attach metadata to requests and queue it for
    /// delivery `delay` ticks from now.
    ///
    /// A message can be sent once. Use [`forward`](Self::forward) to move
    /// a delivered message on. A message that fails to route is consumed;
    /// call [`route_message`](Self::route_message) first to keep it.
    pub fn send_message(&mut self, mut message: Message, delay: i64) -> SimResult<SendOutcome> {
        if delay < 0 {
            return Err(SchedulingError::NegativeDelay(delay).into());
        }
        if message.is_sent() {
            return Err(SchedulingError::AlreadySent(message.id()).into());
        }

        let origin = message.origin().node;
        if self.topology.node_by_id(origin).is_none() {
            tracing::warn!(node = %origin, message = %message.id(), "sending node does not exist, message dropped");
            return Ok(SendOutcome::Dropped);
        }

        let decision = self.route_message(&mut message)?;

        if let Message::Request(req) = &mut message {
            let mut metadata = self.metadata.describe(&req.action);
            metadata.src_ip = req.header.src_ip;
            metadata.dst_ip = Some(req.header.dst_ip);
            metadata.dst_service = Some(req.header.dst_service.clone());
            req.metadata = Some(metadata);
        }

        let pause = matches!(message, Message::Request(_))
            && self.pause_on_request.contains(&PausePoint::new(origin, message.src_service()));

        message.header_mut().sent = true;
        let outcome = self.push(message, delay, Some(decision))?;

        if pause {
            tracing::info!(node = %origin, "pause requested on send");
            self.request_pause();
        }
        Ok(outcome)
    }

    /// Send a delivered message on toward its next hop.
    ///
    /// The message must already be sent and have arrived (see
    /// [`Message::arrive`]). Metadata is left as it was attached on the
    /// first send.
    pub fn forward(&mut self, mut message: Message, delay: i64) -> SimResult<SendOutcome> {
        if delay < 0 {
            return Err(SchedulingError::NegativeDelay(delay).into());
        }
        if !message.is_sent() {
            return Err(SchedulingError::NotSent(message.id()).into());
        }

        let here = message.current().node;
        if self.topology.node_by_id(here).is_none() {
            tracing::warn!(node = %here, message = %message.id(), "forwarding node does not exist, message dropped");
            return Ok(SendOutcome::Dropped);
        }

        let decision = self.route_message(&mut message)?;
        self.push(message, delay, Some(decision))
    }

    /// Wake `service` on `node` after `delay` ticks.
    ///
    /// The timeout is never routed; the run loop hands it straight to the
    /// handler at `node`. It shares the sequence counter with messages, so
    /// it is ordered against them like any other delivery.
    pub fn schedule_timeout(
        &mut self,
        node: impl Into<NodeId>,
        service: impl Into<String>,
        delay: i64,
        parameter: Option<String>,
    ) -> SimResult<SendOutcome> {
        let node = node.into();
        let duration = u64::try_from(delay).map_err(|_| SchedulingError::NegativeDelay(delay))?;
        if self.topology.node_by_id(node).is_none() {
            tracing::warn!(node = %node, "timeout set on a missing node, dropped");
            return Ok(SendOutcome::Dropped);
        }

        let service = service.into();
        let mut header = Header::new(
            self.mint_message_id(),
            Endpoint::unbound(node),
            service.clone(),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            service,
            None,
            None,
        );
        header.sent = true;
        let timeout = Message::Timeout(Timeout {
            header,
            started_at: self.now(),
            duration,
            parameter,
        });
        self.push(timeout, delay, None)
    }

    fn push(&mut self, message: Message, delay: i64, decision: Option<RouteDecision>) -> SimResult<SendOutcome> {
        tracing::debug!(%message, route = ?decision, delay, "message resolved");
        let (deliver_at, sequence) = self.scheduler.schedule(message, delay)?;
        Ok(SendOutcome::Queued {
            deliver_at,
            sequence,
        })
    }

    // ── Pausing ───────────────────────────────────────────────────

    /// Pause the run loop after every request `service` on `node` sends.
    pub fn register_pause(&mut self, node: impl Into<NodeId>, service: impl Into<String>) -> bool {
        self.pause_on_request.insert(PausePoint::new(node, service))
    }

    /// Pause the run loop whenever a response is delivered to `service` on `node`.
    pub fn register_pause_on_response(&mut self, node: impl Into<NodeId>, service: impl Into<String>) -> bool {
        self.pause_on_response.insert(PausePoint::new(node, service))
    }

    /// Is `message` a response arriving at a registered pause point?
    pub fn pauses_on_delivery(&self, message: &Message) -> bool {
        match message {
            Message::Response(r) => self
                .pause_on_response
                .contains(&PausePoint::new(r.header.current.node, r.header.dst_service.as_str())),
            Message::Request(_) | Message::Timeout(_) => false,
        }
    }

    pub(crate) fn request_pause(&mut self) {
        self.pause_requested = true;
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested
    }

    /// Consume a pending pause request.
    pub fn take_pause_request(&mut self) -> bool {
        std::mem::take(&mut self.pause_requested)
    }

    // ── Metadata ──────────────────────────────────────────────────

    /// Register a provider for an action namespace. The first one wins.
    pub fn register_metadata_provider<P>(&mut self, namespace: impl Into<String>, provider: P) -> bool
    where
        P: MetadataProvider + 'static,
    {
        self.metadata.register(namespace, Box::new(provider))
    }

    // ── Proxies ───────────────────────────────────────────────────

    /// A handle that sends as `service` on `node`.
    pub fn proxy(&mut self, node: impl Into<NodeId>, service: impl Into<String>) -> MessagingProxy<'_, T> {
        MessagingProxy {
            messaging: self,
            node: node.into(),
            service: service.into(),
        }
    }
}

// ── Messaging Proxy ──────────────────────────────────────────────────

/// Facade bound to one node and service.
///
/// Requests built through it depart from that node and carry that
/// service as their source.
pub struct MessagingProxy<'a, T: Topology> {
    messaging: &'a mut Messaging<T>,
    node: NodeId,
    service: String,
}

impl<'a, T: Topology> MessagingProxy<'a, T> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn now(&self) -> VirtualTime {
        self.messaging.now()
    }

    pub fn create_request(
        &mut self,
        dst_ip: IpAddr,
        dst_service: impl Into<String>,
        action: Action,
        session: Option<Rc<Session>>,
        auth: Option<AuthToken>,
    ) -> Message {
        self.messaging.create_request(
            self.node,
            self.service.clone(),
            dst_ip,
            dst_service,
            action,
            session,
            auth,
        )
    }

    pub fn create_response(
        &mut self,
        request: &Message,
        status: Status,
        content: Option<String>,
        session: Option<Rc<Session>>,
        auth: Option<AuthToken>,
    ) -> Result<Message, ValidationError> {
        self.messaging.create_response(request, status, content, session, auth)
    }

    pub fn open_session(&self, request: &Message) -> SimResult<Rc<Session>> {
        self.messaging.open_session(request)
    }

    pub fn send_message(&mut self, message: Message, delay: i64) -> SimResult<SendOutcome> {
        self.messaging.send_message(message, delay)
    }

    pub fn forward(&mut self, message: Message, delay: i64) -> SimResult<SendOutcome> {
        self.messaging.forward(message, delay)
    }

    /// Wake this proxy's service after `delay` ticks.
    pub fn schedule_timeout(&mut self, delay: i64, parameter: Option<String>) -> SimResult<SendOutcome> {
        self.messaging
            .schedule_timeout(self.node, self.service.clone(), delay, parameter)
    }
}
