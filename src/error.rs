//! Structured error types for the routing core.
//!
//! Every fallible public API returns one of the concern-specific enums
//! below, or `SimError` when several concerns meet (the messaging facade).
//! Nothing is retried or swallowed: errors go straight back to the
//! immediate caller, who decides whether to drop, log, or abort.

use std::net::IpAddr;

use crate::message::MessageId;
use crate::network::NodeId;
use crate::time::VirtualTime;

/// Next-hop resolution failures. Fatal for the send attempt that hit them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// No gateway on the origin node leads toward a non-loopback destination.
    #[error("no gateway on node {node} to route toward {dst_ip}")]
    NoGateway { node: NodeId, dst_ip: IpAddr },

    /// The topology resolved a gateway port that has no interface behind it.
    #[error("node {node} has no interface on port {port}")]
    NoInterface { node: NodeId, port: u32 },

    /// The message's session has no further hops to yield.
    #[error("session {session} has no further hops for message {message}")]
    SessionExhausted { session: u64, message: MessageId },

    /// A session-less response walked its whole return path.
    #[error("response {message} has no return hops left")]
    ReturnPathExhausted { message: MessageId },

    /// Timeouts are delivered where they were set and never routed.
    #[error("timeout {message} cannot be routed")]
    NotRoutable { message: MessageId },
}

/// Caller errors detected while constructing messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// `create_response` was handed something other than a request.
    #[error("message {0} is not a request")]
    NotARequest(MessageId),
}

/// Event-queue and clock failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulingError {
    /// Simulated time cannot flow backward.
    #[error("negative delay {0}")]
    NegativeDelay(i64),

    /// `send_message` was called again on a message that is already queued or delivered.
    #[error("message {0} was already sent")]
    AlreadySent(MessageId),

    /// `forward` was called on a message that never went through `send_message`.
    #[error("message {0} was never sent")]
    NotSent(MessageId),

    /// `pop_earliest` on an empty queue.
    #[error("event queue is empty")]
    EmptyQueue,

    /// `now + delay` does not fit in the clock.
    #[error("delivery time overflows: now={now}, delay={delay}")]
    TimeOverflow { now: VirtualTime, delay: i64 },

    /// The clock was asked to move backward.
    #[error("cannot move clock from {current} back to {requested}")]
    NonCausal {
        requested: VirtualTime,
        current: VirtualTime,
    },
}

/// Session materialization failures reported by a topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The request has not travelled anywhere yet, so there is no path to record.
    #[error("message {0} has no recorded path to build a session from")]
    EmptyPath(MessageId),

    /// A session needs at least a start and an end waypoint.
    #[error("a session needs at least two waypoints, got {0}")]
    TooFewWaypoints(usize),

    /// A waypoint does not exist in the topology.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// No direct connection between two adjacent waypoints, in either direction.
    #[error("no connection between {from} and {to}")]
    Unreachable { from: NodeId, to: NodeId },
}

/// Topology construction failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {node} has no interface on port {port}")]
    UnknownInterface { node: NodeId, port: u32 },

    #[error("port {port} on node {node} is already in use")]
    PortInUse { node: NodeId, port: u32 },
}

/// Malformed run configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: String, value: String },

    /// A pause point was not of the form `node.service`.
    #[error("invalid pause point {0:?}, expected <node>.<service>")]
    InvalidPausePoint(String),
}

/// The top-level error type of the messaging facade and the run loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
