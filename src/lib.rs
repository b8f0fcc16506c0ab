//! # hopsim — Deterministic Message Routing Core
//!
//! The routing and scheduling core of a discrete-event network
//! simulator. For every simulated message it picks the next network hop,
//! attaches protocol metadata, and queues the message in a time-ordered
//! event queue. Services can also queue timeouts that wake them later.
//! No async, no threads, no wall-clock time: identical send sequences
//! always replay identically.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────┐
//! │          Simulation             │ ← run loop, pause / terminate
//! │  ┌──────────────────────────┐  │
//! │  │        Messaging          │  │ ← create / send / forward / sessions
//! │  │  ┌────────┐ ┌──────────┐ │  │
//! │  │  │ Router │ │ Metadata │ │  │ ← next hop, per-namespace providers
//! │  │  └────────┘ └──────────┘ │  │
//! │  │  ┌────────────────────┐  │  │
//! │  │  │     Scheduler      │  │  │ ← (deliver_at, sequence) min-heap
//! │  │  └────────────────────┘  │  │
//! │  └──────────────────────────┘  │
//! │  ┌──────────────────────────┐  │
//! │  │   Topology (trait)        │  │ ← nodes, gateways, sessions
//! │  └──────────────────────────┘  │
//! └────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use hopsim::{Action, Messaging, SendOutcome, StaticTopology, VirtualTime};
//!
//! let mut topo = StaticTopology::new();
//! topo.add_host(1).unwrap();
//! topo.add_router(2).unwrap();
//! topo.add_interface(1, 1, "10.0.0.1".parse().unwrap(), 24).unwrap();
//! topo.add_interface(2, 1, "10.0.0.254".parse().unwrap(), 24).unwrap();
//! topo.connect(1, 1, 2, 1).unwrap();
//!
//! let mut messaging = Messaging::new(topo);
//! let msg = messaging.create_request(
//!     1, "scanner", "10.0.0.5".parse().unwrap(), "ssh",
//!     Action::new("scan:ping"), None, None,
//! );
//! let outcome = messaging.send_message(msg, 3).unwrap();
//! assert!(matches!(outcome, SendOutcome::Queued { deliver_at, .. } if deliver_at == VirtualTime::new(3)));
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod messaging;
pub mod metadata;
pub mod network;
pub mod router;
pub mod scheduler;
pub mod simulation;
pub mod time;
pub mod trace;

// Re-exports for convenience.
pub use config::{PausePoint, SimConfig};
pub use error::{
    ConfigError, RoutingError, SchedulingError, SessionError, SimError, SimResult, TopologyError,
    ValidationError,
};
pub use event::{QueueEntry, Sequence, SequenceGen};
pub use message::{
    Action, AuthToken, Header, Message, MessageId, MessageKind, Request, Response, Status,
    StatusOrigin, StatusValue, Timeout,
};
pub use messaging::{Messaging, MessagingProxy, SendOutcome};
pub use metadata::{Metadata, MetadataProvider, MetadataRegistry};
pub use network::{
    Endpoint, Hop, Interface, Node, NodeId, NodeKind, Session, SessionCursor, StaticTopology,
    Topology, LOOPBACK,
};
pub use router::{route, RouteDecision};
pub use scheduler::{EventQueue, Scheduler};
pub use simulation::{DeliveryContext, DeliveryHandler, SimState, Simulation};
pub use time::VirtualTime;
pub use trace::{DeliveryTrace, TraceEntry};
