//! The simulated network as the routing core sees it.
//!
//! Nodes, their interfaces, and the links between them live behind the
//! [`Topology`] trait; the core only ever reads them. Routes are made of
//! [`Endpoint`]s and [`Hop`]s, and previously negotiated routes are
//! captured as [`Session`]s.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`id`] | [`NodeId`] newtype |
//! | [`endpoint`] | [`Endpoint`], [`Hop`], [`LOOPBACK`] |
//! | [`session`] | [`Session`], [`SessionCursor`] |
//! | [`topology`] | [`Topology`] trait, [`Node`], [`Interface`] |
//! | [`static_topology`] | [`StaticTopology`] in-memory implementation |

pub mod endpoint;
pub mod id;
pub mod session;
pub mod static_topology;
pub mod topology;

pub use endpoint::{Endpoint, Hop, LOOPBACK};
pub use id::NodeId;
pub use session::{Session, SessionCursor};
pub use static_topology::StaticTopology;
pub use topology::{Interface, Node, NodeKind, Topology};
