//! Sessions — previously negotiated paths that override generic routing.

use std::rc::Rc;

use super::endpoint::{Endpoint, Hop};

/// A recorded path between two endpoints.
///
/// Sessions are immutable once created and shared through `Rc` by every
/// message that traverses them. The position of a message along the path
/// lives in the message's own [`SessionCursor`], never in the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: u64,
    owner: String,
    path: Vec<Hop>,
    src_service: Option<String>,
    dst_service: Option<String>,
    parent: Option<Rc<Session>>,
}

impl Session {
    /// Build a session over `path`. Returns `None` for an empty path.
    pub fn new(
        id: u64,
        owner: impl Into<String>,
        path: Vec<Hop>,
        src_service: Option<String>,
        dst_service: Option<String>,
        parent: Option<Rc<Session>>,
    ) -> Option<Self> {
        if path.is_empty() {
            return None;
        }
        Some(Session {
            id,
            owner: owner.into(),
            path,
            src_service,
            dst_service,
            parent,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn path(&self) -> &[Hop] {
        &self.path
    }

    pub fn src_service(&self) -> Option<&str> {
        self.src_service.as_deref()
    }

    pub fn dst_service(&self) -> Option<&str> {
        self.dst_service.as_deref()
    }

    pub fn parent(&self) -> Option<&Rc<Session>> {
        self.parent.as_ref()
    }

    /// Where the session was opened from.
    pub fn startpoint(&self) -> Endpoint {
        self.path[0].src
    }

    /// The far end of the session.
    pub fn endpoint(&self) -> Endpoint {
        self.path[self.path.len() - 1].dst
    }

    /// Number of hops in the recorded path.
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Always `false`; a session cannot be built over an empty path.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// The `index`-th hop walking from startpoint to endpoint.
    pub fn forward_hop(&self, index: usize) -> Option<Hop> {
        self.path.get(index).copied()
    }

    /// The `index`-th hop walking from endpoint back to startpoint.
    pub fn reverse_hop(&self, index: usize) -> Option<Hop> {
        let n = self.path.len();
        if index >= n {
            return None;
        }
        Some(self.path[n - 1 - index].swap())
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "S#{}({} → {}, {} hops)",
            self.id,
            self.startpoint(),
            self.endpoint(),
            self.path.len()
        )
    }
}

/// A message's position along its session path.
///
/// Requests walk the path forward, responses walk it backward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCursor {
    next: usize,
}

impl SessionCursor {
    pub fn new() -> Self {
        SessionCursor { next: 0 }
    }

    /// A cursor whose next hop is the `position`-th one.
    pub fn at(position: usize) -> Self {
        SessionCursor { next: position }
    }

    /// Index of the hop the cursor yields next.
    pub fn position(&self) -> usize {
        self.next
    }

    /// Yield the next forward hop and advance.
    pub fn next_forward(&mut self, session: &Session) -> Option<Hop> {
        let hop = session.forward_hop(self.next)?;
        self.next += 1;
        Some(hop)
    }

    /// Yield the next reverse hop and advance.
    pub fn next_reverse(&mut self, session: &Session) -> Option<Hop> {
        let hop = session.reverse_hop(self.next)?;
        self.next += 1;
        Some(hop)
    }
}
