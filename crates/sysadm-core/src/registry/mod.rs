//! ConnectionRegistry: the authoritative set of currently open sessions.
//!
//! The registry maps each [`SessionId`] to the value the server keeps for
//! that session (a task handle, a test double, ...).  It is generic over that
//! value so the bookkeeping rules can be tested without sockets.
//!
//! # Invariants
//!
//! - Every key equals the id reported by its own entry ([`Identified::id`]).
//! - No two live entries share an id.
//! - [`ConnectionRegistry::next_id`] never returns an id that is currently
//!   registered.
//!
//! # Id allocation (for beginners)
//!
//! A fresh id is "one more than the largest live id", or `0` when the
//! registry is empty.  With live ids `{0, 1, 3}` the next id is `4`; the gap
//! at `2` is not reused.  Ids are therefore unique among *open* sessions
//! only: once every session has closed, numbering starts over at `0`.
//!
//! The entries live in a `BTreeMap`, which keeps keys sorted.  Finding the
//! largest key is a walk down the right edge of the tree, O(log n), instead
//! of scanning every open session on each accept.
//!
//! # Concurrency
//!
//! The registry is a plain owned value with `&mut self` mutators.  The server
//! gives it to exactly one task, which serialises every insert, removal and
//! id allocation; no lock is needed around it.

use std::collections::btree_map::{self, BTreeMap};

use thiserror::Error;
use tracing::{debug, trace};

use crate::domain::session_id::SessionId;

/// Anything the registry can hold: it must know its own id.
pub trait Identified {
    /// The id this entry was created with.
    fn id(&self) -> SessionId;
}

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// An entry with this id is already registered.
    #[error("session {0} is already registered")]
    DuplicateId(SessionId),
}

/// Map from session id to the per-session value `S`.
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    sessions: BTreeMap<SessionId, S>,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: BTreeMap::new(),
        }
    }
}

impl<S: Identified> ConnectionRegistry<S> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an id guaranteed distinct from every id currently registered.
    ///
    /// Policy: largest live id plus one, or `"0"` when empty.
    pub fn next_id(&self) -> SessionId {
        self.sessions
            .keys()
            .next_back()
            .map_or(SessionId::FIRST, |max| max.next())
    }

    /// Inserts `session` keyed by its own id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if that id is already live.
    /// The registry is left unchanged in that case.
    pub fn register(&mut self, session: S) -> Result<(), RegistryError> {
        let id = session.id();
        match self.sessions.entry(id) {
            btree_map::Entry::Occupied(_) => Err(RegistryError::DuplicateId(id)),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(session);
                debug!(session_id = %id, open = self.sessions.len(), "session registered");
                Ok(())
            }
        }
    }

    /// Removes and returns the session with `id`, if present.
    ///
    /// Removing an id that is not registered is not an error; a duplicate
    /// close notification simply finds nothing to remove.
    pub fn deregister(&mut self, id: SessionId) -> Option<S> {
        let removed = self.sessions.remove(&id);
        if removed.is_some() {
            debug!(session_id = %id, open = self.sessions.len(), "session deregistered");
        } else {
            trace!(session_id = %id, "deregister for unknown session ignored");
        }
        removed
    }

    /// Returns `true` if `id` is currently registered.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Returns the session registered under `id`.
    pub fn get(&self, id: SessionId) -> Option<&S> {
        self.sessions.get(&id)
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` when no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.keys().copied()
    }

    /// Iterates over every open session in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &S)> + '_ {
        self.sessions.iter().map(|(id, s)| (*id, s))
    }

    /// Removes every session and returns them, leaving the registry empty.
    pub fn drain(&mut self) -> Vec<S> {
        std::mem::take(&mut self.sessions).into_values().collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
