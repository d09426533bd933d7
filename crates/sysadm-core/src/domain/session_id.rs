//! Session identifiers.
//!
//! On the wire and in logs a session id is a decimal string (`"0"`, `"1"`,
//! ...).  Internally it is a `u64` so that the registry can keep ids in order
//! and derive the next free one without parsing strings.
//!
//! Ids are unique among the sessions that are *currently open*; once a
//! session closes its id may be handed out again.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of one open session.
///
/// Serialises as a decimal string so it matches the textual form used by
/// clients and log output.
///
/// # Example
///
/// ```rust
/// use sysadm_core::SessionId;
///
/// let id: SessionId = "42".parse().unwrap();
/// assert_eq!(id.to_string(), "42");
/// assert_eq!(id.next(), SessionId::new(43));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SessionId(u64);

/// Error returned when a string is not a valid decimal session id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session id '{0}': expected a non-negative integer")]
pub struct ParseSessionIdError(pub String);

impl SessionId {
    /// The id handed to the first session of an empty registry.
    pub const FIRST: SessionId = SessionId(0);

    /// Wraps a raw numeric id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the id immediately after this one.
    ///
    /// Saturates at `u64::MAX`; a server would need that many simultaneously
    /// open sessions before this matters.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ParseSessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ParseSessionIdError(s.to_string()))
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for SessionId {
    type Error = ParseSessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
