//! Broadcast events.
//!
//! An [`Event`] is produced by the process-wide event source (service state
//! changes, dispatcher progress, life-preserver snapshots, ...) and routed to
//! every live session.  The server never looks inside `payload`; it only
//! copies and forwards it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `(kind, payload)` pair published by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event category, e.g. `"dispatcher"` or `"life-preserver"`.
    pub kind: String,
    /// Opaque JSON payload.
    pub payload: Value,
}

impl Event {
    /// Creates an event of the given kind.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}
