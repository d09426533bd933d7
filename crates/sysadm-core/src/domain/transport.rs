//! Transport selection.
//!
//! A server instance listens with exactly one transport for its whole run.
//! The selector is two-valued, so it is an enum rather than a boolean flag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which listener a server instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportMode {
    /// TLS-secured WebSocket (`wss://`).  TLS and the WebSocket upgrade both
    /// complete before a connection counts as accepted.
    #[default]
    #[serde(rename = "wss")]
    WebSocketSecure,
    /// Raw TLS over TCP.  The session speaks its own protocol directly on the
    /// TLS stream.
    #[serde(rename = "tls")]
    RawTls,
}

/// Error returned when a string names neither transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transport mode '{0}' (expected 'wss' or 'tls')")]
pub struct ParseTransportModeError(pub String);

impl TransportMode {
    /// The port this transport listens on when none is configured.
    pub const fn default_port(self) -> u16 {
        match self {
            Self::WebSocketSecure => 12150,
            Self::RawTls => 12151,
        }
    }

    /// Short name used in configuration files, CLI flags and log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebSocketSecure => "wss",
            Self::RawTls => "tls",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = ParseTransportModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wss" | "websocket" | "ws" => Ok(Self::WebSocketSecure),
            "tls" | "tcp" | "raw" => Ok(Self::RawTls),
            _ => Err(ParseTransportModeError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_websocket_secure() {
        assert_eq!(TransportMode::default(), TransportMode::WebSocketSecure);
    }

    #[test]
    fn test_default_ports_differ_per_transport() {
        assert_eq!(TransportMode::WebSocketSecure.default_port(), 12150);
        assert_eq!(TransportMode::RawTls.default_port(), 12151);
    }

    #[test]
    fn test_parse_accepts_aliases_case_insensitively() {
        assert_eq!("WSS".parse::<TransportMode>(), Ok(TransportMode::WebSocketSecure));
        assert_eq!("websocket".parse::<TransportMode>(), Ok(TransportMode::WebSocketSecure));
        assert_eq!("tcp".parse::<TransportMode>(), Ok(TransportMode::RawTls));
        assert_eq!(" tls ".parse::<TransportMode>(), Ok(TransportMode::RawTls));
    }

    #[test]
    fn test_parse_rejects_unknown_name() {
        let err = "quic".parse::<TransportMode>().unwrap_err();
        assert!(err.to_string().contains("quic"));
    }

    #[test]
    fn test_display_matches_config_spelling() {
        assert_eq!(TransportMode::RawTls.to_string(), "tls");
        let json = serde_json::to_string(&TransportMode::RawTls).unwrap();
        assert_eq!(json, "\"tls\"");
    }
}
