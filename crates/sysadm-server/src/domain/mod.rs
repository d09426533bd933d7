//! Domain layer: the server's configuration schema.
//!
//! Session ids, transport modes, events and the credential contract live in
//! `sysadm-core`; only what is specific to running this server lives here.

pub mod config;

pub use config::{load_config, ConfigError, ServerConfig};
