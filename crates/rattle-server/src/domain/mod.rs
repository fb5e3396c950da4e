//! Domain layer for rattle-server.
//!
//! Holds the runtime configuration.  Nothing here touches sockets or spawns
//! tasks, which keeps it trivially testable.

pub mod config;

pub use config::{ConfigError, ServerConfig};
