//! Infrastructure layer for rattle-server.
//!
//! The infrastructure layer handles all I/O and task spawning: accepting
//! connections, running one read loop per connection, and adapting concrete
//! transports to the application layer's frame traits.
//!
//! # Responsibilities
//!
//! - Binding the WebSocket listener and performing upgrade handshakes
//! - Serving each connection in its own Tokio task
//! - Firing connect/disconnect hooks
//! - Graceful shutdown through a shared running flag
//!
//! # What does NOT belong here?
//!
//! - Frame parsing and the upload state machine (that is `rattle-core`)
//! - Routing and handler invocation (that is the application layer)

pub mod connection_manager;
pub mod memory;
pub mod server;
pub mod ws_server;

pub use connection_manager::{lifecycle_hook, ConnectionManager, LifecycleHook, ERROR_TARGET};
pub use memory::{memory_listener, MemoryAcceptor, MemoryClient, MemoryConnector};
pub use server::RattleServer;
pub use ws_server::WsAcceptor;
