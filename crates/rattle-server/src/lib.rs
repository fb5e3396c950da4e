//! rattle-server library crate.
//!
//! A bidirectional RPC server: clients send `Controller.Method` frames over a
//! persistent connection, the server routes them to registered handlers, and
//! handlers answer, push, or broadcast frames back.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser / client (text frames over WebSocket)
//!         ↕
//! [rattle-server]
//!   ├── domain/           ServerConfig (TOML + defaults)
//!   ├── application/      Registry, Dispatcher, Responder, transport traits
//!   └── infrastructure/
//!         ├── connection_manager/  per-connection read loop + lifecycle hooks
//!         ├── server/              RattleServer: register → serve
//!         ├── ws_server/           WebSocket acceptor (tokio-tungstenite)
//!         └── memory/              in-process transport for tests and embedding
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O beyond reading its own config file.
//! - `application` depends on `domain` and `rattle-core`, and talks to the
//!   network only through the [`application::transport`] traits.
//! - `infrastructure` implements those traits and owns task spawning.
//!
//! # Example
//!
//! ```no_run
//! use rattle_server::application::{HandlerSet, Request};
//! use rattle_server::domain::ServerConfig;
//! use rattle_server::infrastructure::{RattleServer, WsAcceptor};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ServerConfig::default();
//! let mut server = RattleServer::new(config.clone());
//! server.register_controller(
//!     "Echo",
//!     HandlerSet::new().responding("Relay", |_: serde_json::Value, req: Request| async move {
//!         Some(req.reply(req.payload().to_vec()))
//!     }),
//! );
//!
//! let acceptor = WsAcceptor::bind(&config).await?;
//! server.serve(acceptor).await?;
//! # Ok(())
//! # }
//! ```

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: routing, dispatch and response logic.
pub mod application;

/// Infrastructure layer: connection lifecycle and transports.
pub mod infrastructure;
