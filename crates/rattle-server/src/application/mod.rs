//! Application layer: routing frames to handlers and writing results back.
//!
//! Nothing here opens a socket.  Frames come in through
//! [`transport::FrameReader`], go out through [`transport::FrameWriter`], and
//! the infrastructure layer decides what sits behind those traits.

pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod request;
pub mod responder;
pub mod transport;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use dispatcher::{DispatchError, Dispatcher, Session};
pub use registry::{HandlerKind, HandlerRegistry, HandlerSet, MethodEntry, ResolveError};
pub use request::Request;
pub use responder::{broadcast, send, BroadcastReport, ResponderError};
pub use transport::{Accepted, FrameReader, FrameWriter, TransportAcceptor, TransportError};
