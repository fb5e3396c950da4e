//! # rattle-core
//!
//! Wire-level building blocks of the Rattle protocol: a bidirectional RPC
//! scheme that runs over one persistent duplex connection (usually a
//! WebSocket) and routes `Controller.Method` targets to registered handlers.
//!
//! This crate has no I/O and no async runtime.  It is shared by the server
//! crate and by anything that wants to speak the protocol as a client.
//!
//! # Architecture overview (for beginners)
//!
//! Every message on the wire is one text *frame*:
//!
//! ```text
//! Echo.Relay data {"text":"hi"}\n      ← inbound: target, kind, JSON payload
//! Echo.Relay {"text":"hi"}\n           ← outbound: target, payload
//! ```
//!
//! - **`protocol::target`** – Validates and case-normalizes the dotted
//!   `Controller.Method` name so `echo.relay` and `ECHO.RELAY` route alike.
//!
//! - **`protocol::envelope`** – Parses a raw inbound frame into an
//!   [`Envelope`] (target, kind, payload, stream metadata).
//!
//! - **`protocol::message`** – The outbound side: [`OutgoingMessage`] and the
//!   `target SP payload NEWLINE` serializer.
//!
//! - **`protocol::upload`** – The state machine that rebuilds a large payload
//!   (e.g. a file) sent as a series of bounded slices.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `rattle_core::Envelope` instead of `rattle_core::protocol::envelope::Envelope`.
pub use protocol::envelope::{encode_envelope, parse, Envelope, Kind, ProtocolError};
pub use protocol::message::{serialize, OutgoingMessage, ACK_FRAME};
pub use protocol::target::TargetName;
pub use protocol::upload::{CompletedUpload, StreamMeta, UploadError, UploadPhase, UploadState, UploadStep};
