//! Protocol module containing the frame codec, target names, outgoing
//! messages and the chunked upload state machine.

pub mod envelope;
pub mod message;
pub mod target;
pub mod upload;

pub use envelope::{encode_envelope, parse, Envelope, Kind, ProtocolError};
pub use message::{serialize, OutgoingMessage, ACK_FRAME};
pub use target::TargetName;
pub use upload::{CompletedUpload, StreamMeta, UploadError, UploadPhase, UploadState, UploadStep};
