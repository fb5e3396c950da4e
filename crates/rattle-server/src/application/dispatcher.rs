//! Dispatcher: turns one parsed frame into a handler invocation.
//!
//! # How a frame is handled (for beginners)
//!
//! ```text
//! raw bytes ──parse──► Envelope
//!                        │
//!          ┌─────────────┼──────────────────┐
//!        data          stream          chunk / finish
//!          │             │                  │
//!       resolve     begin upload      UnexpectedControlFrame
//!          │        ack, read slices,
//!          │        ack per chunk ...
//!          │             │ finish
//!          ▼             ▼
//!     decode payload into T (fresh value per request)
//!          │
//!   Responding: await inline, write the reply (if any)
//!   Streaming:  spawn onto the session's task set
//! ```
//!
//! The dispatcher never runs two frames of the same connection at once: the
//! connection manager calls [`Dispatcher::handle_frame`] and waits for it to
//! return before reading the next frame.  An upload therefore borrows the
//! session's reader for as long as it takes to receive every slice.
//!
//! Frames are newline-delimited: one transport read (a WebSocket message,
//! say) may carry several of them, and [`Session::read_frame`] hands them out
//! one line at a time.  Upload slices are the exception; they are read whole,
//! newlines included.

use std::collections::VecDeque;
use std::sync::Arc;

use rattle_core::{parse, CompletedUpload, Envelope, Kind, ProtocolError, TargetName, UploadState, UploadStep};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::application::connection::{ConnectionHandle, ConnectionRegistry};
use crate::application::registry::{HandlerKind, HandlerRegistry, MethodEntry, ResolveError};
use crate::application::request::Request;
use crate::application::responder::{self, ResponderError};
use crate::application::transport::{FrameReader, TransportError};

/// Everything that can go wrong while handling one frame.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The `stream` metadata was missing or did not describe an upload.
    #[error("invalid upload header: {0}")]
    InvalidUploadHeader(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The payload was not valid JSON for the handler's input type.
    #[error("cannot decode payload for {target}: {source}")]
    PayloadDecode {
        target: String,
        #[source]
        source: serde_json::Error,
    },

    /// A `chunk` or `finish` frame arrived with no upload running.
    #[error("unexpected {0} frame outside an upload")]
    UnexpectedControlFrame(Kind),

    /// An upload ended early; the partial payload was discarded.
    #[error("upload of {file:?} aborted: {reason}")]
    UploadAborted {
        file: String,
        reason: String,
        connection_lost: bool,
    },

    #[error(transparent)]
    Responder(#[from] ResponderError),
}

impl DispatchError {
    /// Returns `true` if the connection must be torn down.
    ///
    /// Only failed writes and uploads cut off by the transport are fatal;
    /// everything else costs the offending frame and nothing more.
    pub fn is_fatal(&self) -> bool {
        match self {
            DispatchError::Responder(_) => true,
            DispatchError::UploadAborted { connection_lost, .. } => *connection_lost,
            _ => false,
        }
    }

    /// Short machine-readable code used in `Rattle.Error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Protocol(ProtocolError::EmptyFrame) => "empty_frame",
            DispatchError::Protocol(ProtocolError::MalformedTarget(_)) => "malformed_target",
            DispatchError::InvalidUploadHeader(_) => "invalid_upload_header",
            DispatchError::Resolve(ResolveError::InvalidTarget(_)) => "invalid_target",
            DispatchError::Resolve(ResolveError::NotFound { .. }) => "not_found",
            DispatchError::PayloadDecode { .. } => "payload_decode",
            DispatchError::UnexpectedControlFrame(_) => "unexpected_control_frame",
            DispatchError::UploadAborted { .. } => "upload_aborted",
            DispatchError::Responder(_) => "connection_closed",
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Per-connection dispatch state: the reader half, the shared writer handle,
/// lines already read but not yet dispatched, and the streaming handlers
/// spawned on this connection.
pub struct Session {
    reader: Box<dyn FrameReader>,
    handle: ConnectionHandle,
    pending: VecDeque<Vec<u8>>,
    tasks: JoinSet<()>,
}

impl Session {
    pub fn new(reader: Box<dyn FrameReader>, handle: ConnectionHandle) -> Self {
        Self {
            reader,
            handle,
            pending: VecDeque::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Returns the next newline-delimited frame.
    ///
    /// A transport read holding several lines is split, and the lines are
    /// returned in order by this and the following calls.  Blank lines are
    /// skipped; a read that holds nothing else is returned as is so the
    /// parser can report it.
    ///
    /// # Errors
    ///
    /// Whatever the transport reports.
    pub async fn read_frame(&mut self, limit: usize) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(Some(line));
        }
        let Some(read) = self.reader.read_frame(limit).await? else {
            return Ok(None);
        };

        self.pending.extend(
            read.split_inclusive(|&b| b == b'\n')
                .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
                .map(<[u8]>::to_vec),
        );
        Ok(Some(self.pending.pop_front().unwrap_or(read)))
    }

    /// Returns the next read without splitting it into lines, after any
    /// lines still pending from an earlier read.
    async fn read_raw(&mut self, limit: usize) -> Result<Option<Vec<u8>>, TransportError> {
        match self.pending.pop_front() {
            Some(line) => Ok(Some(line)),
            None => self.reader.read_frame(limit).await,
        }
    }

    /// Number of streaming handlers still running.
    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Collects streaming handlers that already finished.
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!("streaming handler on {} panicked", self.handle.id());
                }
            }
        }
    }

    /// Aborts every streaming handler and waits for them to stop.
    pub async fn shutdown(&mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Routes frames to handlers.  Shared by every connection of a server.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    connections: ConnectionRegistry,
    max_upload_bytes: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, connections: ConnectionRegistry, max_upload_bytes: usize) -> Self {
        Self {
            registry,
            connections,
            max_upload_bytes,
        }
    }

    /// Parses and dispatches one raw frame.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`]; use [`DispatchError::is_fatal`] to decide
    /// whether the connection survives.
    pub async fn handle_frame(&self, session: &mut Session, raw: &[u8]) -> Result<(), DispatchError> {
        session.reap();
        let envelope = parse(raw)?;
        debug!(
            "{} ← {} {}",
            session.handle.id(),
            envelope.target(),
            envelope.kind()
        );
        self.dispatch(session, &envelope).await
    }

    /// Dispatches an already parsed envelope.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].
    pub async fn dispatch(&self, session: &mut Session, envelope: &Envelope) -> Result<(), DispatchError> {
        match envelope.kind() {
            Kind::Data => {
                self.invoke(session, envelope.target(), envelope.payload().unwrap_or_default(), None)
                    .await
            }
            Kind::Stream => self.receive_upload(session, envelope).await,
            kind @ (Kind::Chunk | Kind::Finish) => Err(DispatchError::UnexpectedControlFrame(kind)),
        }
    }

    /// Runs a chunked upload to completion and then invokes its target.
    ///
    /// The target is resolved before the header is acknowledged, so a client
    /// uploading to an unknown method never gets to send its first slice.
    async fn receive_upload(&self, session: &mut Session, header: &Envelope) -> Result<(), DispatchError> {
        let entry = self.registry.lookup(header.target())?;
        let meta = header
            .stream_meta()
            .ok_or_else(|| DispatchError::InvalidUploadHeader("missing stream metadata".to_string()))?;

        let mut state = UploadState::new(header.target().clone(), self.max_upload_bytes);
        state
            .begin(meta)
            .map_err(|e| DispatchError::InvalidUploadHeader(e.to_string()))?;
        let file = state.file_name().to_string();
        responder::acknowledge(&session.handle).await?;

        loop {
            let frame = match session.read_raw(state.read_limit()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    state.abort();
                    return Err(DispatchError::UploadAborted {
                        file,
                        reason: "connection closed mid-upload".to_string(),
                        connection_lost: true,
                    });
                }
                Err(e) => {
                    state.abort();
                    return Err(DispatchError::UploadAborted {
                        file,
                        reason: e.to_string(),
                        connection_lost: e.is_fatal(),
                    });
                }
            };

            match state.accept(&frame) {
                Ok(UploadStep::Acknowledge) => responder::acknowledge(&session.handle).await?,
                Ok(UploadStep::Appended(_)) | Ok(UploadStep::Ignored) => {}
                Ok(UploadStep::Complete(upload)) => {
                    return self
                        .run(session, entry, header.payload().unwrap_or_default(), Some(upload))
                        .await;
                }
                Err(e) => {
                    warn!("upload {file:?} on {} aborted: {e}", session.handle.id());
                    return Err(DispatchError::UploadAborted {
                        file,
                        reason: e.to_string(),
                        connection_lost: false,
                    });
                }
            }
        }
    }

    /// Resolves `target` and runs its handler with `payload`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Resolve`] for an unknown target, otherwise the errors
    /// of running the handler.
    pub async fn invoke(
        &self,
        session: &mut Session,
        target: &TargetName,
        payload: &[u8],
        upload: Option<CompletedUpload>,
    ) -> Result<(), DispatchError> {
        let entry = self.registry.lookup(target)?;
        self.run(session, entry, payload, upload).await
    }

    async fn run(
        &self,
        session: &mut Session,
        entry: &MethodEntry,
        payload: &[u8],
        upload: Option<CompletedUpload>,
    ) -> Result<(), DispatchError> {
        let request = Request::new(
            entry.qualified_name_arc(),
            session.handle.clone(),
            self.connections.clone(),
            payload,
            upload,
        );
        let call = entry
            .handler()
            .prepare(payload, request)
            .map_err(|source| DispatchError::PayloadDecode {
                target: entry.qualified_name().to_string(),
                source,
            })?;

        match entry.kind() {
            HandlerKind::Responding => {
                if let Some(reply) = call.await {
                    responder::send(&session.handle, &reply).await?;
                }
            }
            HandlerKind::Streaming => {
                session.tasks.spawn(async move {
                    call.await;
                });
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
