//! Chunked upload state machine.
//!
//! Large payloads (files, mostly) are not sent as one frame.  The client
//! opens an upload with a `stream` frame whose metadata announces the file
//! name, its size and the slice size, and then feeds the payload one slice
//! at a time:
//!
//! ```text
//! client                                   server
//! ──────                                   ──────
//! Main.File stream {"name":"a.txt",        AwaitingHeader → Receiving
//!   "size":6,"slicesize":3}           ──►
//!                                     ◄──  stream --
//! abc                                 ──►  append 3 bytes
//! Main.File chunk                     ──►
//!                                     ◄──  stream --
//! def                                 ──►  append 3 bytes
//! Main.File finish                    ──►  Receiving → Finished
//!                                          handler gets "abcdef"
//! ```
//!
//! The client never sends the next slice before it has seen the
//! acknowledgment, so the server holds at most one slice in flight per
//! connection no matter how large the file is.
//!
//! [`UploadState`] is pure: it is fed raw frames and tells the caller what to
//! do next through [`UploadStep`].  Reading from the socket and writing the
//! acknowledgments is the caller's job.
//!
//! # Telling control frames from slices
//!
//! A frame is a control frame only when it is at most [`CONTROL_FRAME_MAX`]
//! bytes long, names the upload's own target and carries nothing after the
//! `chunk`/`finish` token.  Every other frame is slice data, including text
//! that happens to start with a dotted word and a kind token.  A nested
//! `stream` frame for the same target aborts the upload with
//! [`UploadError::AlreadyActive`], but only if it fits in
//! [`CONTROL_FRAME_MAX`]; a longer one is treated as slice data.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::protocol::envelope::{parse, Kind};
use crate::protocol::target::TargetName;

/// Frames longer than this are never inspected for control tokens; they can
/// only be payload.
pub const CONTROL_FRAME_MAX: usize = 256;

/// The metadata carried by a `stream` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMeta {
    /// File name as reported by the client.  Not trusted for paths.
    pub name: String,
    /// Declared total size in bytes.  Informational only.
    #[serde(default)]
    pub size: u64,
    /// Maximum number of payload bytes in one slice.
    #[serde(rename = "slicesize")]
    pub slice_size: usize,
}

/// Errors that abort an upload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The `stream` metadata was missing, not valid JSON, or had a zero slice size.
    #[error("invalid upload header: {0}")]
    InvalidHeader(String),

    /// A `stream` frame arrived while an upload was already running.
    #[error("an upload is already in progress on this connection")]
    AlreadyActive,

    /// A frame was fed to an upload that is not receiving.
    #[error("upload is not receiving (phase: {0:?})")]
    NotReceiving(UploadPhase),

    /// A payload slice was larger than the slice size from the header.
    #[error("slice of {len} bytes exceeds the slice size of {slice_size}")]
    SliceTooLarge { len: usize, slice_size: usize },

    /// The reassembled payload grew beyond the configured limit.
    #[error("upload exceeds the limit of {limit} bytes")]
    LimitExceeded { limit: usize },
}

/// Where an upload is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    AwaitingHeader,
    Receiving,
    /// Terminal: the payload was handed over.
    Finished,
    /// Terminal: the partial payload was discarded.
    Aborted,
}

/// A fully received upload, handed to the target handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub name: String,
    pub declared_size: u64,
    pub data: Vec<u8>,
}

/// What the caller must do after feeding a frame to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStep {
    /// Write the `stream --` acknowledgment.
    Acknowledge,
    /// The frame was payload; this many bytes were appended.  No reply.
    Appended(usize),
    /// The frame was empty and was skipped.
    Ignored,
    /// The upload finished; dispatch the payload.  No reply.
    Complete(CompletedUpload),
}

/// Reassembles one chunked upload.
#[derive(Debug)]
pub struct UploadState {
    target: TargetName,
    phase: UploadPhase,
    file_name: String,
    declared_size: u64,
    slice_size: usize,
    buffer: Vec<u8>,
    limit: usize,
}

impl UploadState {
    /// Creates an upload for `target` waiting for its header.  `limit` caps
    /// the total number of payload bytes that will be buffered.
    pub fn new(target: TargetName, limit: usize) -> Self {
        Self {
            target,
            phase: UploadPhase::AwaitingHeader,
            file_name: String::new(),
            declared_size: 0,
            slice_size: 0,
            buffer: Vec::new(),
            limit,
        }
    }

    /// Consumes the raw `stream` metadata and starts receiving.
    ///
    /// On success the caller must send an acknowledgment so the client
    /// transmits its first slice.
    ///
    /// # Errors
    ///
    /// - [`UploadError::AlreadyActive`] if the header was already consumed.
    /// - [`UploadError::InvalidHeader`] if the metadata does not decode or
    ///   announces a zero slice size.
    pub fn begin(&mut self, stream_meta: &[u8]) -> Result<UploadStep, UploadError> {
        if self.phase != UploadPhase::AwaitingHeader {
            return Err(UploadError::AlreadyActive);
        }

        let meta: StreamMeta = serde_json::from_slice(stream_meta)
            .map_err(|e| UploadError::InvalidHeader(e.to_string()))?;
        if meta.slice_size == 0 {
            return Err(UploadError::InvalidHeader("slicesize must be at least 1".to_string()));
        }

        // The declared size is client-supplied, so it only sizes the initial
        // allocation up to the limit.
        let capacity = usize::try_from(meta.size).unwrap_or(usize::MAX).min(self.limit);
        self.buffer = Vec::with_capacity(capacity);
        self.file_name = meta.name;
        self.declared_size = meta.size;
        self.slice_size = meta.slice_size;
        self.phase = UploadPhase::Receiving;

        debug!(
            "upload {:?} started: declared {} bytes in slices of {}",
            self.file_name, self.declared_size, self.slice_size
        );
        Ok(UploadStep::Acknowledge)
    }

    /// Feeds one raw frame read from the connection.
    ///
    /// Short `chunk` or `finish` frames naming this upload's target with no
    /// trailing payload are control frames; everything else is payload.  Any error moves the upload to
    /// [`UploadPhase::Aborted`] and discards the buffer.
    ///
    /// # Errors
    ///
    /// See [`UploadError`].
    pub fn accept(&mut self, raw: &[u8]) -> Result<UploadStep, UploadError> {
        if self.phase != UploadPhase::Receiving {
            return Err(UploadError::NotReceiving(self.phase));
        }

        match self.step(raw) {
            Ok(step) => Ok(step),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn step(&mut self, raw: &[u8]) -> Result<UploadStep, UploadError> {
        if raw.is_empty() {
            return Ok(UploadStep::Ignored);
        }

        if raw.len() <= CONTROL_FRAME_MAX {
            if let Ok(envelope) = parse(raw) {
                if *envelope.target() == self.target {
                    match (envelope.kind(), envelope.payload()) {
                        (Kind::Chunk, None) => return Ok(UploadStep::Acknowledge),
                        (Kind::Finish, None) => return Ok(UploadStep::Complete(self.finish())),
                        (Kind::Stream, _) => return Err(UploadError::AlreadyActive),
                        _ => {}
                    }
                }
            }
        }

        if raw.len() > self.slice_size {
            return Err(UploadError::SliceTooLarge {
                len: raw.len(),
                slice_size: self.slice_size,
            });
        }
        if self.buffer.len() + raw.len() > self.limit {
            return Err(UploadError::LimitExceeded { limit: self.limit });
        }

        self.buffer.extend_from_slice(raw);
        Ok(UploadStep::Appended(raw.len()))
    }

    fn finish(&mut self) -> CompletedUpload {
        self.phase = UploadPhase::Finished;
        debug!(
            "upload {:?} finished: {} bytes received",
            self.file_name,
            self.buffer.len()
        );
        CompletedUpload {
            name: std::mem::take(&mut self.file_name),
            declared_size: self.declared_size,
            data: std::mem::take(&mut self.buffer),
        }
    }

    /// Moves the upload to [`UploadPhase::Aborted`] and frees the buffer.
    pub fn abort(&mut self) {
        if self.phase != UploadPhase::Aborted {
            debug!(
                "upload {:?} aborted after {} bytes",
                self.file_name,
                self.buffer.len()
            );
        }
        self.phase = UploadPhase::Aborted;
        self.buffer = Vec::new();
    }

    /// The target the completed payload is dispatched to.
    pub fn target(&self) -> &TargetName {
        &self.target
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    /// Payload bytes buffered so far.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// The most bytes one read may return: a full slice, or a control frame
    /// when the slice size is tiny.
    pub fn read_limit(&self) -> usize {
        self.slice_size.max(CONTROL_FRAME_MAX)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &[u8] = b"{\"name\":\"a.txt\",\"size\":6,\"slicesize\":3}";

    fn file_target() -> TargetName {
        TargetName::parse("Main.File").unwrap()
    }

    fn receiving() -> UploadState {
        let mut state = UploadState::new(file_target(), 1024);
        state.begin(HEADER).unwrap();
        state
    }

    #[test]
    fn test_begin_moves_to_receiving_and_acknowledges() {
        // Arrange
        let mut state = UploadState::new(file_target(), 1024);
        assert_eq!(state.phase(), UploadPhase::AwaitingHeader);

        // Act
        let step = state.begin(HEADER).unwrap();

        // Assert
        assert_eq!(step, UploadStep::Acknowledge);
        assert_eq!(state.phase(), UploadPhase::Receiving);
        assert_eq!(state.file_name(), "a.txt");
        assert_eq!(state.declared_size(), 6);
        assert_eq!(state.slice_size(), 3);
    }

    #[test]
    fn test_begin_twice_is_already_active() {
        let mut state = receiving();
        assert_eq!(state.begin(HEADER), Err(UploadError::AlreadyActive));
    }

    #[test]
    fn test_begin_rejects_bad_json() {
        let mut state = UploadState::new(file_target(), 1024);
        assert!(matches!(
            state.begin(b"{not json"),
            Err(UploadError::InvalidHeader(_))
        ));
        assert_eq!(state.phase(), UploadPhase::AwaitingHeader);
    }

    #[test]
    fn test_begin_rejects_missing_slice_size() {
        let mut state = UploadState::new(file_target(), 1024);
        assert!(matches!(
            state.begin(b"{\"name\":\"a.txt\",\"size\":6}"),
            Err(UploadError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_begin_rejects_zero_slice_size() {
        let mut state = UploadState::new(file_target(), 1024);
        assert!(matches!(
            state.begin(b"{\"name\":\"a.txt\",\"size\":6,\"slicesize\":0}"),
            Err(UploadError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_full_upload_reassembles_payload() {
        // Arrange
        let mut state = receiving();

        // Act
        assert_eq!(state.accept(b"abc"), Ok(UploadStep::Appended(3)));
        assert_eq!(state.accept(b"Main.File chunk\n"), Ok(UploadStep::Acknowledge));
        assert_eq!(state.accept(b"def"), Ok(UploadStep::Appended(3)));
        let step = state.accept(b"Main.File finish\n").unwrap();

        // Assert
        assert_eq!(
            step,
            UploadStep::Complete(CompletedUpload {
                name: "a.txt".to_string(),
                declared_size: 6,
                data: b"abcdef".to_vec(),
            })
        );
        assert_eq!(state.phase(), UploadPhase::Finished);
    }

    #[test]
    fn test_chunk_frame_appends_nothing() {
        let mut state = receiving();
        state.accept(b"Main.File chunk").unwrap();
        assert_eq!(state.received(), 0);
    }

    #[test]
    fn test_payload_that_looks_like_a_data_frame_is_appended() {
        let mut state = UploadState::new(file_target(), 1024);
        state
            .begin(b"{\"name\":\"a.txt\",\"size\":6,\"slicesize\":64}")
            .unwrap();
        assert_eq!(state.accept(b"Foo.Bar data {}"), Ok(UploadStep::Appended(15)));
    }

    #[test]
    fn test_text_with_kind_token_after_a_dotted_word_is_slice_data() {
        // Arrange
        let mut state = UploadState::new(file_target(), 1024);
        state
            .begin(b"{\"name\":\"notes.txt\",\"size\":64,\"slicesize\":64}")
            .unwrap();

        // Act
        state.accept(b"intro text ").unwrap();
        let finish_line = state.accept(b"Race.Day finish line at noon");
        let chunk_line = state.accept(b"X.Y chunk of prose");
        let step = state.accept(b"Main.File finish").unwrap();

        // Assert
        assert_eq!(finish_line, Ok(UploadStep::Appended(28)));
        assert_eq!(chunk_line, Ok(UploadStep::Appended(18)));
        match step {
            UploadStep::Complete(upload) => assert_eq!(
                upload.data,
                b"intro text Race.Day finish line at noonX.Y chunk of prose".to_vec()
            ),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn test_control_token_for_own_target_with_payload_is_slice_data() {
        let mut state = UploadState::new(file_target(), 1024);
        state
            .begin(b"{\"name\":\"a.txt\",\"size\":6,\"slicesize\":64}")
            .unwrap();

        assert_eq!(state.accept(b"Main.File finish now"), Ok(UploadStep::Appended(20)));
        assert_eq!(state.phase(), UploadPhase::Receiving);
    }

    #[test]
    fn test_control_frame_target_is_case_insensitive() {
        let mut state = receiving();
        assert_eq!(state.accept(b"main.file chunk"), Ok(UploadStep::Acknowledge));
    }

    #[test]
    fn test_payload_with_newlines_is_kept_verbatim() {
        let mut state = receiving();
        state.accept(b"a\r\n").unwrap();
        let step = state.accept(b"Main.File finish").unwrap();
        match step {
            UploadStep::Complete(upload) => assert_eq!(upload.data, b"a\r\n".to_vec()),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_frame_is_ignored() {
        let mut state = receiving();
        assert_eq!(state.accept(b""), Ok(UploadStep::Ignored));
        assert_eq!(state.phase(), UploadPhase::Receiving);
    }

    #[test]
    fn test_nested_stream_aborts() {
        let mut state = receiving();
        state.accept(b"abc").unwrap();
        let result = state.accept(b"Main.File stream {\"name\":\"b\",\"size\":1,\"slicesize\":1}");
        assert_eq!(result, Err(UploadError::AlreadyActive));
        assert_eq!(state.phase(), UploadPhase::Aborted);
        assert_eq!(state.received(), 0, "partial buffer must be discarded");
    }

    #[test]
    fn test_oversized_slice_aborts() {
        let mut state = receiving();
        let result = state.accept(b"abcd");
        assert_eq!(
            result,
            Err(UploadError::SliceTooLarge {
                len: 4,
                slice_size: 3
            })
        );
        assert_eq!(state.phase(), UploadPhase::Aborted);
    }

    #[test]
    fn test_limit_exceeded_aborts() {
        let mut state = UploadState::new(file_target(), 4);
        state.begin(HEADER).unwrap();
        state.accept(b"abc").unwrap();
        assert_eq!(
            state.accept(b"de"),
            Err(UploadError::LimitExceeded { limit: 4 })
        );
        assert_eq!(state.phase(), UploadPhase::Aborted);
    }

    #[test]
    fn test_accept_after_finish_is_rejected() {
        let mut state = receiving();
        state.accept(b"Main.File finish").unwrap();
        assert_eq!(
            state.accept(b"abc"),
            Err(UploadError::NotReceiving(UploadPhase::Finished))
        );
    }

    #[test]
    fn test_accept_before_header_is_rejected() {
        let mut state = UploadState::new(file_target(), 16);
        assert_eq!(
            state.accept(b"abc"),
            Err(UploadError::NotReceiving(UploadPhase::AwaitingHeader))
        );
    }

    #[test]
    fn test_read_limit_covers_control_frames_for_tiny_slices() {
        let state = receiving();
        assert_eq!(state.read_limit(), CONTROL_FRAME_MAX);
    }

    #[test]
    fn test_read_limit_is_slice_size_for_large_slices() {
        let mut state = UploadState::new(file_target(), 1 << 20);
        state
            .begin(b"{\"name\":\"big\",\"size\":100000,\"slicesize\":4096}")
            .unwrap();
        assert_eq!(state.read_limit(), 4096);
    }

    #[test]
    fn test_huge_declared_size_does_not_preallocate_past_limit() {
        let mut state = UploadState::new(file_target(), 16);
        state
            .begin(b"{\"name\":\"big\",\"size\":18446744073709551615,\"slicesize\":4}")
            .unwrap();
        assert_eq!(state.declared_size(), u64::MAX);
        assert_eq!(state.phase(), UploadPhase::Receiving);
    }
}
