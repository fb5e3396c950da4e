//! Inbound frame codec.
//!
//! Wire format (one frame per transport message, newline terminated):
//! ```text
//! frame      := target SP kind SP payload [SP streamMeta] NEWLINE
//!             | target SP payload NEWLINE                  (two-field form, kind = data)
//! target     := identifier "." identifier
//! kind       := "data" | "stream" | "chunk" | "finish"
//! payload    := JSON | empty
//! streamMeta := {"name":string,"size":int,"slicesize":int}  (kind = stream only)
//! ```
//!
//! The two-field form is what the browser client sends for plain calls
//! (`Main.Json {"text":"hi"}`), so any frame whose second token is not a
//! known kind is read as a `data` frame carrying the whole remainder.

use std::fmt;

use serde::de::IgnoredAny;
use thiserror::Error;

use crate::protocol::target::TargetName;

/// Errors that can occur while parsing an inbound frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame was empty or contained only whitespace.
    #[error("empty frame")]
    EmptyFrame,

    /// The target is not of the form `identifier.identifier`.
    #[error("malformed target: {0:?}")]
    MalformedTarget(String),
}

/// The role of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A regular call carrying an optional JSON payload.
    Data,
    /// Upload header: opens a chunked upload described by the stream metadata.
    Stream,
    /// Mid-upload control frame asking for the next acknowledgment.
    Chunk,
    /// Mid-upload control frame ending the upload.
    Finish,
}

impl Kind {
    /// Parses the wire token for a kind.  Tokens are case-sensitive.
    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"data" => Some(Kind::Data),
            b"stream" => Some(Kind::Stream),
            b"chunk" => Some(Kind::Chunk),
            b"finish" => Some(Kind::Finish),
            _ => None,
        }
    }

    /// The wire token for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Data => "data",
            Kind::Stream => "stream",
            Kind::Chunk => "chunk",
            Kind::Finish => "finish",
        }
    }

    /// `chunk` and `finish` only mean something in the middle of an upload.
    pub fn is_upload_control(self) -> bool {
        matches!(self, Kind::Chunk | Kind::Finish)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed inbound frame.  Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    target: TargetName,
    kind: Kind,
    payload: Option<Vec<u8>>,
    stream_meta: Option<Vec<u8>>,
}

impl Envelope {
    /// Builds a `data` envelope.  Surrounding whitespace is trimmed from the
    /// payload and an empty payload is stored as `None`.
    pub fn data(target: TargetName, payload: impl AsRef<[u8]>) -> Self {
        Self {
            target,
            kind: Kind::Data,
            payload: non_empty(trim_ascii_whitespace(payload.as_ref())),
            stream_meta: None,
        }
    }

    /// Builds a `stream` (upload header) envelope.
    pub fn stream(target: TargetName, payload: Option<&[u8]>, stream_meta: impl AsRef<[u8]>) -> Self {
        Self {
            target,
            kind: Kind::Stream,
            payload: payload.and_then(|p| non_empty(trim_ascii_whitespace(p))),
            stream_meta: non_empty(trim_ascii_whitespace(stream_meta.as_ref())),
        }
    }

    /// Builds a payload-less envelope, typically `chunk` or `finish`.
    pub fn control(target: TargetName, kind: Kind) -> Self {
        Self {
            target,
            kind,
            payload: None,
            stream_meta: None,
        }
    }

    pub fn target(&self) -> &TargetName {
        &self.target
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The raw JSON payload, if the frame carried one.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// The raw stream metadata; only ever present on `stream` frames.
    pub fn stream_meta(&self) -> Option<&[u8]> {
        self.stream_meta.as_deref()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parses one raw inbound frame.
///
/// Leading and trailing whitespace (including CR/LF) is ignored.
///
/// # Errors
///
/// - [`ProtocolError::EmptyFrame`] if nothing but whitespace was received.
/// - [`ProtocolError::MalformedTarget`] if the first token is not a valid
///   `Controller.Method` target.
///
/// # Examples
///
/// ```rust
/// use rattle_core::{parse, Kind};
///
/// let env = parse(b"echo.relay data {\"text\":\"hi\"}\n").unwrap();
/// assert_eq!(env.target().to_string(), "Echo.Relay");
/// assert_eq!(env.kind(), Kind::Data);
/// assert_eq!(env.payload(), Some(&b"{\"text\":\"hi\"}"[..]));
/// ```
pub fn parse(raw: &[u8]) -> Result<Envelope, ProtocolError> {
    let frame = trim_ascii_whitespace(raw);
    if frame.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }

    let (target_bytes, rest) = split_first_space(frame);
    let target_str = std::str::from_utf8(target_bytes)
        .map_err(|_| ProtocolError::MalformedTarget(String::from_utf8_lossy(target_bytes).into_owned()))?;
    let target = TargetName::parse(target_str.trim())?;

    let rest = trim_ascii_whitespace(rest);
    let (token, body) = split_first_space(rest);
    let (kind, body) = match Kind::from_token(token) {
        Some(kind) => (kind, trim_ascii_whitespace(body)),
        None => (Kind::Data, rest),
    };

    let (payload, stream_meta) = match kind {
        Kind::Stream => split_stream_body(body),
        _ => (non_empty(body), None),
    };

    Ok(Envelope {
        target,
        kind,
        payload,
        stream_meta,
    })
}

/// Encodes an envelope in the full `target kind [payload] [streamMeta]` form.
///
/// This is the client-side counterpart of [`parse`]; for every envelope
/// built through the public constructors `parse(&encode_envelope(&e)) == Ok(e)`.
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let target = envelope.target.to_string();
    let mut out = Vec::with_capacity(
        target.len()
            + 8
            + envelope.payload.as_ref().map_or(0, Vec::len)
            + envelope.stream_meta.as_ref().map_or(0, Vec::len)
            + 3,
    );

    out.extend_from_slice(target.as_bytes());
    out.push(b' ');
    out.extend_from_slice(envelope.kind.as_str().as_bytes());
    if let Some(payload) = &envelope.payload {
        out.push(b' ');
        out.extend_from_slice(payload);
    }
    if let Some(meta) = &envelope.stream_meta {
        out.push(b' ');
        out.extend_from_slice(meta);
    }
    out.push(b'\n');
    out
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Trims ASCII whitespace (space, tab, CR, LF, FF) from both ends.
pub(crate) fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn split_first_space(bytes: &[u8]) -> (&[u8], &[u8]) {
    match bytes.iter().position(|&b| b == b' ') {
        Some(i) => (&bytes[..i], &bytes[i + 1..]),
        None => (bytes, &[]),
    }
}

fn non_empty(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.is_empty() {
        None
    } else {
        Some(bytes.to_vec())
    }
}

/// Splits the body of a `stream` frame into `(payload, streamMeta)`.
///
/// The metadata is always the last JSON value.  A body holding two values is
/// `payload streamMeta`; one value is the metadata alone.  Anything else is
/// handed back whole as metadata so the caller reports a bad upload header
/// rather than silently guessing.
fn split_stream_body(body: &[u8]) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    if body.is_empty() {
        return (None, None);
    }

    let mut values = serde_json::Deserializer::from_slice(body).into_iter::<IgnoredAny>();
    let mut ends = Vec::with_capacity(2);
    while let Some(Ok(_)) = values.next() {
        ends.push(values.byte_offset());
        if ends.len() > 2 {
            break;
        }
    }

    let fully_consumed = |end: usize| trim_ascii_whitespace(&body[end..]).is_empty();
    match ends.as_slice() {
        [end] if fully_consumed(*end) => (None, non_empty(body)),
        [first, second] if fully_consumed(*second) => (
            non_empty(trim_ascii_whitespace(&body[..*first])),
            non_empty(trim_ascii_whitespace(&body[*first..])),
        ),
        _ => (None, non_empty(body)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
