//! Outbound messages and their serialization.
//!
//! Outbound frames have no kind token:
//! ```text
//! target SP payload NEWLINE
//! ```
//! Payloads are opaque bytes chosen by handlers and frequently already end in
//! a newline, so the serializer strips trailing CR/LF and appends exactly one.

use serde::Serialize;

/// The acknowledgment frame asking an uploading client for its next slice.
pub const ACK_FRAME: &[u8] = b"stream --\n";

/// A message to be written to one connection or broadcast to all of them.
///
/// The `target` is whatever the receiving side should route on: another
/// `Controller.Method`, a client-side function name such as
/// `test.RecieveJSON`, or a DOM selector such as `=#timer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub target: String,
    pub payload: Vec<u8>,
}

impl OutgoingMessage {
    /// Creates a message with a raw payload.
    pub fn new(target: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            target: target.into(),
            payload: payload.into(),
        }
    }

    /// Creates a message whose payload is `value` encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(
        target: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(target, serde_json::to_vec(value)?))
    }

    /// Serializes the message into its wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        serialize(&self.target, &self.payload)
    }
}

/// Builds `target SP payload NEWLINE`, collapsing any trailing CR/LF in
/// `payload` into the single terminating newline.
///
/// # Examples
///
/// ```rust
/// use rattle_core::serialize;
///
/// assert_eq!(serialize("Echo.Relay", b"{}"), b"Echo.Relay {}\n");
/// assert_eq!(serialize("Echo.Relay", b"{}\n\n"), b"Echo.Relay {}\n");
/// ```
pub fn serialize(target: &str, payload: &[u8]) -> Vec<u8> {
    let end = payload
        .iter()
        .rposition(|&b| b != b'\n' && b != b'\r')
        .map_or(0, |i| i + 1);
    let payload = &payload[..end];

    let mut out = Vec::with_capacity(target.len() + payload.len() + 2);
    out.extend_from_slice(target.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out.push(b'\n');
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
