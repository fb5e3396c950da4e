//! Dotted `Controller.Method` target names.
//!
//! A target names the handler a frame is routed to.  On the wire it must be
//! two ASCII alphanumeric segments joined by exactly one dot:
//!
//! ```text
//! Echo.Relay      valid
//! main.index      valid (normalized to Main.Index)
//! Echo            invalid: one segment
//! Echo.Re.lay     invalid: three segments
//! Echo.Re-lay     invalid: '-' is not alphanumeric
//! ```
//!
//! # Case normalization
//!
//! Browsers and scripts spell targets however they like, so every segment is
//! normalized before it is used as a lookup key: the first letter becomes
//! upper case and the rest lower case.  `foo.bar`, `Foo.Bar` and `FOO.BAR`
//! all normalize to `Foo.Bar`.

use std::fmt;

use crate::protocol::envelope::ProtocolError;

/// A validated, case-normalized `Controller.Method` pair.
///
/// # Examples
///
/// ```rust
/// use rattle_core::TargetName;
///
/// let target = TargetName::parse("echo.RELAY").unwrap();
/// assert_eq!(target.controller(), "Echo");
/// assert_eq!(target.method(), "Relay");
/// assert_eq!(target.to_string(), "Echo.Relay");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetName {
    controller: String,
    method: String,
}

impl TargetName {
    /// Validates `raw` against `identifier.identifier` and normalizes both
    /// segments.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedTarget`] if `raw` does not consist of
    /// exactly two non-empty ASCII alphanumeric segments joined by one dot.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (controller, method) = raw
            .split_once('.')
            .ok_or_else(|| ProtocolError::MalformedTarget(raw.to_string()))?;

        if !is_identifier(controller) || !is_identifier(method) {
            return Err(ProtocolError::MalformedTarget(raw.to_string()));
        }

        Ok(Self {
            controller: normalize_segment(controller),
            method: normalize_segment(method),
        })
    }

    /// Builds a target from two segments that are already known to be valid
    /// identifiers, normalizing their case.
    pub fn from_parts(controller: &str, method: &str) -> Self {
        Self {
            controller: normalize_segment(controller),
            method: normalize_segment(method),
        }
    }

    /// The normalized controller segment.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// The normalized method segment.
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.controller, self.method)
    }
}

/// Returns `segment` with its first character upper-cased and the remaining
/// characters lower-cased (ASCII only).
///
/// ```rust
/// use rattle_core::protocol::target::normalize_segment;
///
/// assert_eq!(normalize_segment("fakeController"), "Fakecontroller");
/// assert_eq!(normalize_segment("ECHO"), "Echo");
/// assert_eq!(normalize_segment(""), "");
/// ```
pub fn normalize_segment(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(segment.len());
            out.push(first.to_ascii_uppercase());
            out.extend(chars.map(|c| c.to_ascii_lowercase()));
            out
        }
        None => String::new(),
    }
}

/// Returns `true` if `segment` is a non-empty run of ASCII letters and digits.
pub fn is_identifier(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_alphanumeric())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
