//! Handler registry: maps `Controller.Method` targets to typed handlers.
//!
//! Handlers are ordinary async closures taking a decoded payload and a
//! [`Request`]:
//!
//! ```rust
//! use rattle_server::application::{HandlerSet, Request};
//! use rattle_core::OutgoingMessage;
//! use serde::Deserialize;
//!
//! #[derive(Default, Deserialize)]
//! struct Greeting {
//!     name: String,
//! }
//!
//! let set = HandlerSet::new()
//!     .responding("Hello", |greeting: Greeting, _req: Request| async move {
//!         Some(OutgoingMessage::new("=#greeting", format!("hello {}", greeting.name)))
//!     })
//!     .streaming("Ticker", |_: (), req: Request| async move {
//!         let _ = req.send(OutgoingMessage::new("=#tick", "1")).await;
//!     });
//! assert_eq!(set.len(), 2);
//! ```
//!
//! Each handler is wrapped in a [`TypedHandler`] that owns the payload type.
//! The registry only sees the type-erased [`Handler`] trait, so controllers
//! with completely different payload types live in the same table.
//!
//! Names are case-normalized on both registration and lookup (first letter
//! upper case, the rest lower case), so `main.index`, `Main.Index` and
//! `MAIN.INDEX` all reach the same handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rattle_core::protocol::target::normalize_segment;
use rattle_core::{OutgoingMessage, TargetName};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::application::request::Request;

/// Payloads of this many bytes or fewer carry no value; the handler gets
/// `T::default()` instead of a decode attempt.
const EMPTY_PAYLOAD_MAX: usize = 1;

/// `true` for `{}` and `null`, the bodies clients send when a call has no
/// arguments.
fn is_empty_json(payload: &[u8]) -> bool {
    let compact: Vec<u8> = payload.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    compact == b"{}" || compact == b"null"
}

/// Errors produced while resolving a target.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The target is not two non-empty segments joined by a dot.
    #[error("invalid target {0:?}")]
    InvalidTarget(String),

    /// No controller or no method with that name is registered.
    #[error("no handler registered for {target}")]
    NotFound { target: String },
}

/// How the dispatcher runs a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Awaited inline; its return value (if any) is written back.
    Responding,
    /// Spawned onto the connection's task set; may run until disconnect.
    Streaming,
}

/// Type-erased handler stored in the registry.
pub trait Handler: Send + Sync + 'static {
    /// Decodes `payload` and returns the future that runs the handler.
    ///
    /// Decoding happens eagerly so the caller can report a decode failure
    /// before deciding whether to await or spawn.
    fn prepare(
        &self,
        payload: &[u8],
        request: Request,
    ) -> Result<BoxFuture<'static, Option<OutgoingMessage>>, serde_json::Error>;
}

/// Wraps a closure `Fn(T, Request) -> Fut` and decodes `T` from JSON.
pub struct TypedHandler<F, T, Fut> {
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, Request) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Default + Send + 'static,
    Fut: Future<Output = Option<OutgoingMessage>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, Request) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Default + Send + 'static,
    Fut: Future<Output = Option<OutgoingMessage>> + Send + 'static,
{
    fn prepare(
        &self,
        payload: &[u8],
        request: Request,
    ) -> Result<BoxFuture<'static, Option<OutgoingMessage>>, serde_json::Error> {
        // A fresh value per request; nothing is shared between invocations.
        // `{}` and `null` fall back to the default for input types that
        // cannot decode them, such as `()`.
        let value: T = if payload.len() <= EMPTY_PAYLOAD_MAX {
            T::default()
        } else {
            match serde_json::from_slice(payload) {
                Ok(value) => value,
                Err(_) if is_empty_json(payload) => T::default(),
                Err(e) => return Err(e),
            }
        };
        Ok(Box::pin((self.handler)(value, request)))
    }
}

/// One resolved method: its registered name, how to run it, and the handler.
#[derive(Clone)]
pub struct MethodEntry {
    qualified_name: Arc<str>,
    kind: HandlerKind,
    handler: Arc<dyn Handler>,
}

impl MethodEntry {
    /// `Controller.Method` with the spelling used at registration.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub(crate) fn qualified_name_arc(&self) -> Arc<str> {
        Arc::clone(&self.qualified_name)
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("qualified_name", &self.qualified_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// The methods of one controller, collected before registration.
#[derive(Default)]
pub struct HandlerSet {
    methods: Vec<(String, HandlerKind, Arc<dyn Handler>)>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method whose return value is written back to the caller.
    pub fn responding<F, T, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T, Request) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Default + Send + 'static,
        Fut: Future<Output = Option<OutgoingMessage>> + Send + 'static,
    {
        self.methods.push((
            name.to_string(),
            HandlerKind::Responding,
            Arc::new(TypedHandler::new(handler)),
        ));
        self
    }

    /// Adds a long-running method that pushes through [`Request::send`] and
    /// returns nothing.
    pub fn streaming<F, T, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T, Request) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Default + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped = move |value: T, request: Request| {
            let fut = handler(value, request);
            async move {
                fut.await;
                None::<OutgoingMessage>
            }
        };
        self.methods.push((
            name.to_string(),
            HandlerKind::Streaming,
            Arc::new(TypedHandler::new(wrapped)),
        ));
        self
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Registered controllers keyed by normalized name.
#[derive(Default)]
pub struct HandlerRegistry {
    controllers: HashMap<String, HashMap<String, MethodEntry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `set` under `controller`.  A later registration under the same
    /// normalized name replaces the earlier one.
    pub fn register(&mut self, controller: &str, set: HandlerSet) {
        let key = normalize_segment(controller);
        let methods = set
            .methods
            .into_iter()
            .map(|(method, kind, handler)| {
                let entry = MethodEntry {
                    qualified_name: Arc::from(format!("{controller}.{method}")),
                    kind,
                    handler,
                };
                (normalize_segment(&method), entry)
            })
            .collect::<HashMap<_, _>>();

        debug!("registering controller {controller} with {} method(s)", methods.len());
        if self.controllers.insert(key, methods).is_some() {
            debug!("controller {controller} replaced an earlier registration");
        }
    }

    /// Resolves a raw `Controller.Method` string.
    ///
    /// # Errors
    ///
    /// [`ResolveError::InvalidTarget`] if `target` lacks two non-empty
    /// segments, [`ResolveError::NotFound`] if nothing is registered there.
    pub fn resolve(&self, target: &str) -> Result<&MethodEntry, ResolveError> {
        let (controller, method) = target
            .split_once('.')
            .filter(|(c, m)| !c.is_empty() && !m.is_empty())
            .ok_or_else(|| ResolveError::InvalidTarget(target.to_string()))?;

        self.find(&normalize_segment(controller), &normalize_segment(method))
            .ok_or_else(|| ResolveError::NotFound {
                target: target.to_string(),
            })
    }

    /// Resolves an already validated and normalized target.
    ///
    /// # Errors
    ///
    /// [`ResolveError::NotFound`] if nothing is registered there.
    pub fn lookup(&self, target: &TargetName) -> Result<&MethodEntry, ResolveError> {
        self.find(target.controller(), target.method())
            .ok_or_else(|| ResolveError::NotFound {
                target: target.to_string(),
            })
    }

    fn find(&self, controller: &str, method: &str) -> Option<&MethodEntry> {
        self.controllers.get(controller)?.get(method)
    }

    /// Number of registered controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("controllers", &self.controllers.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection::{ConnectionHandle, ConnectionRegistry};
    use crate::application::transport::MockFrameWriter;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Text {
        text: String,
    }

    fn request(target: &str, payload: &[u8]) -> Request {
        let handle = ConnectionHandle::new("test-peer", Box::new(MockFrameWriter::new()));
        Request::new(Arc::from(target), handle, ConnectionRegistry::new(), payload, None)
    }

    fn echo_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "Echo",
            HandlerSet::new().responding("Relay", |input: Text, req: Request| async move {
                Some(req.reply(input.text))
            }),
        );
        registry
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = echo_registry();
        for target in ["echo.relay", "Echo.Relay", "ECHO.RELAY", "eCHO.rELAY"] {
            let entry = registry.resolve(target).unwrap();
            assert_eq!(entry.qualified_name(), "Echo.Relay", "target {target}");
        }
    }

    #[test]
    fn test_display_name_keeps_registered_spelling() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "fakeController",
            HandlerSet::new().responding("doIt", |_: (), _req: Request| async { None }),
        );

        let entry = registry.resolve("FAKECONTROLLER.DOIT").unwrap();
        assert_eq!(entry.qualified_name(), "fakeController.doIt");
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let registry = echo_registry();
        assert_eq!(
            registry.resolve("Ghost.Method").unwrap_err(),
            ResolveError::NotFound {
                target: "Ghost.Method".to_string()
            }
        );
        assert!(matches!(
            registry.resolve("Echo.Missing"),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_without_two_segments_is_invalid() {
        let registry = echo_registry();
        for target in ["Echo", "Echo.", ".Relay", ""] {
            assert!(
                matches!(registry.resolve(target), Err(ResolveError::InvalidTarget(_))),
                "target {target:?}"
            );
        }
    }

    #[test]
    fn test_lookup_by_target_name() {
        let registry = echo_registry();
        let target = TargetName::parse("echo.relay").unwrap();
        assert_eq!(registry.lookup(&target).unwrap().kind(), HandlerKind::Responding);
    }

    #[test]
    fn test_later_registration_replaces_earlier() {
        // Arrange
        let mut registry = echo_registry();

        // Act
        registry.register(
            "ECHO",
            HandlerSet::new().streaming("Other", |_: (), _req: Request| async {}),
        );

        // Assert
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("Echo.Relay").is_err());
        assert_eq!(registry.resolve("Echo.Other").unwrap().kind(), HandlerKind::Streaming);
    }

    #[tokio::test]
    async fn test_prepare_decodes_payload_and_runs_handler() {
        // Arrange
        let registry = echo_registry();
        let entry = registry.resolve("Echo.Relay").unwrap();
        let payload = br#"{"text":"hi"}"#;

        // Act
        let fut = entry
            .handler()
            .prepare(payload, request("Echo.Relay", payload))
            .unwrap();
        let reply = fut.await;

        // Assert
        assert_eq!(reply, Some(OutgoingMessage::new("Echo.Relay", "hi")));
    }

    #[tokio::test]
    async fn test_short_payload_yields_default_value() {
        let registry = echo_registry();
        let entry = registry.resolve("Echo.Relay").unwrap();

        for payload in [&b""[..], &b"x"[..]] {
            let fut = entry.handler().prepare(payload, request("Echo.Relay", payload)).unwrap();
            assert_eq!(fut.await, Some(OutgoingMessage::new("Echo.Relay", "")));
        }
    }

    #[tokio::test]
    async fn test_empty_object_and_null_reach_unit_handlers() {
        // Arrange
        let set = HandlerSet::new().responding("Index", |_: (), req: Request| async move {
            Some(req.new_message("=#description", "ok"))
        });
        let mut registry = HandlerRegistry::new();
        registry.register("Main", set);
        let entry = registry.resolve("Main.Index").unwrap();

        for payload in [&b"{}"[..], &b"{ }"[..], &b"null"[..]] {
            // Act
            let fut = entry.handler().prepare(payload, request("Main.Index", payload));

            // Assert
            let reply = fut.unwrap().await;
            assert_eq!(reply, Some(OutgoingMessage::new("=#description", "ok")), "payload {payload:?}");
        }
    }

    #[test]
    fn test_empty_object_still_decodes_into_struct_inputs() {
        // Arrange: `{}` is a valid `Form` once the field has a default
        #[derive(Debug, Default, Deserialize)]
        struct Form {
            #[serde(default)]
            text: String,
        }
        let set = HandlerSet::new().responding("Form", |form: Form, req: Request| async move {
            Some(req.reply(form.text))
        });
        let mut registry = HandlerRegistry::new();
        registry.register("Main", set);
        let entry = registry.resolve("Main.Form").unwrap();

        // Act
        let result = entry.handler().prepare(b"{}", request("Main.Form", b"{}"));

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_non_empty_object_for_unit_handler_is_an_error() {
        let set = HandlerSet::new().responding("Index", |_: (), _req: Request| async { None });
        let mut registry = HandlerRegistry::new();
        registry.register("Main", set);
        let entry = registry.resolve("Main.Index").unwrap();

        let result = entry.handler().prepare(br#"{"a":1}"#, request("Main.Index", b""));

        assert!(result.is_err());
    }

    #[test]
    fn test_undecodable_payload_is_an_error() {
        let registry = echo_registry();
        let entry = registry.resolve("Echo.Relay").unwrap();
        let result = entry.handler().prepare(b"{not json", request("Echo.Relay", b""));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_streaming_handler_returns_no_message() {
        let set = HandlerSet::new().streaming("Tick", |_: (), _req: Request| async {});
        let mut registry = HandlerRegistry::new();
        registry.register("Main", set);

        let entry = registry.resolve("main.tick").unwrap();
        let fut = entry.handler().prepare(b"", request("Main.Tick", b"")).unwrap();
        assert_eq!(fut.await, None);
    }
}
