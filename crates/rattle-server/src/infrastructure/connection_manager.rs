//! ConnectionManager: the per-connection read loop and lifecycle hooks.
//!
//! One call to [`ConnectionManager::accept`] serves one connection from the
//! first frame to teardown:
//!
//! 1. Register a [`ConnectionHandle`] and fire the `on_connect` hook.
//! 2. Read a frame, dispatch it, repeat.  Dispatch on one connection is
//!    strictly sequential.
//! 3. On end of stream, a fatal transport error or a fatal dispatch error:
//!    abort streaming handlers, close the writer, await `on_disconnect`, and
//!    deregister.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rattle_core::OutgoingMessage;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::connection::{ConnectionHandle, ConnectionRegistry};
use crate::application::dispatcher::{DispatchError, Dispatcher, Session};
use crate::application::responder::{self, ResponderError};
use crate::application::transport::Accepted;
use crate::domain::ServerConfig;

/// Target of the opt-in error frame.
pub const ERROR_TARGET: &str = "Rattle.Error";

/// A connect or disconnect callback.
pub type LifecycleHook = Arc<dyn Fn(ConnectionHandle) -> BoxFuture<'static, ()> + Send + Sync>;

/// Boxes an async closure into a [`LifecycleHook`].
pub fn lifecycle_hook<F, Fut>(hook: F) -> LifecycleHook
where
    F: Fn(ConnectionHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |handle| Box::pin(hook(handle)))
}

/// Payload of a `Rattle.Error` frame.
#[derive(Debug, Serialize)]
struct ErrorReport<'a> {
    error: &'a str,
    message: String,
}

/// Serves accepted connections.  Cheap to clone; one clone per task.
#[derive(Clone)]
pub struct ConnectionManager {
    dispatcher: Dispatcher,
    connections: ConnectionRegistry,
    max_frame_bytes: usize,
    report_errors: bool,
    on_connect: Option<LifecycleHook>,
    on_disconnect: Option<LifecycleHook>,
}

impl ConnectionManager {
    pub fn new(dispatcher: Dispatcher, connections: ConnectionRegistry, config: &ServerConfig) -> Self {
        Self {
            dispatcher,
            connections,
            max_frame_bytes: config.max_frame_bytes,
            report_errors: config.report_errors,
            on_connect: None,
            on_disconnect: None,
        }
    }

    pub fn with_hooks(mut self, on_connect: Option<LifecycleHook>, on_disconnect: Option<LifecycleHook>) -> Self {
        self.on_connect = on_connect;
        self.on_disconnect = on_disconnect;
        self
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Serves one connection until it closes.
    pub async fn accept(&self, accepted: Accepted) {
        let Accepted { peer, reader, writer } = accepted;
        let handle = ConnectionHandle::new(peer, writer);
        let id = handle.id();

        self.connections.insert(handle.clone()).await;
        info!("connection {id} opened ({})", handle.peer());

        if let Some(hook) = &self.on_connect {
            tokio::spawn(hook(handle.clone()));
        }

        let mut session = Session::new(reader, handle.clone());
        self.read_loop(&mut session).await;

        // ── Teardown ──────────────────────────────────────────────────────────
        session.shutdown().await;
        handle.close().await;
        if let Some(hook) = &self.on_disconnect {
            hook(handle.clone()).await;
        }
        self.connections.remove(id).await;
        info!("connection {id} closed ({})", handle.peer());
    }

    async fn read_loop(&self, session: &mut Session) {
        let id = session.handle().id();

        loop {
            let frame = match session.read_frame(self.max_frame_bytes).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("connection {id}: end of stream");
                    return;
                }
                Err(e) if e.is_fatal() => {
                    debug!("connection {id}: {e}");
                    return;
                }
                Err(e) => {
                    debug!("connection {id}: dropped frame: {e}");
                    continue;
                }
            };

            let Err(e) = self.dispatcher.handle_frame(session, &frame).await else {
                continue;
            };

            if e.is_fatal() {
                warn!("connection {id}: {e}");
                return;
            }

            debug!("connection {id}: dropped frame: {e}");
            if self.report_errors && self.report(session.handle(), &e).await.is_err() {
                return;
            }
        }
    }

    /// Answers a dropped frame with a `Rattle.Error` frame.
    async fn report(&self, handle: &ConnectionHandle, error: &DispatchError) -> Result<(), ResponderError> {
        let report = ErrorReport {
            error: error.code(),
            message: error.to_string(),
        };
        let message = match OutgoingMessage::json(ERROR_TARGET, &report) {
            Ok(message) => message,
            Err(e) => {
                warn!("cannot encode error report: {e}");
                return Ok(());
            }
        };
        responder::send(handle, &message).await
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("report_errors", &self.report_errors)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
