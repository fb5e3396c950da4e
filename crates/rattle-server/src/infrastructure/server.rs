//! RattleServer: construct → register → serve.
//!
//! The server owns its handler registry and connection registry, so several
//! independent servers can run in one process (tests do this constantly).
//! Registration needs `&mut self`; serving consumes the server and freezes
//! the registry behind an `Arc`, so nothing can change it while frames are
//! being dispatched.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use crate::application::connection::{ConnectionHandle, ConnectionRegistry};
use crate::application::dispatcher::Dispatcher;
use crate::application::registry::{HandlerRegistry, HandlerSet};
use crate::application::transport::{TransportAcceptor, TransportError};
use crate::domain::ServerConfig;
use crate::infrastructure::connection_manager::{lifecycle_hook, ConnectionManager, LifecycleHook};

/// How often [`RattleServer::serve_until`] re-checks its running flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// A Rattle server instance.
pub struct RattleServer {
    config: ServerConfig,
    registry: HandlerRegistry,
    connections: ConnectionRegistry,
    on_connect: Option<LifecycleHook>,
    on_disconnect: Option<LifecycleHook>,
}

impl RattleServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            connections: ConnectionRegistry::new(),
            on_connect: None,
            on_disconnect: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registers a controller's methods under `name`.
    pub fn register_controller(&mut self, name: &str, handlers: HandlerSet) -> &mut Self {
        self.registry.register(name, handlers);
        self
    }

    /// Runs `hook` in its own task whenever a connection opens.
    pub fn on_connect<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(ConnectionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connect = Some(lifecycle_hook(hook));
        self
    }

    /// Awaits `hook` during teardown of every connection, after its writer
    /// was closed and before it leaves the registry.
    pub fn on_disconnect<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(ConnectionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_disconnect = Some(lifecycle_hook(hook));
        self
    }

    /// The live connections.  Stays valid after the server starts serving,
    /// so callers can broadcast from outside any handler.
    pub fn connections(&self) -> ConnectionRegistry {
        self.connections.clone()
    }

    fn into_manager(self) -> ConnectionManager {
        let dispatcher = Dispatcher::new(
            Arc::new(self.registry),
            self.connections.clone(),
            self.config.max_upload_bytes,
        );
        ConnectionManager::new(dispatcher, self.connections, &self.config)
            .with_hooks(self.on_connect, self.on_disconnect)
    }

    /// Accepts connections until the acceptor fails, serving each one in its
    /// own task.
    ///
    /// # Errors
    ///
    /// Returns the acceptor's error; that is the only way this returns.
    pub async fn serve<A: TransportAcceptor>(self, mut acceptor: A) -> Result<(), TransportError> {
        let manager = self.into_manager();
        info!("Rattle server ready");

        loop {
            let accepted = acceptor.accept().await?;
            let manager = manager.clone();
            tokio::spawn(async move { manager.accept(accepted).await });
        }
    }

    /// Like [`RattleServer::serve`], but returns `Ok(())` once `running` is
    /// cleared.  Live connections are closed on the way out.
    ///
    /// # Errors
    ///
    /// Returns the acceptor's error if it fails first.
    pub async fn serve_until<A: TransportAcceptor>(
        self,
        mut acceptor: A,
        running: Arc<AtomicBool>,
    ) -> Result<(), TransportError> {
        let manager = self.into_manager();
        info!("Rattle server ready");

        while running.load(Ordering::Relaxed) {
            // Short timeout so the flag is re-checked while nobody connects.
            match timeout(SHUTDOWN_POLL, acceptor.accept()).await {
                Ok(Ok(accepted)) => {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.accept(accepted).await });
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {}
            }
        }

        let open = manager.connections().snapshot().await;
        info!("shutting down; closing {} connection(s)", open.len());
        for handle in open {
            debug!("closing connection {}", handle.id());
            handle.close().await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RattleServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RattleServer")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
