//! Interface the lifecycle controller drives an interception engine through
//!
//! The controller never touches sockets or HTTP itself. It builds an engine
//! through an [`EngineFactory`] on the worker thread, attaches hooks, asks it
//! to listen and then runs it until a [`ShutdownHandle`] fires.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::proxy::hook::ResponseHook;

/// How the engine accepts client traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    /// Explicit HTTP proxy configured on the client
    #[default]
    Regular,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Regular => "regular",
        }
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An intercepting proxy engine
#[async_trait]
pub trait InterceptionEngine: Send {
    /// Register a hook called for every intercepted response
    fn register_response_hook(&mut self, hook: Arc<dyn ResponseHook>);

    /// Bind the listener; returns the address actually bound
    async fn listen(&mut self, host: &str, port: u16, mode: ProxyMode) -> Result<SocketAddr>;

    /// Serve connections until `shutdown` turns true or its sender is dropped
    async fn run_until_shutdown(&mut self, shutdown: watch::Receiver<bool>) -> Result<()>;
}

/// Builds a fresh engine for each start/stop cycle
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn InterceptionEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn InterceptionEngine>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn InterceptionEngine>> {
        self()
    }
}

/// Requests engine shutdown; callable from any thread, any number of times
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                shutdown_tx: Arc::new(tx),
            },
            rx,
        )
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new().0
    }
}

/// Resolves once shutdown was requested or every handle was dropped
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
