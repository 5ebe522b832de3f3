//! Interception engine built on hyper
//!
//! Accepts explicit-proxy connections, serves them with an
//! [`InterceptHandler`] and tears every connection down on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::config::ProxyServerConfig;
use crate::error::{NamespoofError, Result};
use crate::proxy::engine::{wait_for_shutdown, EngineFactory, InterceptionEngine, ProxyMode};
use crate::proxy::handler::{HandlerConfig, InterceptHandler};
use crate::proxy::hook::ResponseHook;

/// HTTP/1 intercepting proxy engine
pub struct HttpInterceptionEngine {
    config: HandlerConfig,
    hooks: Vec<Arc<dyn ResponseHook>>,
    listener: Option<TcpListener>,
}

impl HttpInterceptionEngine {
    pub fn new(config: HandlerConfig) -> Self {
        Self {
            config,
            hooks: Vec::new(),
            listener: None,
        }
    }

    /// Handle a single connection
    async fn handle_connection(
        stream: TcpStream,
        client_addr: SocketAddr,
        handler: Arc<InterceptHandler>,
    ) -> Result<()> {
        let io = TokioIo::new(stream);
        let client_ip = client_addr.ip().to_string();

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            let client_ip = client_ip.clone();

            async move { Ok::<_, std::convert::Infallible>(handler.handle(req, client_ip).await) }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
            .map_err(|e| NamespoofError::ProxyConnectionFailed(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl InterceptionEngine for HttpInterceptionEngine {
    fn register_response_hook(&mut self, hook: Arc<dyn ResponseHook>) {
        self.hooks.push(hook);
    }

    #[instrument(skip(self))]
    async fn listen(&mut self, host: &str, port: u16, mode: ProxyMode) -> Result<SocketAddr> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| NamespoofError::EngineStartup(format!("bind {}:{} failed: {}", host, port, e)))?;
        let addr = listener.local_addr()?;

        info!("Interception engine listening on {} ({} mode)", addr, mode);
        self.listener = Some(listener);
        Ok(addr)
    }

    #[instrument(skip(self, shutdown))]
    async fn run_until_shutdown(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = self.listener.take().ok_or(NamespoofError::NotListening)?;
        let handler = Arc::new(InterceptHandler::new(
            self.config.clone(),
            self.hooks.clone(),
        ));
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let handler = handler.clone();
                            connections.spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, client_addr, handler).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            break Err(NamespoofError::Io(e));
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Interception engine shutting down");
                    break Ok(());
                }
            }
        };

        // Close the listening socket before draining
        drop(listener);

        let in_flight = connections.len();
        connections.shutdown().await;
        if in_flight > 0 {
            debug!("Cancelled {} in-flight connections", in_flight);
        }

        result
    }
}

/// Builds [`HttpInterceptionEngine`] instances for the lifecycle controller
#[derive(Debug, Clone, Default)]
pub struct HttpEngineFactory {
    config: HandlerConfig,
}

impl HttpEngineFactory {
    pub fn new(config: HandlerConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &ProxyServerConfig) -> Self {
        Self::new(HandlerConfig {
            connect_timeout: Duration::from_secs(config.connect_timeout),
            request_timeout: Duration::from_secs(config.request_timeout),
        })
    }
}

impl EngineFactory for HttpEngineFactory {
    fn create(&self) -> Result<Box<dyn InterceptionEngine>> {
        Ok(Box::new(HttpInterceptionEngine::new(self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::engine::ShutdownHandle;

    #[tokio::test]
    async fn test_listen_reports_bound_address() {
        let mut engine = HttpInterceptionEngine::new(HandlerConfig::default());
        let addr = engine.listen("127.0.0.1", 0, ProxyMode::Regular).await.unwrap();

        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_listen_fails_on_bound_port() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut engine = HttpInterceptionEngine::new(HandlerConfig::default());
        let err = engine
            .listen("127.0.0.1", port, ProxyMode::Regular)
            .await
            .unwrap_err();
        assert!(matches!(err, NamespoofError::EngineStartup(_)));
    }

    #[tokio::test]
    async fn test_run_requires_listen() {
        let mut engine = HttpInterceptionEngine::new(HandlerConfig::default());
        let (_handle, shutdown) = ShutdownHandle::new();

        let err = engine.run_until_shutdown(shutdown).await.unwrap_err();
        assert!(matches!(err, NamespoofError::NotListening));
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown_and_releases_port() {
        let mut engine = HttpInterceptionEngine::new(HandlerConfig::default());
        let addr = engine.listen("127.0.0.1", 0, ProxyMode::Regular).await.unwrap();
        let (handle, shutdown) = ShutdownHandle::new();

        // Hold one idle client connection open across shutdown
        let run = tokio::spawn(async move { engine.run_until_shutdown(shutdown).await });
        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("engine ignored shutdown")
            .unwrap();
        assert!(result.is_ok());

        TcpListener::bind(addr).await.expect("listen port still held");
    }
}
