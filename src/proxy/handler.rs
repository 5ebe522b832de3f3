//! Intercepting request handler
//!
//! Forwards proxied HTTP requests to their origin, buffers the response,
//! runs every registered [`ResponseHook`] over it and hands the result back
//! to the client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{ACCEPT_ENCODING, HOST};
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, instrument, warn};

use crate::error::{NamespoofError, Result};
use crate::proxy::hook::{InterceptedResponse, ResponseHook};
use crate::proxy::transport::{is_hop_by_hop_header, OriginTransport};
use crate::proxy::tunnel::TunnelHandler;

/// Configuration for the intercepting handler
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Timeout for origin connections
    pub connect_timeout: Duration,
    /// Timeout for the origin response
    pub request_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Request handler shared by all connections of one engine
pub struct InterceptHandler {
    config: HandlerConfig,
    hooks: Vec<Arc<dyn ResponseHook>>,
}

impl InterceptHandler {
    pub fn new(config: HandlerConfig, hooks: Vec<Arc<dyn ResponseHook>>) -> Self {
        Self { config, hooks }
    }

    /// Handle an incoming proxy request
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle(&self, req: Request<Incoming>, client_ip: String) -> Response<Full<Bytes>> {
        let result = if req.method() == Method::CONNECT {
            self.handle_connect(req, &client_ip)
        } else {
            self.handle_http(req).await
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!("Request from {} failed: {}", client_ip, e);
                error_response(e.status_code(), &e.to_string())
            }
        }
    }

    /// Answer CONNECT with a blind tunnel to the origin
    fn handle_connect(&self, req: Request<Incoming>, client_ip: &str) -> Result<Response<Full<Bytes>>> {
        let authority = req
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| req.uri().to_string());
        let (target_host, target_port) = OriginTransport::parse_authority(&authority)?;

        debug!(
            "CONNECT request to {}:{} from {}",
            target_host, target_port, client_ip
        );

        let on_upgrade: OnUpgrade = hyper::upgrade::on(req);
        let connect_timeout = self.config.connect_timeout;

        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    if let Err(e) = TunnelHandler::handle_upgraded(
                        upgraded,
                        &target_host,
                        target_port,
                        connect_timeout,
                    )
                    .await
                    {
                        debug!("Tunnel to {}:{} failed: {}", target_host, target_port, e);
                    }
                }
                Err(e) => {
                    debug!("CONNECT upgrade failed: {}", e);
                }
            }
        });

        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::new()))
            .map_err(|e| NamespoofError::Internal(e.to_string()))?)
    }

    /// Forward a plain HTTP request and intercept its response
    async fn handle_http(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let start = Instant::now();
        let (parts, body) = req.into_parts();
        let (target_host, target_port) = OriginTransport::request_target(&parts)?;

        let body_bytes = body
            .collect()
            .await
            .map_err(|e| NamespoofError::InvalidRequest(format!("Failed to read body: {}", e)))?
            .to_bytes();

        let upstream = self
            .forward_request(&parts, body_bytes, &target_host, target_port)
            .await?;

        let (mut response_parts, response_body) = upstream.into_parts();
        let mut flow = InterceptedResponse::new(
            target_host,
            response_parts.status,
            std::mem::take(&mut response_parts.headers),
            response_body,
        );
        for hook in &self.hooks {
            hook.response(&mut flow);
        }

        debug!(
            host = %flow.host,
            status = flow.status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Intercepted response"
        );

        response_parts.status = flow.status;
        response_parts.headers = flow.headers;
        Ok(Response::from_parts(response_parts, Full::new(flow.body)))
    }

    /// Send the request to the origin and collect the whole response
    async fn forward_request(
        &self,
        parts: &http::request::Parts,
        body: Bytes,
        target_host: &str,
        target_port: u16,
    ) -> Result<Response<Bytes>> {
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let stream =
            OriginTransport::connect(target_host, target_port, self.config.connect_timeout).await?;

        // Origin-form request
        let mut builder = Request::builder()
            .method(parts.method.clone())
            .uri(path)
            .version(http::Version::HTTP_11);

        // Copy headers, except hop-by-hop headers. Encodings are dropped so
        // hooks always see an identity body.
        for (name, value) in &parts.headers {
            if !is_hop_by_hop_header(name.as_str()) && name != ACCEPT_ENCODING {
                builder = builder.header(name, value);
            }
        }
        if !parts.headers.contains_key(HOST) {
            let host = if target_port == 80 {
                target_host.to_string()
            } else {
                format!("{}:{}", target_host, target_port)
            };
            builder = builder.header(HOST, host);
        }

        let request = builder
            .body(Full::new(body))
            .map_err(|e| NamespoofError::InvalidRequest(format!("Failed to build request: {}", e)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| NamespoofError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Origin connection ended: {}", e);
            }
        });

        let response =
            tokio::time::timeout(self.config.request_timeout, sender.send_request(request))
                .await
                .map_err(|_| NamespoofError::RequestTimeout)?
                .map_err(|e| {
                    NamespoofError::ProxyConnectionFailed(format!("Request failed: {}", e))
                })?;

        let (mut parts, body) = response.into_parts();
        let body_bytes = tokio::time::timeout(self.config.request_timeout, body.collect())
            .await
            .map_err(|_| NamespoofError::RequestTimeout)?
            .map_err(|e| {
                NamespoofError::ProxyConnectionFailed(format!("Failed to read response: {}", e))
            })?
            .to_bytes();

        // The body is re-framed by our own connection
        let hop_by_hop: Vec<_> = parts
            .headers
            .keys()
            .filter(|name| is_hop_by_hop_header(name.as_str()))
            .cloned()
            .collect();
        for name in hop_by_hop {
            parts.headers.remove(&name);
        }

        Ok(Response::from_parts(parts, body_bytes))
    }
}

/// Create a plain-text error response
fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}
