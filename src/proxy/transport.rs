//! Origin addressing and direct connections
//!
//! The interception engine talks to origin servers directly; this module
//! works out where a proxied request is headed and opens the TCP stream.

use std::time::Duration;

use http::header::HOST;
use http::request::Parts;
use http::Uri;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{NamespoofError, Result};

pub struct OriginTransport;

impl OriginTransport {
    /// Open a TCP connection to the origin, bounded by `connect_timeout`
    #[instrument(skip(connect_timeout))]
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
        debug!("Connecting to origin {}:{}", host, port);

        match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(e)) => Err(NamespoofError::ProxyConnectionFailed(format!(
                "connect to {}:{} failed: {}",
                host, port, e
            ))),
            Err(_) => Err(NamespoofError::Timeout),
        }
    }

    /// Parse host and port from an absolute-form request URI
    pub fn parse_target(uri: &Uri) -> Result<(String, u16)> {
        let host = uri
            .host()
            .ok_or_else(|| NamespoofError::InvalidRequest("Missing host in URI".to_string()))?
            .to_string();

        let port = uri.port_u16().unwrap_or_else(|| match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        });

        Ok((host, port))
    }

    /// Resolve the origin of a request, falling back to the `Host` header
    pub fn request_target(parts: &Parts) -> Result<(String, u16)> {
        if parts.uri.host().is_some() {
            return Self::parse_target(&parts.uri);
        }

        let host = parts
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| NamespoofError::InvalidRequest("Missing Host header".to_string()))?;

        let (host, port) = match host.rsplit_once(':') {
            Some((_, port)) if !port.contains(']') => Self::parse_authority(host)?,
            _ => (host.trim_matches(|c| c == '[' || c == ']').to_string(), 80),
        };
        if host.is_empty() {
            return Err(NamespoofError::InvalidRequest("Empty Host header".to_string()));
        }
        Ok((host, port))
    }

    /// Parse host and port from authority (for CONNECT requests)
    pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
        // Bracketed IPv6 literal, optionally with a port
        if let Some(rest) = authority.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| NamespoofError::InvalidRequest("Invalid IPv6 authority".to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port
                    .parse::<u16>()
                    .map_err(|_| NamespoofError::InvalidRequest("Invalid port".to_string()))?,
                None => 443,
            };
            return Ok((host.to_string(), port));
        }

        if let Some((host, port_str)) = authority.rsplit_once(':') {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| NamespoofError::InvalidRequest("Invalid port".to_string()))?;
            Ok((host.to_string(), port))
        } else {
            // Default to port 443 for CONNECT (typically HTTPS)
            Ok((authority.to_string(), 443))
        }
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
