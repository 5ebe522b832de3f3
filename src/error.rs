use http::StatusCode;
use thiserror::Error;

/// Unified error type for the name spoofing proxy
#[derive(Error, Debug)]
pub enum NamespoofError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid display name: {0}")]
    InvalidName(String),

    // Lifecycle errors
    #[error("Interception engine failed to start: {0}")]
    EngineStartup(String),

    #[error("Interception engine is not listening")]
    NotListening,

    #[error("Port {port} on {host} is still in use")]
    PortInUse { host: String, port: u16 },

    #[error("Failed to spawn proxy worker: {0}")]
    WorkerSpawn(String),

    // Forwarding errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for namespoof operations
pub type Result<T> = std::result::Result<T, NamespoofError>;

impl NamespoofError {
    /// Status code the proxy answers with when forwarding fails with this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            NamespoofError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            // 502 Bad Gateway
            NamespoofError::ProxyConnectionFailed(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            NamespoofError::RequestTimeout | NamespoofError::Timeout => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // 500 Internal Server Error
            NamespoofError::InvalidConfig(_)
            | NamespoofError::InvalidName(_)
            | NamespoofError::EngineStartup(_)
            | NamespoofError::NotListening
            | NamespoofError::PortInUse { .. }
            | NamespoofError::WorkerSpawn(_)
            | NamespoofError::Io(_)
            | NamespoofError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            NamespoofError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            NamespoofError::ProxyConnectionFailed("refused".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            NamespoofError::Timeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            NamespoofError::RequestTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            NamespoofError::NotListening.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_port_in_use_message() {
        let err = NamespoofError::PortInUse {
            host: "127.0.0.1".to_string(),
            port: 8080,
        };
        assert_eq!(err.to_string(), "Port 8080 on 127.0.0.1 is still in use");
    }
}
