//! Per-response hook interface between an interception engine and its policies

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};

/// A fully buffered upstream response, handed to hooks before it is sent to the client
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    /// Host the request was sent to, without port
    pub host: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptedResponse {
    pub fn new(host: impl Into<String>, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            host: host.into(),
            status,
            headers,
            body,
        }
    }

    /// The `Content-Type` header, or an empty string if missing or not valid text
    pub fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Replace the body and set `Content-Length` to its exact byte length
    pub fn replace_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
    }
}

/// Callback invoked by the engine for every intercepted response
///
/// Hooks run on the engine's event loop and must not block. They never fail:
/// anything a hook cannot handle leaves the response untouched.
pub trait ResponseHook: Send + Sync {
    fn response(&self, flow: &mut InterceptedResponse);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_defaults_to_empty() {
        let flow = InterceptedResponse::new("a.test", StatusCode::OK, HeaderMap::new(), Bytes::new());
        assert_eq!(flow.content_type(), "");
    }

    #[test]
    fn test_replace_body_updates_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(3usize));
        let mut flow = InterceptedResponse::new("a.test", StatusCode::OK, headers, Bytes::from("abc"));

        flow.replace_body("héllo");

        assert_eq!(flow.body, Bytes::from("héllo"));
        assert_eq!(flow.headers.get(CONTENT_LENGTH).unwrap(), "6");
    }
}
