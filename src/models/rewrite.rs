use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single display-name substitution performed on an intercepted response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteEvent {
    /// Host the response came from
    pub host: String,
    /// Field value before the rewrite, rendered as text
    pub old_value: String,
    /// Value substituted in
    pub new_value: String,
    /// Byte length of the rewritten body
    pub body_len: usize,
    pub timestamp: DateTime<Utc>,
}

impl RewriteEvent {
    pub fn new(host: &str, old_value: String, new_value: String, body_len: usize) -> Self {
        Self {
            host: host.to_string(),
            old_value,
            new_value,
            body_len,
            timestamp: Utc::now(),
        }
    }
}
