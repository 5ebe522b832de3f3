//! Display-name rewrite policy
//!
//! The policy owns the current target value and the matching rule. The
//! target can be replaced from any thread while the engine keeps calling
//! [`ResponseHook::response`]; readers see either the old or the new value,
//! never a partial one.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::{DEFAULT_CONTENT_TYPE, DEFAULT_MATCH_DOMAINS};
use crate::models::RewriteEvent;
use crate::proxy::hook::{InterceptedResponse, ResponseHook};
use crate::proxy::json;

/// Field of the first array element that carries the display name
pub const DISPLAY_NAME_FIELD: &str = "displayName";

/// Which responses the policy applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRules {
    /// Host fragments; a host matches if it contains any of them
    pub domains: Vec<String>,
    /// Fragment the `Content-Type` header must contain
    pub content_type: String,
    /// Field rewritten in the first element of the top-level array
    pub field: String,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            domains: DEFAULT_MATCH_DOMAINS.iter().map(|d| d.to_string()).collect(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            field: DISPLAY_NAME_FIELD.to_string(),
        }
    }
}

impl PolicyRules {
    /// Host names compare case-insensitively
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.domains
            .iter()
            .any(|d| host.contains(d.to_ascii_lowercase().as_str()))
    }

    pub fn matches_content_type(&self, content_type: &str) -> bool {
        content_type.contains(self.content_type.as_str())
    }
}

/// Result of a successful body rewrite
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    /// Previous field value
    pub old_value: Value,
    /// Target value that was substituted in
    pub new_value: Arc<String>,
    /// Serialized replacement body
    pub body: Vec<u8>,
}

/// Substitutes the target display name into matching JSON responses
pub struct NameSpoofPolicy {
    rules: PolicyRules,
    target: ArcSwap<String>,
    events: Option<broadcast::Sender<RewriteEvent>>,
}

impl NameSpoofPolicy {
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_rules(target, PolicyRules::default())
    }

    pub fn with_rules(target: impl Into<String>, rules: PolicyRules) -> Self {
        let target = target.into();
        debug!("Policy initialized with spoof name '{}'", target);
        Self {
            rules,
            target: ArcSwap::from_pointee(target),
            events: None,
        }
    }

    /// Publish every rewrite on the given channel
    pub fn with_event_sender(mut self, sender: broadcast::Sender<RewriteEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Snapshot of the current target value
    pub fn target(&self) -> Arc<String> {
        self.target.load_full()
    }

    /// Replace the target value; applies to the next intercepted response
    pub fn update_target(&self, target: impl Into<String>) {
        let target = target.into();
        let previous = self.target.swap(Arc::new(target.clone()));
        info!("Updating spoof name: {} -> {}", previous, target);
    }

    /// Compute the rewritten body for a response, or `None` if it must pass through untouched
    pub fn rewrite(&self, host: &str, content_type: &str, body: &[u8]) -> Option<Rewrite> {
        if !self.rules.matches_host(host) || !self.rules.matches_content_type(content_type) {
            return None;
        }

        let target = self.target.load_full();
        rewrite_first_field(body, &self.rules.field, target)
    }
}

impl ResponseHook for NameSpoofPolicy {
    fn response(&self, flow: &mut InterceptedResponse) {
        let Some(rewrite) = self.rewrite(&flow.host, flow.content_type(), &flow.body) else {
            return;
        };

        let old_value = display_value(&rewrite.old_value);
        let new_value = rewrite.new_value.as_str().to_owned();
        let body_len = rewrite.body.len();
        flow.replace_body(rewrite.body);

        info!(
            old = %old_value,
            new = %new_value,
            host = %flow.host,
            "SPOOFED: {} -> {} ({})",
            old_value,
            new_value,
            flow.host
        );

        if let Some(sender) = &self.events {
            let _ = sender.send(RewriteEvent::new(&flow.host, old_value, new_value, body_len));
        }
    }
}

/// Replace `field` in the first element of a top-level JSON array
fn rewrite_first_field(body: &[u8], field: &str, target: Arc<String>) -> Option<Rewrite> {
    let mut document: Value = serde_json::from_slice(body).ok()?;

    let entry = document
        .as_array_mut()?
        .first_mut()?
        .as_object_mut()?
        .get_mut(field)?;

    if entry.as_str() == Some(target.as_str()) {
        return None;
    }

    let old_value = std::mem::replace(entry, Value::String(target.as_str().to_owned()));
    let body = json::to_spaced_vec(&document).ok()?;

    Some(Rewrite {
        old_value,
        new_value: target,
        body,
    })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
