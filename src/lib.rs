//! Namespoof - display-name rewriting proxy
//!
//! Runs a local intercepting proxy and rewrites the first `displayName`
//! field of matching JSON responses to a configurable value.
//!
//! ## Features
//!
//! - Start/stop lifecycle on a dedicated worker thread with bounded waits
//! - Live name updates without restarting the proxy
//! - Host and content-type matching rules
//! - Rewrite events published on a broadcast channel

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod services;

pub use config::Config;
pub use error::{NamespoofError, Result};
pub use proxy::ProxyController;
