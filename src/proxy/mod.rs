//! Interception proxy and its lifecycle
//!
//! This module provides:
//! - The lifecycle controller running the engine on a dedicated thread
//! - The display-name rewrite policy
//! - An HTTP/1 interception engine with CONNECT tunnelling

pub mod controller;
pub mod engine;
pub mod handler;
pub mod hook;
pub mod json;
pub mod policy;
pub mod server;
pub mod state;
pub mod transport;
pub mod tunnel;
pub mod worker;

pub use controller::ProxyController;
pub use engine::{EngineFactory, InterceptionEngine, ProxyMode, ShutdownHandle};
pub use hook::{InterceptedResponse, ResponseHook};
pub use policy::{NameSpoofPolicy, PolicyRules};
pub use server::{HttpEngineFactory, HttpInterceptionEngine};
pub use state::RunState;
pub use tunnel::TunnelHandler;
