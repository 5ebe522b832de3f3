//! Proxy lifecycle controller
//!
//! Starts the interception engine on a dedicated worker thread, keeps the
//! live [`NameSpoofPolicy`] reachable for in-place updates and tears the
//! worker down again with a bounded wait. All methods take `&self` so the
//! controller can be shared with signal and crash handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::models::RewriteEvent;
use crate::proxy::engine::{EngineFactory, ProxyMode};
use crate::proxy::hook::ResponseHook;
use crate::proxy::policy::{NameSpoofPolicy, PolicyRules};
use crate::proxy::state::{Lifecycle, RunState, TransitionCallback};
use crate::proxy::worker::ProxyWorker;

/// Default time `start` waits for the engine to begin listening
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Default time `stop` waits for the worker thread
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything owned by one start/stop cycle
struct Session {
    generation: u64,
    worker: ProxyWorker,
    policy: Arc<NameSpoofPolicy>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
}

/// Controls the interception engine lifecycle on a background thread
pub struct ProxyController {
    host: String,
    port: u16,
    factory: Arc<dyn EngineFactory>,
    rules: PolicyRules,
    events: Option<broadcast::Sender<RewriteEvent>>,
    lifecycle: Arc<Lifecycle>,
    /// Serializes `start` and `stop`
    control: Mutex<()>,
    session: Mutex<Option<Session>>,
}

impl ProxyController {
    pub fn new(host: impl Into<String>, port: u16, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            host: host.into(),
            port,
            factory,
            rules: PolicyRules::default(),
            events: None,
            lifecycle: Arc::new(Lifecycle::new()),
            control: Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    /// Use custom matching rules for the policies this controller creates
    pub fn with_rules(mut self, rules: PolicyRules) -> Self {
        self.rules = rules;
        self
    }

    /// Publish rewrite events of every cycle on `sender`
    pub fn with_event_sender(mut self, sender: broadcast::Sender<RewriteEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.current()
    }

    /// Register a callback invoked with `(from, to)` on every state change
    ///
    /// Callbacks run on the thread that made the transition, right after the
    /// new state became visible.
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(RunState, RunState) + Send + Sync + 'static,
    {
        let callback: TransitionCallback = Arc::new(callback);
        self.lifecycle.on_transition(callback);
    }

    /// Check if the proxy is currently running
    pub fn is_running(&self) -> bool {
        let session = self.session.lock();
        match session.as_ref() {
            Some(session) => {
                session.worker.is_alive() && self.lifecycle.current() == RunState::Running
            }
            None => false,
        }
    }

    /// Address the engine is listening on, while a cycle is active
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let session = self.session.lock();
        session.as_ref().and_then(|s| *s.local_addr.lock())
    }

    /// Current target value of the live policy
    pub fn target_value(&self) -> Option<String> {
        let session = self.session.lock();
        session.as_ref().map(|s| s.policy.target().as_str().to_owned())
    }

    /// Start the proxy with the given spoof name, waiting [`DEFAULT_READY_TIMEOUT`]
    pub fn start(&self, spoof_name: &str) -> bool {
        self.start_with_timeout(spoof_name, DEFAULT_READY_TIMEOUT)
    }

    /// Start the proxy and wait up to `ready_timeout` for it to listen
    ///
    /// Returns `true` without doing anything if already running. On timeout
    /// the worker keeps going in the background; `stop` must still be called.
    pub fn start_with_timeout(&self, spoof_name: &str, ready_timeout: Duration) -> bool {
        let _control = self.control.lock();

        if self.is_running() {
            warn!("Proxy already running; ignoring start().");
            return true;
        }

        // A worker left over from a failed or timed out start
        let stale = self.session.lock().take();
        if let Some(stale) = stale {
            debug!("Reaping previous proxy worker before starting");
            self.shutdown_session(stale, DEFAULT_STOP_TIMEOUT);
        }

        let generation = self.lifecycle.begin_cycle();
        let mut policy = NameSpoofPolicy::with_rules(spoof_name, self.rules.clone());
        if let Some(sender) = &self.events {
            policy = policy.with_event_sender(sender.clone());
        }
        let policy = Arc::new(policy);
        let local_addr = Arc::new(Mutex::new(None));

        let worker = {
            let factory = Arc::clone(&self.factory);
            let lifecycle = Arc::clone(&self.lifecycle);
            let exit_lifecycle = Arc::clone(&self.lifecycle);
            let hook: Arc<dyn ResponseHook> = policy.clone();
            let host = self.host.clone();
            let port = self.port;
            let bound = Arc::clone(&local_addr);

            ProxyWorker::spawn(
                move |shutdown| async move {
                    let mut engine = match factory.create() {
                        Ok(engine) => engine,
                        Err(e) => {
                            error!("Failed to construct interception engine: {}", e);
                            return;
                        }
                    };
                    engine.register_response_hook(hook);

                    let addr = match engine.listen(&host, port, ProxyMode::Regular).await {
                        Ok(addr) => addr,
                        Err(e) => {
                            error!("Interception engine failed to listen: {}", e);
                            return;
                        }
                    };
                    *bound.lock() = Some(addr);

                    if lifecycle.advance(generation, &[RunState::Starting], RunState::Running) {
                        info!("Proxy running at {}", addr);
                    } else {
                        debug!("Stop requested before the proxy became ready");
                    }

                    match engine.run_until_shutdown(shutdown).await {
                        Ok(()) => debug!("Interception engine returned normally."),
                        Err(e) => error!("Interception engine runtime error: {}", e),
                    }
                },
                move || {
                    exit_lifecycle.finish(generation);
                    debug!("Proxy thread cleanup finished.");
                },
            )
        };

        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                error!("{}", e);
                self.lifecycle.finish(generation);
                return false;
            }
        };

        *self.session.lock() = Some(Session {
            generation,
            worker,
            policy,
            local_addr,
        });

        match self.lifecycle.wait_while_starting(generation, ready_timeout) {
            RunState::Running => {
                debug!("Proxy start sequence marked as running.");
                true
            }
            RunState::Starting => {
                error!("Proxy failed to report started within timeout.");
                false
            }
            state => {
                error!("Proxy failed to start (state: {}).", state);
                false
            }
        }
    }

    /// Stop the proxy, waiting up to `timeout` for the worker thread
    ///
    /// Always leaves the controller stopped, even if the worker does not
    /// exit in time.
    pub fn stop(&self, timeout: Duration) {
        let _control = self.control.lock();

        let session = self.session.lock().take();
        let Some(session) = session else {
            info!("Proxy not running; nothing to stop.");
            return;
        };

        self.shutdown_session(session, timeout);
        debug!("ProxyController stop() finished.");
    }

    /// Like [`stop`](Self::stop), but gives up if another start or stop holds the controller
    ///
    /// Returns `false` without touching the proxy in that case.
    pub fn try_stop(&self, timeout: Duration) -> bool {
        let Some(_control) = self.control.try_lock() else {
            return false;
        };

        if let Some(session) = self.session.lock().take() {
            self.shutdown_session(session, timeout);
        }
        true
    }

    /// Replace the spoof name of the running proxy
    pub fn update_policy(&self, new_name: &str) {
        if !self.is_running() {
            debug!("Proxy not running; ignoring spoof name update.");
            return;
        }

        if let Some(session) = self.session.lock().as_ref() {
            session.policy.update_target(new_name);
        }
    }

    fn shutdown_session(&self, mut session: Session, timeout: Duration) {
        let generation = session.generation;
        let was_running = self.lifecycle.current() == RunState::Running;

        self.lifecycle.advance(
            generation,
            &[RunState::Starting, RunState::Running],
            RunState::Stopping,
        );

        if was_running {
            info!("Stopping proxy (timeout {:.1}s) ...", timeout.as_secs_f64());
        }
        session.worker.cancel();

        if session.worker.join(timeout) {
            info!("Proxy thread stopped cleanly.");
        } else {
            error!(
                "Proxy thread did not stop within {:.1}s.",
                timeout.as_secs_f64()
            );
        }

        // Mark stopped regardless, to avoid stale state
        self.lifecycle.finish(generation);
    }
}

impl Drop for ProxyController {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            self.shutdown_session(session, DEFAULT_STOP_TIMEOUT);
        }
    }
}
