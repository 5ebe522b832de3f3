//! Process-exit cleanup for the proxy controller
//!
//! The controller is always passed in explicitly; nothing here keeps a
//! global reference to it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use crate::proxy::worker::WORKER_THREAD_NAME;
use crate::proxy::ProxyController;

/// Stop the controller if it still has a live cycle
pub fn stop_if_running(controller: &ProxyController, timeout: Duration) {
    if controller.state().is_terminal() {
        return;
    }

    info!("Stopping proxy during cleanup");
    controller.stop(timeout);
}

/// Stops the proxy when dropped
///
/// Keep one alive for the lifetime of `main` so an early return or an
/// unwinding panic still releases the listen port.
pub struct CleanupGuard {
    controller: Arc<ProxyController>,
    timeout: Duration,
}

impl CleanupGuard {
    pub fn new(controller: Arc<ProxyController>, timeout: Duration) -> Self {
        Self {
            controller,
            timeout,
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        stop_if_running(&self.controller, self.timeout);
    }
}

/// Stop the controller unless a start or stop is already in progress
///
/// Returns `false` if the controller was busy and left alone.
pub fn try_stop_if_running(controller: &ProxyController, timeout: Duration) -> bool {
    if controller.state().is_terminal() {
        return true;
    }

    info!("Stopping proxy during cleanup");
    controller.try_stop(timeout)
}

/// Log panics and stop the proxy before the previous hook runs
///
/// Panics on the proxy worker thread only get logged; the controller joins
/// that thread, so stopping from there would wait on itself. A panic raised
/// while the controller is mid start or stop skips the stop as well.
pub fn install_panic_hook(controller: Weak<ProxyController>, timeout: Duration) {
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");
        error!("Unhandled panic on thread '{}': {}", thread_name, panic_info);

        if thread_name == WORKER_THREAD_NAME {
            warn!("Panic on proxy worker; leaving shutdown to the controller");
        } else if let Some(controller) = controller.upgrade() {
            if !try_stop_if_running(&controller, timeout) {
                warn!("Proxy controller busy; skipping stop from panic hook");
            }
        }

        previous(panic_info);
    }));
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{HttpEngineFactory, RunState};

    fn controller() -> Arc<ProxyController> {
        Arc::new(ProxyController::new(
            "127.0.0.1",
            0,
            Arc::new(HttpEngineFactory::default()),
        ))
    }

    #[test]
    fn test_guard_stops_running_proxy() {
        let controller = controller();
        assert!(controller.start("Alpha"));

        {
            let _guard = CleanupGuard::new(Arc::clone(&controller), Duration::from_secs(2));
        }

        assert!(!controller.is_running());
        assert_eq!(controller.state(), RunState::Stopped);
    }

    #[test]
    fn test_guard_leaves_idle_proxy_alone() {
        let controller = controller();

        drop(CleanupGuard::new(Arc::clone(&controller), Duration::from_secs(1)));

        assert_eq!(controller.state(), RunState::Idle);
    }

    #[test]
    fn test_try_stop_if_running_skips_busy_controller() {
        let controller = controller();
        let results = Arc::new(parking_lot::Mutex::new(Vec::new()));

        {
            let weak = Arc::downgrade(&controller);
            let results = Arc::clone(&results);
            controller.on_transition(move |_, to| {
                if to != RunState::Starting {
                    return;
                }
                if let Some(controller) = weak.upgrade() {
                    results
                        .lock()
                        .push(try_stop_if_running(&controller, Duration::from_secs(1)));
                }
            });
        }

        assert!(controller.start("Alpha"));
        assert_eq!(*results.lock(), vec![false]);

        assert!(try_stop_if_running(&controller, Duration::from_secs(2)));
        assert_eq!(controller.state(), RunState::Stopped);
    }

    #[test]
    fn test_stop_if_running_after_stop_is_noop() {
        let controller = controller();
        assert!(controller.start("Alpha"));
        controller.stop(Duration::from_secs(2));

        stop_if_running(&controller, Duration::from_secs(1));
        assert_eq!(controller.state(), RunState::Stopped);
    }
}
