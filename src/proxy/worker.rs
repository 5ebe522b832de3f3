//! Dedicated execution context for the interception engine
//!
//! A [`ProxyWorker`] owns one OS thread running a single-threaded tokio
//! runtime. `cancel` asks the task to wind down through its shutdown
//! receiver, and `join` waits a bounded amount of time for the thread to
//! exit. Whatever the task leaves scheduled on the runtime is cancelled and
//! drained before the thread ends.

use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::{NamespoofError, Result};
use crate::proxy::engine::ShutdownHandle;

/// Name given to the worker thread
pub const WORKER_THREAD_NAME: &str = "namespoof-proxy";

/// How long leftover tasks get to finish once the main task returned
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// One-shot latch released when the worker thread is about to exit
#[derive(Default)]
struct ExitLatch {
    exited: Mutex<bool>,
    cond: Condvar,
}

impl ExitLatch {
    fn release(&self) {
        *self.exited.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut exited = self.exited.lock();
        self.cond.wait_while_for(&mut exited, |exited| !*exited, timeout);
        *exited
    }
}

/// Runs the exit callback and releases the latch, even when the thread unwinds
struct ExitGuard<E: FnOnce()> {
    latch: Arc<ExitLatch>,
    on_exit: Option<E>,
}

impl<E: FnOnce()> Drop for ExitGuard<E> {
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
        self.latch.release();
        debug!("Proxy thread exiting.");
    }
}

/// An owned worker thread with its own event loop
pub struct ProxyWorker {
    thread: Option<thread::JoinHandle<()>>,
    shutdown: ShutdownHandle,
    latch: Arc<ExitLatch>,
}

impl ProxyWorker {
    /// Spawn the worker thread and run `task` on its event loop
    ///
    /// `on_exit` runs on the worker thread after the event loop is torn down,
    /// on every exit path.
    pub fn spawn<F, Fut, E>(task: F, on_exit: E) -> Result<Self>
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
        E: FnOnce() + Send + 'static,
    {
        let (shutdown, shutdown_rx) = ShutdownHandle::new();
        let latch = Arc::new(ExitLatch::default());
        let thread_latch = Arc::clone(&latch);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let _guard = ExitGuard {
                    latch: thread_latch,
                    on_exit: Some(on_exit),
                };
                debug!("Proxy thread starting...");

                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build proxy event loop: {}", e);
                        return;
                    }
                };

                runtime.block_on(task(shutdown_rx));

                // Cancel whatever the task left behind
                runtime.shutdown_timeout(DRAIN_TIMEOUT);
            })
            .map_err(|e| NamespoofError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            thread: Some(thread),
            shutdown,
            latch,
        })
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Ask the task to shut down; safe to call repeatedly
    pub fn cancel(&self) {
        self.shutdown.shutdown();
    }

    /// Wait up to `timeout` for the thread to exit
    ///
    /// Returns `false` if the thread is still running; it is then detached.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };

        if !self.latch.wait(timeout) {
            return false;
        }

        if thread.join().is_err() {
            error!("Proxy thread panicked");
        }
        true
    }
}
