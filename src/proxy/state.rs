//! Observable run state of the proxy lifecycle
//!
//! A single state value replaces separate "ready" and "stopped" flags.
//! Every start bumps a generation counter; transitions requested by a worker
//! from an older generation are ignored, so a worker that outlived its
//! `stop` can never disturb the next cycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Lifecycle phase of the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No cycle has run yet
    Idle,
    /// Worker spawned, engine not yet listening
    Starting,
    /// Engine listening and serving
    Running,
    /// Shutdown requested, waiting for the worker
    Stopping,
    /// Cycle finished
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
        }
    }

    /// `Idle` and `Stopped` are both "not running"
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Idle | RunState::Stopped)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Callback invoked with `(from, to)` after every state change
pub type TransitionCallback = Arc<dyn Fn(RunState, RunState) + Send + Sync>;

#[derive(Debug)]
struct Inner {
    state: RunState,
    generation: u64,
}

/// Shared, condition-variable backed run state
pub struct Lifecycle {
    inner: Mutex<Inner>,
    changed: Condvar,
    observers: Mutex<Vec<TransitionCallback>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                generation: 0,
            }),
            changed: Condvar::new(),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> RunState {
        self.inner.lock().state
    }

    /// Register a transition observer
    pub fn on_transition(&self, callback: TransitionCallback) {
        self.observers.lock().push(callback);
    }

    /// Enter `Starting` for a new cycle and return its generation
    pub fn begin_cycle(&self) -> u64 {
        let (from, generation) = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.generation += 1;
            inner.state = RunState::Starting;
            (from, inner.generation)
        };
        self.changed.notify_all();
        self.notify(from, RunState::Starting);
        generation
    }

    /// Move to `to` if `generation` is current and the state is one of `from`
    pub fn advance(&self, generation: u64, from: &[RunState], to: RunState) -> bool {
        let previous = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || !from.contains(&inner.state) {
                return false;
            }
            let previous = inner.state;
            inner.state = to;
            previous
        };
        self.changed.notify_all();
        if previous != to {
            self.notify(previous, to);
        }
        true
    }

    /// Move the given cycle to `Stopped` from wherever it is
    pub fn finish(&self, generation: u64) -> bool {
        self.advance(
            generation,
            &[RunState::Starting, RunState::Running, RunState::Stopping],
            RunState::Stopped,
        )
    }

    /// Block while the cycle is `Starting`, up to `timeout`; returns the state seen last
    pub fn wait_while_starting(&self, generation: u64, timeout: Duration) -> RunState {
        let mut inner = self.inner.lock();
        self.changed.wait_while_for(
            &mut inner,
            |inner| inner.generation == generation && inner.state == RunState::Starting,
            timeout,
        );
        inner.state
    }

    fn notify(&self, from: RunState, to: RunState) {
        debug!(from = %from, to = %to, "Proxy state transition");
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer(from, to);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.current(), RunState::Idle);
        assert!(lifecycle.current().is_terminal());
    }

    #[test]
    fn test_full_cycle() {
        let lifecycle = Lifecycle::new();
        let generation = lifecycle.begin_cycle();

        assert!(lifecycle.advance(generation, &[RunState::Starting], RunState::Running));
        assert!(lifecycle.advance(generation, &[RunState::Running], RunState::Stopping));
        assert!(lifecycle.finish(generation));
        assert_eq!(lifecycle.current(), RunState::Stopped);

        // Already stopped
        assert!(!lifecycle.finish(generation));
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let lifecycle = Lifecycle::new();
        let old = lifecycle.begin_cycle();
        let new = lifecycle.begin_cycle();
        assert_ne!(old, new);

        assert!(!lifecycle.finish(old));
        assert_eq!(lifecycle.current(), RunState::Starting);
        assert!(lifecycle.advance(new, &[RunState::Starting], RunState::Running));
    }

    #[test]
    fn test_observers_see_transitions() {
        let lifecycle = Lifecycle::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        lifecycle.on_transition(Arc::new(move |from, to| sink.lock().push((from, to))));

        let generation = lifecycle.begin_cycle();
        lifecycle.advance(generation, &[RunState::Starting], RunState::Running);
        lifecycle.finish(generation);

        assert_eq!(
            *seen.lock(),
            vec![
                (RunState::Idle, RunState::Starting),
                (RunState::Starting, RunState::Running),
                (RunState::Running, RunState::Stopped),
            ]
        );
    }

    #[test]
    fn test_wait_while_starting_times_out() {
        let lifecycle = Lifecycle::new();
        let generation = lifecycle.begin_cycle();

        let state = lifecycle.wait_while_starting(generation, Duration::from_millis(20));
        assert_eq!(state, RunState::Starting);
    }

    #[test]
    fn test_wait_while_starting_wakes_on_ready() {
        let lifecycle = Arc::new(Lifecycle::new());
        let generation = lifecycle.begin_cycle();

        let worker = {
            let lifecycle = Arc::clone(&lifecycle);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                lifecycle.advance(generation, &[RunState::Starting], RunState::Running);
            })
        };

        let state = lifecycle.wait_while_starting(generation, Duration::from_secs(5));
        assert_eq!(state, RunState::Running);
        worker.join().unwrap();
    }
}
