//! Supporting services for the binary

pub mod cleanup;
pub mod port_probe;

pub use cleanup::{
    install_panic_hook, shutdown_signal, stop_if_running, try_stop_if_running, CleanupGuard,
};
pub use port_probe::{is_port_in_use, wait_for_port_free};
