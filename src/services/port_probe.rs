//! Listen port availability checks
//!
//! A previous instance that was killed uncleanly can leave the proxy port
//! bound for a short while. The binary probes before starting the controller.

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, instrument, warn};

/// Check whether `host:port` is currently bound by someone else
pub async fn is_port_in_use(host: &str, port: u16) -> bool {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => {
            drop(listener);
            false
        }
        Err(e) => {
            debug!("Probe bind on {}:{} failed: {}", host, port, e);
            true
        }
    }
}

/// Wait until `host:port` can be bound, probing `attempts` times
///
/// Returns `false` if the port was still taken after the last attempt.
#[instrument]
pub async fn wait_for_port_free(host: &str, port: u16, attempts: u32, interval: Duration) -> bool {
    for attempt in 1..=attempts.max(1) {
        if !is_port_in_use(host, port).await {
            return true;
        }

        warn!(
            "Port {}:{} in use (attempt {}/{})",
            host, port, attempt, attempts
        );
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_free_port_is_not_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!is_port_in_use("127.0.0.1", port).await);
        assert!(wait_for_port_free("127.0.0.1", port, 1, Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_bound_port_is_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(is_port_in_use("127.0.0.1", port).await);
        assert!(!wait_for_port_free("127.0.0.1", port, 2, Duration::from_millis(10)).await);
    }

    #[test]
    fn test_port_freed_while_waiting() {
        tokio_test::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let release = async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                drop(listener);
            };
            let probe = wait_for_port_free("127.0.0.1", port, 20, Duration::from_millis(20));

            let ((), free) = tokio::join!(release, probe);
            assert!(free);
        });
    }
}
