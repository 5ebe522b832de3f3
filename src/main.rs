//! Namespoof - Entry Point
//!
//! Starts the rewriting proxy, applies new names typed on stdin and shuts
//! down cleanly on Ctrl+C, SIGTERM or when the proxy dies.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use namespoof::config::{validate_spoof_name, Config};
use namespoof::error::{NamespoofError, Result};
use namespoof::models::RewriteEvent;
use namespoof::proxy::{HttpEngineFactory, PolicyRules, ProxyController};
use namespoof::services::{install_panic_hook, shutdown_signal, wait_for_port_free, CleanupGuard};

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    namespoof::logging::init(&config.log)?;

    info!("Starting Namespoof");

    let (event_sender, _) = broadcast::channel::<RewriteEvent>(256);

    let rules = PolicyRules {
        domains: config.spoof.domains.clone(),
        content_type: config.spoof.content_type.clone(),
        ..PolicyRules::default()
    };
    let controller = Arc::new(
        ProxyController::new(
            config.proxy.host.clone(),
            config.proxy.port,
            Arc::new(HttpEngineFactory::from_config(&config.proxy)),
        )
        .with_rules(rules)
        .with_event_sender(event_sender.clone()),
    );

    let stop_timeout = config.proxy.stop_timeout();
    install_panic_hook(Arc::downgrade(&controller), stop_timeout);
    let _cleanup = CleanupGuard::new(Arc::clone(&controller), stop_timeout);

    if !wait_for_port_free(
        &config.proxy.host,
        config.proxy.port,
        config.proxy.port_probe_attempts,
        config.proxy.port_probe_interval(),
    )
    .await
    {
        return Err(NamespoofError::PortInUse {
            host: config.proxy.host.clone(),
            port: config.proxy.port,
        });
    }

    let started = {
        let controller = Arc::clone(&controller);
        let name = config.spoof.name.clone();
        let ready_timeout = config.proxy.ready_timeout();
        tokio::task::spawn_blocking(move || controller.start_with_timeout(&name, ready_timeout))
            .await
            .map_err(|e| NamespoofError::Internal(e.to_string()))?
    };
    if !started {
        return Err(NamespoofError::EngineStartup(format!(
            "proxy did not start on {}",
            config.proxy_addr()
        )));
    }

    info!(
        "Proxy listening on {} - spoofing as '{}'",
        controller
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| config.proxy_addr()),
        config.spoof.name
    );
    info!("Type a new name and press Enter to change it; Ctrl+C to quit");

    // Rewrite counter
    let mut events = event_sender.subscribe();
    let event_task = tokio::spawn(async move {
        let mut count: u64 = 0;
        loop {
            match events.recv().await {
                Ok(event) => {
                    count += 1;
                    info!(
                        host = %event.host,
                        body_len = event.body_len,
                        total = count,
                        "Rewrote display name"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Rewrite event listener lagged by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match validate_spoof_name(&line) {
                        Ok(name) => {
                            controller.update_policy(&name);
                            info!("Spoof name is now '{}'", name);
                        }
                        Err(e) => warn!("{}", e),
                    },
                    Ok(None) => {
                        info!("stdin closed; name updates disabled");
                        stdin_open = false;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = watchdog.tick() => {
                if !controller.is_running() {
                    error!("Proxy stopped unexpectedly");
                    break;
                }
            }
        }
    }

    {
        let controller = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || controller.stop(stop_timeout))
            .await
            .map_err(|e| NamespoofError::Internal(e.to_string()))?;
    }
    event_task.abort();

    info!("Namespoof stopped");
    Ok(())
}
