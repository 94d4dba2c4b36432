pub mod http;
pub mod router;
pub mod state;
pub mod ws;

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::liveness::LivenessMonitor;
use crate::registry::SessionRegistry;

/// Start the relay server with the given configuration; runs until Ctrl-C.
pub async fn start(config: RelayConfig) -> Result<()> {
    config.validate()?;

    let bind_addr = config.bind_address();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| RelayError::Server(format!("Failed to bind to {bind_addr}: {e}")))?;

    tracing::info!("Server listening on {bind_addr}");

    serve(listener, config, async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// Owns the registry and the liveness monitor for the lifetime of the
/// server. On shutdown the monitor is stopped and every remaining session
/// is closed, notifying its peers.
pub async fn serve<F>(listener: TcpListener, config: RelayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = Arc::new(config);
    let registry = Arc::new(SessionRegistry::new(config.max_sessions));

    let monitor = Arc::new(LivenessMonitor::new(
        registry.clone(),
        config.probe_interval(),
        config.idle_timeout(),
    ));
    let monitor_task = monitor.clone().start();

    let app = router::build(state::AppState::new(registry.clone(), config));

    let teardown = {
        let registry = registry.clone();
        let monitor = monitor.clone();
        async move {
            shutdown.await;
            tracing::info!("Shutting down...");
            monitor.stop();
            for evicted in registry.clear("shutdown").await {
                for conn in &evicted.peers {
                    conn.close();
                }
            }
        }
    };

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(teardown)
        .await
        .map_err(|e| RelayError::Server(format!("Server error: {e}")));

    monitor.stop();
    if let Err(e) = monitor_task.await {
        tracing::warn!(error = %e, "Liveness monitor task failed");
    }

    result
}
