use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use agent_relay::api::relay_routes;
use agent_relay::broadcast::spawn_heartbeat;
use agent_relay::config::RelayConfig;
use agent_relay::orchestrator::Orchestrator;
use agent_relay::registry::TaskRegistry;
use agent_relay::sweeper::{Sweeper, spawn_sweeper};
use agent_relay::worker::EchoWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing; keep the guard alive so buffered file logs get flushed.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "agent-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("Agent Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}/api", config.bind_addr);
    eprintln!(
        "   Retention: {}s (sweep every {}s)",
        config.retention.as_secs(),
        config.sweep_interval.as_secs()
    );
    if let Some(dir) = &config.log_dir {
        eprintln!("   Logs: {}", dir.display());
    }

    let registry = Arc::new(TaskRegistry::in_memory());
    let worker = Arc::new(EchoWorker::new().with_delay(Duration::from_millis(50)));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        worker,
        config.clone(),
    ));

    let shutdown = CancellationToken::new();
    let sweeper = Arc::new(Sweeper::from_config(Arc::clone(&registry), &config));
    let sweep_handle = spawn_sweeper(Arc::clone(&sweeper), shutdown.clone());
    let heartbeat_handle = spawn_heartbeat(
        Arc::clone(registry.broadcaster()),
        config.heartbeat_interval,
        shutdown.clone(),
    );

    let app = relay_routes(orchestrator);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Relay server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweeper, shutdown))
        .await
        .context("Server error")?;

    let _ = tokio::join!(sweep_handle, heartbeat_handle);
    tracing::info!("Relay server stopped");
    Ok(())
}

/// Resolves on Ctrl-C after cancelling every task and closing every stream,
/// so open SSE connections end and the server can drain.
async fn shutdown_signal(sweeper: Arc<Sweeper>, shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
    sweeper.shutdown().await;
}
