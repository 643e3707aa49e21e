use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use media_tasks::config::EngineConfig;
use media_tasks::tasks::{TaskManager, spawn_retention_task, task_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();

    // Initialize tracing (stderr, plus a daily rolling file when configured)
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "media-tasks.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    config.validate().context("invalid configuration")?;

    eprintln!("Media Tasks v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Task API: http://0.0.0.0:{}/api/tasks", config.port);
    eprintln!("   Task WS:  ws://0.0.0.0:{}/ws/tasks", config.port);
    match config.retention {
        Some(retention) => eprintln!(
            "   Retention: {}s (sweep every {}s)",
            retention.as_secs(),
            config.retention_sweep_interval.as_secs()
        ),
        None => eprintln!("   Retention: unbounded"),
    }

    let manager = TaskManager::from_config(&config);

    let _retention_handle = config.retention.map(|retention| {
        spawn_retention_task(
            manager.clone(),
            retention,
            config.retention_sweep_interval,
        )
    });

    let app = task_routes(manager.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind task server port {}", config.port))?;
    tracing::info!(port = config.port, "Task server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("task server failed")?;

    let cancelled = manager.cancel_all().await;
    tracing::info!(cancelled, "Task server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
