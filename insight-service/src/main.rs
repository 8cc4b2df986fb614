use insight_service::config::InsightConfig;
use insight_service::services::init_metrics;
use insight_service::startup::Application;
use service_core::observability::init_tracing;
use tokio::signal;
use tokio_util::sync::CancellationToken;

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = InsightConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "insight-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    // Install the recorder before anything records a metric.
    init_metrics().map_err(|e| {
        tracing::error!(error = %e, "Failed to install metrics recorder");
        std::io::Error::other(format!("Metrics error: {}", e))
    })?;

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    tokio::spawn(shutdown_signal(app.shutdown_token()));

    app.run_until_stopped().await
}
