use crate::backends::{
    AdapterConfig, BackendAdapter, BackendSet, CommandRenderer, GeminiClient, GeminiConfig,
    MockBackend, VisionClient,
};
use crate::config::{BackendMode, BusyPolicySetting, InsightConfig, StorageBackend};
use crate::handlers;
use crate::orchestrator::{spawn_sweeper, Orchestrator, OrchestratorConfig, RetryPolicy};
use crate::services::{ArtifactStore, LocalStorage, MemoryStorage, Storage, StoreConfig};
use crate::sessions::{BusyPolicy, RegistryConfig, SessionRegistry};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Headroom over the artifact limit so oversize uploads reach the store and
/// are reported with its limit.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: InsightConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub backend_mode: &'static str,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
}

impl Application {
    /// Builds the application with the backends selected by `BACKEND_MODE`.
    pub async fn build(config: InsightConfig) -> Result<Self, AppError> {
        let backends = match config.backends.mode {
            BackendMode::Mock => {
                tracing::warn!("Using mock analysis backends");
                BackendSet::mock(Arc::new(MockBackend::new()))
            }
            BackendMode::Live => live_backends(&config)?,
        };
        Self::build_with_backends(config, backends).await
    }

    pub async fn build_with_backends(
        config: InsightConfig,
        backends: BackendSet,
    ) -> Result<Self, AppError> {
        let storage: Arc<dyn Storage> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            StorageBackend::Local => Arc::new(
                LocalStorage::new(&config.storage.local_path)
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            error = %e,
                            path = %config.storage.local_path,
                            "Failed to initialize local storage"
                        );
                        e
                    })?,
            ),
        };

        let store = Arc::new(ArtifactStore::new(
            storage,
            StoreConfig {
                max_bytes: config.store.max_bytes,
                max_staged: config.store.max_staged,
                ttl: config.store.ttl(),
                io_timeout: config.store.io_timeout(),
            },
        ));

        let busy_policy = match config.sessions.busy_policy {
            BusyPolicySetting::FailFast => BusyPolicy::FailFast,
            BusyPolicySetting::Wait => BusyPolicy::Wait(config.sessions.busy_wait()),
        };
        let registry = Arc::new(SessionRegistry::new(
            store.clone(),
            RegistryConfig {
                ttl: config.sessions.ttl(),
                capacity: config.sessions.max_sessions,
                busy_policy,
            },
        ));

        let adapter = Arc::new(BackendAdapter::new(
            backends,
            AdapterConfig {
                call_timeout: config.backends.timeout(),
                render_timeout: config.backends.render_timeout(),
                unreachable_after: config.backends.unreachable_after,
            },
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            store,
            registry,
            adapter,
            OrchestratorConfig {
                max_units: config.sessions.max_units,
                max_rendered_bytes: config.sessions.max_rendered_bytes,
                max_in_flight: config.backends.max_in_flight,
                retry: RetryPolicy {
                    max_retries: config.backends.retry_budget,
                    initial_backoff: config.backends.retry_backoff(),
                    ..Default::default()
                },
                analysis_deadline: config.backends.analysis_deadline(),
                default_language: config.default_language.clone(),
            },
        ));

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, "Insight service listener bound");

        let backend_mode = match config.backends.mode {
            BackendMode::Mock => "mock",
            BackendMode::Live => "live",
        };

        Ok(Self {
            port,
            listener,
            state: AppState {
                config,
                orchestrator,
                backend_mode,
            },
            shutdown: CancellationToken::new(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.state.orchestrator.clone()
    }

    /// Cancelling this token stops the server and the sweeper.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let orchestrator = self.state.orchestrator.clone();
        let sweeper = spawn_sweeper(
            orchestrator.registry().clone(),
            orchestrator.store().clone(),
            self.state.config.sessions.sweep_interval(),
            self.shutdown.clone(),
        );

        let router = router(self.state);

        tracing::info!(
            service = "insight-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let shutdown = self.shutdown.clone();
        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown.cancel();
        if let Err(e) = sweeper.await {
            tracing::error!(error = %e, "Sweeper task failed");
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

fn router(state: AppState) -> Router {
    let body_limit = state.config.store.max_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/formats", get(handlers::list_formats))
        .route("/upload", post(handlers::upload))
        .route("/speech", post(handlers::synthesize))
        .route(
            "/session/:id",
            get(handlers::get_session).delete(handlers::close_session),
        )
        .route("/session/:id/navigate", post(handlers::navigate))
        .route("/session/:id/summary", get(handlers::session_summary))
        .route("/session/:id/unit/:index", get(handlers::get_unit))
        .route(
            "/session/:id/unit/:index/reanalyze",
            post(handlers::reanalyze_unit),
        )
        .route("/session/:id/unit/:index/speech", get(handlers::unit_speech))
        .route("/session/:id/unit/:index/image", get(handlers::unit_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

fn live_backends(config: &InsightConfig) -> Result<BackendSet, AppError> {
    let api_key = config.gemini.api_key.clone().ok_or_else(|| {
        AppError::ConfigError(anyhow::anyhow!("GOOGLE_AI_API_KEY is required for live backends"))
    })?;
    let vision_url = config.vision.url.clone().ok_or_else(|| {
        AppError::ConfigError(anyhow::anyhow!("VISION_SERVICE_URL is required for live backends"))
    })?;

    let gemini = GeminiClient::new(GeminiConfig {
        api_key,
        model: config.gemini.model.clone(),
        tts_model: config.gemini.tts_model.clone(),
        api_base: config.gemini.api_base.clone(),
    })
    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    let vision =
        VisionClient::new(vision_url).map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    let renderer = CommandRenderer::new(
        config.backends.render_timeout(),
        config.renderer.dpi,
        config.renderer.temp_dir.clone(),
    );

    tracing::info!(
        model = %config.gemini.model,
        tts_model = %config.gemini.tts_model,
        "Using live analysis backends"
    );
    Ok(BackendSet::live(gemini, vision, renderer))
}
