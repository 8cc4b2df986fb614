#![allow(dead_code)]

use insight_service::backends::{
    AdapterConfig, BackendAdapter, BackendSet, MockBackend,
};
use insight_service::config::{
    BackendMode, BackendSettings, BusyPolicySetting, GeminiSettings, InsightConfig,
    RendererSettings, SessionSettings, StorageBackend, StorageConfig, StoreSettings,
    VisionSettings,
};
use insight_service::orchestrator::{Orchestrator, OrchestratorConfig, RetryPolicy};
use insight_service::services::{init_metrics, ArtifactStore, MemoryStorage, StoreConfig};
use insight_service::sessions::{RegistryConfig, SessionRegistry};
use insight_service::startup::Application;
use reqwest::multipart::{Form, Part};
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-form-image";
pub const PDF_BYTES: &[u8] = b"%PDF-1.7\nfake three page document";

/// Settings sized for tests: short backend timeouts, fast retries and a
/// sweeper that runs often.
pub fn test_config() -> InsightConfig {
    InsightConfig {
        common: CoreConfig {
            port: 0, // Random port for testing
            ..CoreConfig::default()
        },
        store: StoreSettings {
            max_bytes: 64 * 1024,
            max_staged: 64,
            ttl_secs: 3600,
            io_timeout_ms: 1000,
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            local_path: "target/test-storage".to_string(),
        },
        sessions: SessionSettings {
            ttl_secs: 3600,
            max_sessions: 100,
            busy_policy: BusyPolicySetting::FailFast,
            busy_wait_ms: 250,
            sweep_interval_secs: 60,
            max_units: 20,
            max_rendered_bytes: 1024 * 1024,
        },
        backends: BackendSettings {
            mode: BackendMode::Mock,
            timeout_ms: 200,
            render_timeout_ms: 1000,
            max_in_flight: 16,
            retry_budget: 1,
            retry_backoff_ms: 5,
            analysis_deadline_ms: 5000,
            unreachable_after: 3,
        },
        gemini: GeminiSettings {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
        },
        vision: VisionSettings { url: None },
        renderer: RendererSettings {
            dpi: 72,
            temp_dir: None,
        },
        default_language: "en".to_string(),
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub mock: Arc<MockBackend>,
    pub orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(MockBackend::new(), |_| {}).await
    }

    pub async fn spawn_with(mock: MockBackend, configure: impl FnOnce(&mut InsightConfig)) -> Self {
        init_metrics().expect("Failed to install metrics recorder");

        let mut config = test_config();
        configure(&mut config);

        let mock = Arc::new(mock);
        let app = Application::build_with_backends(config, BackendSet::mock(mock.clone()))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let orchestrator = app.orchestrator();
        let shutdown = app.shutdown_token();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the readiness endpoint
        let client = reqwest::Client::new();
        let ready_url = format!("{}/ready", address);
        for _ in 0..50 {
            if client.get(&ready_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            mock,
            orchestrator,
            shutdown,
        }
    }

    pub async fn upload(&self, bytes: &[u8], file_name: &str, mime: &str) -> reqwest::Response {
        self.upload_form(upload_form(bytes, file_name, mime)).await
    }

    pub async fn upload_form(&self, form: Form) -> reqwest::Response {
        self.client
            .post(format!("{}/upload", self.address))
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute upload request")
    }

    /// Uploads and returns the parsed body, asserting the session was created.
    pub async fn upload_ok(&self, bytes: &[u8], file_name: &str, mime: &str) -> serde_json::Value {
        let response = self.upload(bytes, file_name, mime).await;
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.expect("Failed to parse upload body")
    }

    pub async fn navigate(&self, session_id: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/session/{}/navigate", self.address, session_id))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute navigate request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn upload_form(bytes: &[u8], file_name: &str, mime: &str) -> Form {
    let part = Part::bytes(bytes.to_vec())
        .file_name(file_name.to_string())
        .mime_str(mime)
        .expect("Invalid mime type");
    Form::new().part("file", part)
}

/// An orchestrator wired to `mock` without the HTTP layer.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<ArtifactStore>,
    pub registry: Arc<SessionRegistry>,
    pub mock: Arc<MockBackend>,
}

pub struct HarnessConfig {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub adapter: AdapterConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            adapter: AdapterConfig {
                call_timeout: Duration::from_millis(100),
                render_timeout: Duration::from_millis(500),
                unreachable_after: 3,
            },
            orchestrator: OrchestratorConfig {
                retry: RetryPolicy {
                    max_retries: 1,
                    initial_backoff: Duration::from_millis(1),
                    add_jitter: false,
                    ..Default::default()
                },
                analysis_deadline: Duration::from_secs(5),
                default_language: "en".to_string(),
                ..Default::default()
            },
        }
    }
}

impl Harness {
    pub fn new(mock: MockBackend) -> Self {
        Self::with_config(mock, HarnessConfig::default())
    }

    pub fn with_config(mock: MockBackend, config: HarnessConfig) -> Self {
        let mock = Arc::new(mock);
        let store = Arc::new(ArtifactStore::new(
            Arc::new(MemoryStorage::new()),
            config.store,
        ));
        let registry = Arc::new(SessionRegistry::new(store.clone(), config.registry));
        let adapter = Arc::new(BackendAdapter::new(
            BackendSet::mock(mock.clone()),
            config.adapter,
        ));
        let orchestrator =
            Orchestrator::new(store.clone(), registry.clone(), adapter, config.orchestrator);

        Self {
            orchestrator,
            store,
            registry,
            mock,
        }
    }
}
