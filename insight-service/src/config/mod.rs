use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct InsightConfig {
    pub common: core_config::Config,
    pub store: StoreSettings,
    pub storage: StorageConfig,
    pub sessions: SessionSettings,
    pub backends: BackendSettings,
    pub gemini: GeminiSettings,
    pub vision: VisionSettings,
    pub renderer: RendererSettings,
    pub default_language: String,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub max_bytes: usize,
    pub max_staged: usize,
    pub ttl_secs: u64,
    pub io_timeout_ms: u64,
}

impl StoreSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Local,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl_secs: u64,
    pub max_sessions: usize,
    pub busy_policy: BusyPolicySetting,
    pub busy_wait_ms: u64,
    pub sweep_interval_secs: u64,
    pub max_units: usize,
    pub max_rendered_bytes: usize,
}

impl SessionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn busy_wait(&self) -> Duration {
        Duration::from_millis(self.busy_wait_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicySetting {
    FailFast,
    Wait,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub mode: BackendMode,
    pub timeout_ms: u64,
    pub render_timeout_ms: u64,
    pub max_in_flight: usize,
    pub retry_budget: u32,
    pub retry_backoff_ms: u64,
    pub analysis_deadline_ms: u64,
    pub unreachable_after: u32,
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn analysis_deadline(&self) -> Duration {
        Duration::from_millis(self.analysis_deadline_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Mock,
    Live,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub tts_model: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub dpi: u32,
    pub temp_dir: Option<PathBuf>,
}

impl InsightConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let mode: BackendMode =
            parse(get_env("BACKEND_MODE", Some("mock"), is_prod)?, "BACKEND_MODE")?;
        let live = mode == BackendMode::Live;

        Ok(InsightConfig {
            common,
            store: StoreSettings {
                max_bytes: parse_env("ARTIFACT_MAX_BYTES", "52428800")?,
                max_staged: parse_env("ARTIFACT_MAX_STAGED", "256")?,
                ttl_secs: parse_env("ARTIFACT_TTL_SECS", "3600")?,
                io_timeout_ms: parse_env("ARTIFACT_IO_TIMEOUT_MS", "5000")?,
            },
            storage: StorageConfig {
                backend: parse(
                    get_env("STORAGE_BACKEND", Some("memory"), is_prod)?,
                    "STORAGE_BACKEND",
                )?,
                local_path: get_env("STORAGE_LOCAL_PATH", Some("storage"), is_prod)?,
            },
            sessions: SessionSettings {
                ttl_secs: parse_env("SESSION_TTL_SECS", "3600")?,
                max_sessions: parse_env("MAX_SESSIONS", "1000")?,
                busy_policy: parse(
                    get_env("SESSION_BUSY_POLICY", Some("fail-fast"), is_prod)?,
                    "SESSION_BUSY_POLICY",
                )?,
                busy_wait_ms: parse_env("SESSION_BUSY_WAIT_MS", "250")?,
                sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", "60")?,
                max_units: parse_env("MAX_UNITS", "100")?,
                max_rendered_bytes: parse_env("MAX_RENDERED_BYTES", "209715200")?,
            },
            backends: BackendSettings {
                mode,
                timeout_ms: parse_env("BACKEND_TIMEOUT_MS", "30000")?,
                render_timeout_ms: parse_env("RENDER_TIMEOUT_MS", "120000")?,
                max_in_flight: parse_env("BACKEND_MAX_IN_FLIGHT", "32")?,
                retry_budget: parse_env("BACKEND_RETRY_BUDGET", "1")?,
                retry_backoff_ms: parse_env("BACKEND_RETRY_BACKOFF_MS", "100")?,
                analysis_deadline_ms: parse_env("ANALYSIS_DEADLINE_MS", "90000")?,
                unreachable_after: parse_env("BACKEND_UNREACHABLE_AFTER", "3")?,
            },
            gemini: GeminiSettings {
                // Only the live backends need a key.
                api_key: if live {
                    Some(Secret::new(get_env("GOOGLE_AI_API_KEY", None, is_prod)?))
                } else {
                    env::var("GOOGLE_AI_API_KEY").ok().map(Secret::new)
                },
                model: get_env("GEMINI_MODEL", Some("gemini-2.5-flash"), is_prod)?,
                tts_model: get_env(
                    "GEMINI_TTS_MODEL",
                    Some("gemini-2.5-flash-preview-tts"),
                    is_prod,
                )?,
                api_base: get_env(
                    "GEMINI_API_BASE",
                    Some(crate::backends::gemini::DEFAULT_API_BASE),
                    is_prod,
                )?,
            },
            vision: VisionSettings {
                url: if live {
                    Some(get_env("VISION_SERVICE_URL", None, is_prod)?)
                } else {
                    env::var("VISION_SERVICE_URL").ok()
                },
            },
            renderer: RendererSettings {
                dpi: parse_env("RENDER_DPI", "150")?,
                temp_dir: env::var("RENDER_TEMP_DIR").ok().map(PathBuf::from),
            },
            default_language: get_env("DEFAULT_LANGUAGE", Some("ar"), is_prod)?,
        })
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "local" => Ok(StorageBackend::Local),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

impl FromStr for BackendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(BackendMode::Mock),
            "live" => Ok(BackendMode::Live),
            _ => Err(format!("Invalid backend mode: {}", s)),
        }
    }
}

impl FromStr for BusyPolicySetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail-fast" | "fail_fast" | "failfast" => Ok(BusyPolicySetting::FailFast),
            "wait" => Ok(BusyPolicySetting::Wait),
            _ => Err(format!("Invalid session busy policy: {}", s)),
        }
    }
}

fn parse<T>(value: String, key: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

/// Numeric tunables keep their default even in production.
fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse(env::var(key).unwrap_or_else(|_| default.to_string()), key)
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}
