//! Capability interfaces over the external analysis engines.
//!
//! Each engine is reached through one narrow trait. The orchestrator only
//! ever talks to a [`BackendAdapter`], which applies per-call timeouts and
//! records health; the traits themselves can be backed by live services or
//! by [`MockBackend`].

pub mod adapter;
pub mod executor;
pub mod gemini;
pub mod health;
pub mod mock;
pub mod renderer;
pub mod vision;

pub use adapter::{AdapterConfig, BackendAdapter};
pub use gemini::{GeminiClient, GeminiConfig};
pub use health::{BackendStatus, HealthBoard, HealthRecord};
pub use mock::MockBackend;
pub use renderer::CommandRenderer;
pub use vision::VisionClient;

use crate::models::{ArtifactKind, Detection, RenderedPage, SpeechClip, TextSpan, UnitImage};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Render,
    DetectRegions,
    ExtractText,
    Summarize,
    SynthesizeSpeech,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Render,
        Capability::DetectRegions,
        Capability::ExtractText,
        Capability::Summarize,
        Capability::SynthesizeSpeech,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Render => "render",
            Capability::DetectRegions => "detect_regions",
            Capability::ExtractText => "extract_text",
            Capability::Summarize => "summarize",
            Capability::SynthesizeSpeech => "synthesize_speech",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BackendError {
    /// Transient failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(self, BackendError::InvalidInput(_))
    }
}

/// Input to the generative summarizer.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub instruction: String,
    pub text: Option<String>,
    pub image: Option<UnitImage>,
    pub language: String,
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &str;

    /// Splits a paged document into ordered page images.
    async fn render(
        &self,
        document: &[u8],
        kind: ArtifactKind,
    ) -> Result<Vec<RenderedPage>, BackendError>;
}

#[async_trait]
pub trait RegionDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect_regions(&self, image: &UnitImage) -> Result<Vec<Detection>, BackendError>;
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract_text(
        &self,
        image: &UnitImage,
        language: &str,
    ) -> Result<Vec<TextSpan>, BackendError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    async fn summarize(&self, request: &SummaryRequest) -> Result<String, BackendError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, language: &str) -> Result<SpeechClip, BackendError>;
}

/// One implementation per capability.
#[derive(Clone)]
pub struct BackendSet {
    pub renderer: Arc<dyn PageRenderer>,
    pub detector: Arc<dyn RegionDetector>,
    pub extractor: Arc<dyn TextExtractor>,
    pub summarizer: Arc<dyn Summarizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl BackendSet {
    /// Every capability served by the same test double.
    pub fn mock(mock: Arc<MockBackend>) -> Self {
        Self {
            renderer: mock.clone(),
            detector: mock.clone(),
            extractor: mock.clone(),
            summarizer: mock.clone(),
            synthesizer: mock,
        }
    }

    pub fn live(
        gemini: GeminiClient,
        vision: VisionClient,
        renderer: CommandRenderer,
    ) -> Self {
        let gemini = Arc::new(gemini);
        let vision = Arc::new(vision);
        Self {
            renderer: Arc::new(renderer),
            detector: vision.clone(),
            extractor: vision,
            summarizer: gemini.clone(),
            synthesizer: gemini,
        }
    }

    pub fn name_of(&self, capability: Capability) -> &str {
        match capability {
            Capability::Render => self.renderer.name(),
            Capability::DetectRegions => self.detector.name(),
            Capability::ExtractText => self.extractor.name(),
            Capability::Summarize => self.summarizer.name(),
            Capability::SynthesizeSpeech => self.synthesizer.name(),
        }
    }
}

pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> BackendError {
    BackendError::Unavailable(format!("{} request failed: {}", service, err))
}

/// Maps a non-success HTTP status onto the backend taxonomy: throttling and
/// server errors are transient, other client errors are not.
pub(crate) async fn ensure_success(
    service: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(512).collect();
    let message = format!("{} returned {}: {}", service, status, body);

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Err(BackendError::Unavailable(message))
    } else {
        Err(BackendError::InvalidInput(message))
    }
}
