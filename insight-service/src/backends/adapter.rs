//! Uniform, time-bounded access to every backend capability.
//!
//! The adapter never retries. A call that outlives its timeout is dropped,
//! which cancels it cooperatively, and is reported as `Timeout`.

use crate::backends::{BackendError, BackendSet, Capability, HealthBoard, SummaryRequest};
use crate::models::{ArtifactKind, Detection, RenderedPage, SpeechClip, TextSpan, UnitImage};
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub call_timeout: Duration,
    /// Rendering converts whole documents and gets a longer bound.
    pub render_timeout: Duration,
    pub unreachable_after: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            render_timeout: Duration::from_secs(120),
            unreachable_after: 3,
        }
    }
}

pub struct BackendAdapter {
    backends: BackendSet,
    config: AdapterConfig,
    health: HealthBoard,
}

impl BackendAdapter {
    pub fn new(backends: BackendSet, config: AdapterConfig) -> Self {
        let health = HealthBoard::new(config.unreachable_after);
        Self {
            backends,
            config,
            health,
        }
    }

    pub fn health(&self) -> &HealthBoard {
        &self.health
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    pub async fn render(
        &self,
        document: &[u8],
        kind: ArtifactKind,
    ) -> Result<Vec<RenderedPage>, BackendError> {
        self.call(
            Capability::Render,
            self.config.render_timeout,
            self.backends.renderer.render(document, kind),
        )
        .await
    }

    pub async fn detect_regions(&self, image: &UnitImage) -> Result<Vec<Detection>, BackendError> {
        self.call(
            Capability::DetectRegions,
            self.config.call_timeout,
            self.backends.detector.detect_regions(image),
        )
        .await
    }

    pub async fn extract_text(
        &self,
        image: &UnitImage,
        language: &str,
    ) -> Result<Vec<TextSpan>, BackendError> {
        self.call(
            Capability::ExtractText,
            self.config.call_timeout,
            self.backends.extractor.extract_text(image, language),
        )
        .await
    }

    pub async fn summarize(&self, request: &SummaryRequest) -> Result<String, BackendError> {
        self.call(
            Capability::Summarize,
            self.config.call_timeout,
            self.backends.summarizer.summarize(request),
        )
        .await
    }

    pub async fn synthesize_speech(
        &self,
        text: &str,
        language: &str,
    ) -> Result<SpeechClip, BackendError> {
        self.call(
            Capability::SynthesizeSpeech,
            self.config.call_timeout,
            self.backends.synthesizer.synthesize(text, language),
        )
        .await
    }

    async fn call<T, F>(
        &self,
        capability: Capability,
        limit: Duration,
        call: F,
    ) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(limit)),
        };
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(_) => {
                self.health.record_success(capability);
                "success"
            }
            Err(error) => {
                self.health.record_failure(capability, error);
                tracing::warn!(
                    capability = %capability,
                    backend = %self.backends.name_of(capability),
                    error = %error,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Backend call failed"
                );
                match error {
                    BackendError::Timeout(_) => "timeout",
                    BackendError::Unavailable(_) => "unavailable",
                    BackendError::InvalidInput(_) => "invalid_input",
                }
            }
        };

        metrics::counter!(
            "backend_calls_total",
            "capability" => capability.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!(
            "backend_call_duration_seconds",
            "capability" => capability.to_string()
        )
        .record(elapsed.as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendStatus, MockBackend};
    use std::sync::Arc;

    fn adapter(mock: Arc<MockBackend>, call_timeout: Duration) -> BackendAdapter {
        BackendAdapter::new(
            BackendSet::mock(mock),
            AdapterConfig {
                call_timeout,
                render_timeout: call_timeout,
                unreachable_after: 2,
            },
        )
    }

    fn image() -> UnitImage {
        UnitImage::new(b"form".to_vec(), "image/png")
    }

    #[tokio::test]
    async fn stalled_call_times_out_and_is_cancelled() {
        let mock = Arc::new(MockBackend::new());
        mock.stall_next(Capability::DetectRegions, 1);
        let adapter = adapter(mock.clone(), Duration::from_millis(30));

        let err = adapter.detect_regions(&image()).await.unwrap_err();

        assert_eq!(err, BackendError::Timeout(Duration::from_millis(30)));
        assert_eq!(mock.in_flight(), 0);
        assert_eq!(
            adapter.health().status(Capability::DetectRegions),
            BackendStatus::Degraded
        );
    }

    #[tokio::test]
    async fn scripted_errors_pass_through_unchanged() {
        let mock = Arc::new(MockBackend::new());
        mock.fail_next(
            Capability::ExtractText,
            BackendError::InvalidInput("blank image".into()),
        );
        let adapter = adapter(mock.clone(), Duration::from_secs(1));

        let err = adapter.extract_text(&image(), "en").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));

        let spans = adapter.extract_text(&image(), "en").await.unwrap();
        assert!(!spans.is_empty());
        assert_eq!(mock.calls(Capability::ExtractText), 2);
    }
}
