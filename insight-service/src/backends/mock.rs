//! Deterministic stand-in for every backend capability.

use crate::backends::gemini::pcm_to_wav;
use crate::backends::{
    BackendError, Capability, PageRenderer, RegionDetector, SpeechSynthesizer, SummaryRequest,
    Summarizer, TextExtractor,
};
use crate::models::{
    ArtifactKind, BoundingBox, Detection, RenderedPage, SpeechClip, TextSpan, UnitImage,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

enum Scripted {
    Fail(BackendError),
    /// Never completes; only the adapter's timeout ends the call.
    Stall,
}

pub struct MockBackend {
    page_count: AtomicUsize,
    latency: Duration,
    calls: DashMap<Capability, usize>,
    scripts: DashMap<Capability, VecDeque<Scripted>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            page_count: AtomicUsize::new(3),
            latency: Duration::ZERO,
            calls: DashMap::new(),
            scripts: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_pages(self, page_count: usize) -> Self {
        self.page_count.store(page_count, Ordering::SeqCst);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_pages(&self, page_count: usize) {
        self.page_count.store(page_count, Ordering::SeqCst);
    }

    /// The next call of `capability` fails with `error`.
    pub fn fail_next(&self, capability: Capability, error: BackendError) {
        self.scripts
            .entry(capability)
            .or_default()
            .push_back(Scripted::Fail(error));
    }

    /// The next `times` calls of `capability` hang.
    pub fn stall_next(&self, capability: Capability, times: usize) {
        let mut script = self.scripts.entry(capability).or_default();
        for _ in 0..times {
            script.push_back(Scripted::Stall);
        }
    }

    pub fn calls(&self, capability: Capability) -> usize {
        self.calls.get(&capability).map(|count| *count).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, capability: Capability) -> Result<InFlight<'_>, BackendError> {
        *self.calls.entry(capability).or_default() += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self
            .scripts
            .get_mut(&capability)
            .and_then(|mut script| script.pop_front());
        match scripted {
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Stall) => std::future::pending().await,
            None => Ok(guard),
        }
    }
}

/// Keeps the in-flight count right when a call is cancelled mid-way.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn describe(image: &UnitImage) -> String {
    let label: String = String::from_utf8_lossy(&image.bytes).chars().take(32).collect();
    format!("{} ({} bytes)", label, image.bytes.len())
}

#[async_trait]
impl PageRenderer for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn render(
        &self,
        document: &[u8],
        kind: ArtifactKind,
    ) -> Result<Vec<RenderedPage>, BackendError> {
        let _call = self.enter(Capability::Render).await?;
        if !kind.is_paged() {
            return Err(BackendError::InvalidInput(format!(
                "{} artifacts have no pages to render",
                kind
            )));
        }
        if document.is_empty() {
            return Err(BackendError::InvalidInput("Empty document".to_string()));
        }

        let pages = (1..=self.page_count.load(Ordering::SeqCst))
            .map(|page| RenderedPage {
                image: UnitImage::new(format!("page-{}", page).into_bytes(), "image/png"),
                text: Some(format!("Page {} text", page)),
            })
            .collect();
        Ok(pages)
    }
}

#[async_trait]
impl RegionDetector for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn detect_regions(&self, _image: &UnitImage) -> Result<Vec<Detection>, BackendError> {
        let _call = self.enter(Capability::DetectRegions).await?;
        Ok(vec![
            Detection {
                bbox: BoundingBox {
                    x: 10.0,
                    y: 10.0,
                    width: 200.0,
                    height: 30.0,
                },
                label: "name".to_string(),
                confidence: 0.92,
            },
            Detection {
                bbox: BoundingBox {
                    x: 10.0,
                    y: 60.0,
                    width: 200.0,
                    height: 30.0,
                },
                label: "date".to_string(),
                confidence: 0.88,
            },
        ])
    }
}

#[async_trait]
impl TextExtractor for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract_text(
        &self,
        _image: &UnitImage,
        _language: &str,
    ) -> Result<Vec<TextSpan>, BackendError> {
        let _call = self.enter(Capability::ExtractText).await?;
        Ok(vec![
            TextSpan {
                text: "Jane Doe".to_string(),
                confidence: 0.97,
                bbox: Some(BoundingBox {
                    x: 15.0,
                    y: 12.0,
                    width: 100.0,
                    height: 20.0,
                }),
            },
            TextSpan {
                text: "2024-01-31".to_string(),
                confidence: 0.95,
                bbox: Some(BoundingBox {
                    x: 15.0,
                    y: 62.0,
                    width: 100.0,
                    height: 20.0,
                }),
            },
        ])
    }
}

#[async_trait]
impl Summarizer for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<String, BackendError> {
        let _call = self.enter(Capability::Summarize).await?;
        let subject = match (&request.text, &request.image) {
            (Some(text), _) => text.chars().take(60).collect(),
            (None, Some(image)) => describe(image),
            (None, None) => {
                return Err(BackendError::InvalidInput("Nothing to summarize".to_string()))
            }
        };
        Ok(format!("[{}] Summary of {}", request.language, subject))
    }
}

#[async_trait]
impl SpeechSynthesizer for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn synthesize(&self, text: &str, language: &str) -> Result<SpeechClip, BackendError> {
        let _call = self.enter(Capability::SynthesizeSpeech).await?;
        if text.trim().is_empty() {
            return Err(BackendError::InvalidInput("Nothing to synthesize".to_string()));
        }
        // One silent sample per character keeps clips distinct per text.
        let pcm = vec![0u8; text.chars().count() * 2];
        Ok(SpeechClip {
            mime_type: "audio/wav".to_string(),
            audio: pcm_to_wav(&pcm)?,
            language: language.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_configured_page_count() {
        let mock = MockBackend::new().with_pages(5);
        let pages = mock.render(b"%PDF", ArtifactKind::Pdf).await.unwrap();
        assert_eq!(pages.len(), 5);
        assert_eq!(pages[4].text.as_deref(), Some("Page 5 text"));
        assert_eq!(mock.calls(Capability::Render), 1);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let mock = MockBackend::new();
        mock.fail_next(Capability::Summarize, BackendError::Unavailable("down".into()));

        let request = SummaryRequest {
            instruction: "Explain".into(),
            text: Some("hello".into()),
            image: None,
            language: "en".into(),
        };
        assert!(mock.summarize(&request).await.is_err());
        assert_eq!(
            mock.summarize(&request).await.unwrap(),
            "[en] Summary of hello"
        );
        assert_eq!(mock.total_calls(), 2);
        assert_eq!(mock.in_flight(), 0);
    }
}
