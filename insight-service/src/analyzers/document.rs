use crate::analyzers::{instruction, UnitAnalyzer, UnitInput};
use crate::backends::{BackendAdapter, BackendError, SummaryRequest};
use crate::models::{AnalysisHints, AnalysisPayload, AnalysisProfile};
use async_trait::async_trait;

const PAGE_INSTRUCTION: &str = "Explain the following page of a presentation or document \
to a visually impaired reader: state its main idea and its key points clearly.";

const IMAGE_PAGE_INSTRUCTION: &str = "This page has no readable text. Describe its main \
content (diagrams, pictures, charts) to a visually impaired reader.";

/// Text comes from the document's own text layer, falling back to OCR for
/// scanned pages.
#[derive(Default)]
pub struct DocumentAnalyzer;

impl DocumentAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UnitAnalyzer for DocumentAnalyzer {
    fn profile(&self) -> AnalysisProfile {
        AnalysisProfile::Document
    }

    async fn analyze(
        &self,
        adapter: &BackendAdapter,
        unit: &UnitInput,
        hints: &AnalysisHints,
    ) -> Result<AnalysisPayload, BackendError> {
        let text = match unit.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => adapter
                .extract_text(&unit.image, &hints.language)
                .await?
                .into_iter()
                .map(|span| span.text)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string(),
        };

        let request = if text.is_empty() {
            SummaryRequest {
                instruction: instruction(IMAGE_PAGE_INSTRUCTION, hints),
                text: None,
                image: Some(unit.image.clone()),
                language: hints.language.clone(),
            }
        } else {
            SummaryRequest {
                instruction: instruction(PAGE_INSTRUCTION, hints),
                text: Some(text.clone()),
                image: None,
                language: hints.language.clone(),
            }
        };

        let explanation = adapter.summarize(&request).await?;
        Ok(AnalysisPayload::Page { text, explanation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{AdapterConfig, BackendSet, Capability, MockBackend};
    use crate::models::UnitImage;
    use std::sync::Arc;

    fn adapter(mock: &Arc<MockBackend>) -> BackendAdapter {
        BackendAdapter::new(BackendSet::mock(mock.clone()), AdapterConfig::default())
    }

    #[tokio::test]
    async fn uses_text_layer_without_ocr() {
        let mock = Arc::new(MockBackend::new());
        let unit = UnitInput {
            index: 0,
            image: UnitImage::new(b"page-1".to_vec(), "image/png"),
            text: Some("Quarterly revenue grew".to_string()),
        };

        let payload = DocumentAnalyzer::new()
            .analyze(&adapter(&mock), &unit, &AnalysisHints::new("en"))
            .await
            .unwrap();

        assert_eq!(
            payload,
            AnalysisPayload::Page {
                text: "Quarterly revenue grew".to_string(),
                explanation: "[en] Summary of Quarterly revenue grew".to_string(),
            }
        );
        assert_eq!(mock.calls(Capability::ExtractText), 0);
    }

    #[tokio::test]
    async fn scanned_pages_fall_back_to_ocr() {
        let mock = Arc::new(MockBackend::new());
        let unit = UnitInput {
            index: 1,
            image: UnitImage::new(b"scan".to_vec(), "image/png"),
            text: None,
        };

        let payload = DocumentAnalyzer::new()
            .analyze(&adapter(&mock), &unit, &AnalysisHints::new("ar"))
            .await
            .unwrap();

        assert_eq!(mock.calls(Capability::ExtractText), 1);
        match payload {
            AnalysisPayload::Page { text, .. } => assert_eq!(text, "Jane Doe\n2024-01-31"),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
