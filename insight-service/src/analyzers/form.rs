use crate::analyzers::{instruction, UnitAnalyzer, UnitInput};
use crate::backends::{BackendAdapter, BackendError, SummaryRequest};
use crate::models::{
    AnalysisHints, AnalysisPayload, AnalysisProfile, Detection, FormField, TextSpan,
};
use async_trait::async_trait;

/// Share of the smaller box that must overlap for a span to fill a field.
const FIELD_OVERLAP: f32 = 0.1;

const FORM_INSTRUCTION: &str = "You are helping a visually impaired person fill in a form. \
Using the image and the detected fields below, explain what the form is for and \
what each field asks for, mentioning which fields are already filled.";

#[derive(Default)]
pub struct FormAnalyzer;

impl FormAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UnitAnalyzer for FormAnalyzer {
    fn profile(&self) -> AnalysisProfile {
        AnalysisProfile::Form
    }

    async fn analyze(
        &self,
        adapter: &BackendAdapter,
        unit: &UnitInput,
        hints: &AnalysisHints,
    ) -> Result<AnalysisPayload, BackendError> {
        let (detections, text) = tokio::try_join!(
            adapter.detect_regions(&unit.image),
            adapter.extract_text(&unit.image, &hints.language),
        )?;

        let fields = associate_fields(&detections, &text);
        tracing::debug!(
            unit = unit.index,
            fields = fields.len(),
            spans = text.len(),
            "Form fields associated"
        );

        let context = serde_json::json!({
            "fields": fields,
            "text": text.iter().map(|span| span.text.as_str()).collect::<Vec<_>>(),
        });

        let explanation = adapter
            .summarize(&SummaryRequest {
                instruction: instruction(FORM_INSTRUCTION, hints),
                text: Some(context.to_string()),
                image: Some(unit.image.clone()),
                language: hints.language.clone(),
            })
            .await?;

        Ok(AnalysisPayload::Form {
            fields,
            text,
            explanation,
        })
    }
}

/// Turns detected regions into form fields, filling each with the text spans
/// that overlap it, in reading order.
pub fn associate_fields(detections: &[Detection], spans: &[TextSpan]) -> Vec<FormField> {
    detections
        .iter()
        .map(|detection| {
            let mut inside: Vec<&TextSpan> = spans
                .iter()
                .filter(|span| {
                    span.bbox
                        .as_ref()
                        .is_some_and(|bbox| detection.bbox.overlaps(bbox, FIELD_OVERLAP))
                })
                .collect();
            inside.sort_by(|a, b| {
                let (a, b) = (a.bbox.unwrap_or(detection.bbox), b.bbox.unwrap_or(detection.bbox));
                a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x))
            });

            let value = (!inside.is_empty()).then(|| {
                inside
                    .iter()
                    .map(|span| span.text.trim())
                    .collect::<Vec<_>>()
                    .join(" ")
            });

            FormField {
                field_type: detection.label.clone(),
                bbox: detection.bbox,
                confidence: detection.confidence,
                value,
            }
        })
        .collect()
}
