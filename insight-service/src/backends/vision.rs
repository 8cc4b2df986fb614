//! HTTP client for the vision sidecar that hosts the detector and OCR models.

use crate::backends::{
    ensure_success, transport_error, BackendError, RegionDetector, TextExtractor,
};
use crate::models::{Detection, TextSpan, UnitImage};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub struct VisionClient {
    base_url: String,
    client: Client,
}

impl VisionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        request: &VisionRequest<'_>,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("Vision service", e))?;

        ensure_success("Vision service", response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("Failed to parse vision response: {}", e)))
    }
}

#[derive(Serialize)]
struct VisionRequest<'a> {
    image_base64: String,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

impl<'a> VisionRequest<'a> {
    fn new(image: &'a UnitImage, language: Option<&'a str>) -> Self {
        Self {
            image_base64: base64::engine::general_purpose::STANDARD.encode(image.bytes.as_slice()),
            mime_type: &image.mime_type,
            language,
        }
    }
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    spans: Vec<TextSpan>,
}

#[async_trait]
impl RegionDetector for VisionClient {
    fn name(&self) -> &str {
        "vision-detector"
    }

    async fn detect_regions(&self, image: &UnitImage) -> Result<Vec<Detection>, BackendError> {
        let response: DetectResponse = self
            .post("detect", &VisionRequest::new(image, None))
            .await?;
        tracing::debug!(detections = response.detections.len(), "Regions detected");
        Ok(response.detections)
    }
}

#[async_trait]
impl TextExtractor for VisionClient {
    fn name(&self) -> &str {
        "vision-ocr"
    }

    async fn extract_text(
        &self,
        image: &UnitImage,
        language: &str,
    ) -> Result<Vec<TextSpan>, BackendError> {
        let response: OcrResponse = self
            .post("ocr", &VisionRequest::new(image, Some(language)))
            .await?;
        tracing::debug!(spans = response.spans.len(), "Text extracted");
        Ok(response.spans)
    }
}
