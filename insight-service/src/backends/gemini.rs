//! Gemini `generateContent` client for summarization and speech.

use crate::backends::{
    ensure_success, transport_error, BackendError, SpeechSynthesizer, SummaryRequest, Summarizer,
};
use crate::models::SpeechClip;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini TTS returns raw little-endian PCM at this rate.
const TTS_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Secret<String>,
    pub model: String,
    pub tts_model: String,
    pub api_base: String,
}

pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn api_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model
        )
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, BackendError> {
        let response = self
            .client
            .post(self.api_url(model))
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("Gemini", e))?;

        let response = ensure_success("Gemini", response).await?;

        response
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("Failed to parse Gemini response: {}", e)))
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<String, BackendError> {
        let mut parts = Vec::new();
        if let Some(image) = &request.image {
            parts.push(ContentPart::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(image.bytes.as_slice()),
                },
            });
        }

        let mut prompt = request.instruction.clone();
        if let Some(text) = &request.text {
            prompt.push_str("\n\n");
            prompt.push_str(text);
        }
        parts.push(ContentPart::Text { text: prompt });

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: None,
        };

        tracing::debug!(
            model = %self.config.model,
            language = %request.language,
            has_image = request.image.is_some(),
            "Sending summarize request to Gemini"
        );

        let response = self.generate(&self.config.model, &body).await?;
        let candidate = response.first_candidate()?;

        let text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if text.trim().is_empty() {
            return Err(BackendError::Unavailable(
                "Gemini returned no text".to_string(),
            ));
        }
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    fn name(&self) -> &str {
        "gemini-tts"
    }

    async fn synthesize(&self, text: &str, language: &str) -> Result<SpeechClip, BackendError> {
        if text.trim().is_empty() {
            return Err(BackendError::InvalidInput("Nothing to synthesize".to_string()));
        }

        let arabic = is_arabic(text);
        let prompt = if arabic {
            format!("قل بوضوح: {}", text)
        } else {
            format!("Say clearly: {}", text)
        };

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![ContentPart::Text { text: prompt }],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_for(text).to_string(),
                        },
                    },
                },
            }),
        };

        let response = self.generate(&self.config.tts_model, &body).await?;
        let candidate = response.first_candidate()?;

        let data = candidate
            .content
            .parts
            .iter()
            .find_map(|part| match part {
                ContentPart::InlineData { inline_data } => Some(inline_data.data.as_str()),
                _ => None,
            })
            .ok_or_else(|| BackendError::Unavailable("Gemini returned no audio".to_string()))?;

        let pcm = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| BackendError::Unavailable(format!("Invalid audio payload: {}", e)))?;

        Ok(SpeechClip {
            mime_type: "audio/wav".to_string(),
            audio: pcm_to_wav(&pcm)?,
            language: language.to_string(),
        })
    }
}

pub fn is_arabic(text: &str) -> bool {
    text.chars().any(|c| ('\u{0600}'..='\u{06FF}').contains(&c))
}

pub fn voice_for(text: &str) -> &'static str {
    if is_arabic(text) {
        "Sulafat"
    } else {
        "Kore"
    }
}

/// Wraps 16-bit little-endian mono PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[u8]) -> Result<Vec<u8>, BackendError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TTS_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buffer), spec)
            .map_err(|e| BackendError::Unavailable(format!("WAV encoding failed: {}", e)))?;
        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| BackendError::Unavailable(format!("WAV encoding failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| BackendError::Unavailable(format!("WAV encoding failed: {}", e)))?;
    }
    Ok(buffer)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    fn first_candidate(&self) -> Result<&Candidate, BackendError> {
        let candidate = self
            .candidates
            .first()
            .ok_or_else(|| BackendError::Unavailable("Gemini returned no candidates".to_string()))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(BackendError::InvalidInput(
                "Content was blocked by the safety filter".to_string(),
            ));
        }
        Ok(candidate)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default = "empty_content")]
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}

fn empty_content() -> Content {
    Content {
        role: None,
        parts: Vec::new(),
    }
}
