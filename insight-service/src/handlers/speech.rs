use crate::dtos::SpeechRequest;
use crate::startup::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

/// Stateless text-to-speech. Returns WAV audio.
#[tracing::instrument(skip(state, request))]
pub async fn synthesize(
    State(state): State<AppState>,
    Json(request): Json<SpeechRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let clip = state
        .orchestrator
        .synthesize(&request.text, request.language.as_deref())
        .await?;

    tracing::info!(
        language = %clip.language,
        bytes = clip.audio.len(),
        "Speech synthesized"
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, clip.mime_type)],
        clip.audio,
    ))
}
