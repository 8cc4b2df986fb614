use crate::dtos::{
    NavigateRequest, ReanalyzeRequest, SessionResponse, SummaryResponse, UnitQuery, UnitResponse,
};
use crate::models::{AnalysisProfile, SessionId};
use crate::orchestrator::{Reanalysis, UploadRequest};
use crate::startup::AppState;
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

const OCTET_STREAM: &str = "application/octet-stream";

/// `POST /upload` with a `file` part and optional `kind`, `profile` and
/// `language` text parts.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut file: Option<(Vec<u8>, Option<String>, Option<String>)> = None;
    let mut kind = None;
    let mut profile = None;
    let mut language = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((bytes.to_vec(), content_type, file_name));
            }
            "kind" => kind = Some(field.text().await.map_err(multipart_error)?),
            "profile" => {
                let value = field.text().await.map_err(multipart_error)?;
                profile = Some(
                    value
                        .parse::<AnalysisProfile>()
                        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?,
                );
            }
            "language" => language = Some(field.text().await.map_err(multipart_error)?),
            _ => {
                tracing::debug!(field = %name, "Ignoring unknown multipart field");
            }
        }
    }

    let (bytes, content_type, file_name) =
        file.ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("No file uploaded")))?;

    // An explicit kind wins, then a meaningful content type, then the file name.
    let declared_kind = kind
        .filter(|kind| !kind.trim().is_empty())
        .or(content_type.filter(|mime| mime != OCTET_STREAM))
        .or(file_name)
        .unwrap_or_default();

    tracing::info!(
        size = bytes.len(),
        declared_kind = %declared_kind,
        "Upload received"
    );

    let outcome = state
        .orchestrator
        .upload(UploadRequest {
            bytes,
            declared_kind,
            profile,
            language,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(UnitResponse::from(outcome))))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state.orchestrator.session(&SessionId::from(session_id))?;
    Ok(Json(SessionResponse { session }))
}

pub async fn get_unit(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(String, usize)>,
    Query(query): Query<UnitQuery>,
) -> Result<Json<UnitResponse>, AppError> {
    let outcome = state
        .orchestrator
        .unit(&SessionId::from(session_id), index, query.version)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn navigate(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<NavigateRequest>,
) -> Result<Json<UnitResponse>, AppError> {
    request.validate()?;
    let navigation = request
        .navigation()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let outcome = state
        .orchestrator
        .navigate(&SessionId::from(session_id), navigation)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn reanalyze_unit(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(String, usize)>,
    Json(request): Json<ReanalyzeRequest>,
) -> Result<Json<UnitResponse>, AppError> {
    request.validate()?;

    let outcome = state
        .orchestrator
        .reanalyze(
            &SessionId::from(session_id),
            index,
            Reanalysis {
                language: request.language,
                hint: request.hint,
            },
        )
        .await?;
    Ok(Json(outcome.into()))
}

/// WAV narration of a unit's latest analysis.
pub async fn unit_speech(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(String, usize)>,
) -> Result<impl IntoResponse, AppError> {
    let speech = state
        .orchestrator
        .speak_unit(&SessionId::from(session_id), index)
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, speech.clip.mime_type.clone()),
            (
                header::HeaderName::from_static("x-unit-version"),
                speech.version.to_string(),
            ),
        ],
        speech.clip.audio.clone(),
    ))
}

/// Raw image of one unit, served inline.
pub async fn unit_image(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(String, usize)>,
) -> Result<impl IntoResponse, AppError> {
    let image = state
        .orchestrator
        .unit_image(&SessionId::from(session_id), index)
        .await?;

    let extension = image.mime_type.rsplit('/').next().unwrap_or("bin");
    let disposition = format!("inline; filename=\"unit_{}.{}\"", index + 1, extension);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, image.mime_type.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        image.bytes.as_ref().clone(),
    ))
}

pub async fn session_summary(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SummaryResponse>, AppError> {
    let summary = state
        .orchestrator
        .summary(&SessionId::from(session_id))
        .await?;
    Ok(Json(summary.into()))
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .orchestrator
        .close(&SessionId::from(session_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::BadRequest(anyhow::anyhow!("Failed to read multipart field: {}", err))
    }
}
