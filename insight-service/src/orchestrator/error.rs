use crate::backends::BackendError;
use crate::models::{AnalysisProfile, ArtifactKind};
use crate::services::StoreError;
use crate::sessions::RegistryError;
use service_core::error::AppError;
use thiserror::Error;

/// Seconds a client is told to wait after a capacity rejection.
const RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Too many analyses in flight (limit {limit})")]
    Overloaded { limit: usize },

    #[error("Unit {index} is out of range; the session has {unit_count} units")]
    InvalidUnit { index: usize, unit_count: usize },

    #[error("Unit {unit} has no analysis version {version}")]
    UnknownVersion { unit: usize, version: u32 },

    #[error("The {profile} profile cannot analyze {kind} artifacts")]
    ProfileMismatch {
        profile: AnalysisProfile,
        kind: ArtifactKind,
    },

    #[error("Document has {count} pages; at most {max} are supported")]
    TooManyUnits { count: usize, max: usize },

    #[error("Document has no pages")]
    NoUnits,

    #[error("Rendered pages take {size} bytes; at most {max} are kept per session")]
    RenderedTooLarge { size: usize, max: usize },

    #[error("Unit {0} has no successful analysis to narrate")]
    NothingToNarrate(usize),

    #[error("{0}")]
    InvalidRequest(String),
}

/// Coarse failure classes that decide retry and reporting behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad artifact, payload or index. Never retried.
    Input,
    /// Timeout or temporary unavailability.
    BackendTransient,
    /// Store, registry or admission gate full. Caller retries later.
    Capacity,
    /// Session missing, expired or busy.
    State,
    /// Local storage failure.
    Internal,
}

impl OrchestratorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            OrchestratorError::Store(err) => match err {
                StoreError::SizeExceeded { .. }
                | StoreError::UnsupportedKind(_)
                | StoreError::EmptyPayload => ErrorClass::Input,
                StoreError::CapacityExceeded { .. } => ErrorClass::Capacity,
                StoreError::NotFound(_) | StoreError::Expired(_) => ErrorClass::State,
                StoreError::TransferTimeout(_) => ErrorClass::BackendTransient,
                StoreError::Storage(_) => ErrorClass::Internal,
            },
            OrchestratorError::Registry(err) => match err {
                RegistryError::CapacityExceeded { .. } => ErrorClass::Capacity,
                RegistryError::NoUnits => ErrorClass::Input,
                _ => ErrorClass::State,
            },
            OrchestratorError::Backend(err) if err.is_transient() => ErrorClass::BackendTransient,
            OrchestratorError::Backend(_) => ErrorClass::Input,
            OrchestratorError::Overloaded { .. } => ErrorClass::Capacity,
            OrchestratorError::NothingToNarrate(_) => ErrorClass::State,
            OrchestratorError::InvalidUnit { .. }
            | OrchestratorError::UnknownVersion { .. }
            | OrchestratorError::ProfileMismatch { .. }
            | OrchestratorError::TooManyUnits { .. }
            | OrchestratorError::NoUnits
            | OrchestratorError::RenderedTooLarge { .. }
            | OrchestratorError::InvalidRequest(_) => ErrorClass::Input,
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::Store(StoreError::SizeExceeded { .. })
            | OrchestratorError::RenderedTooLarge { .. } => AppError::PayloadTooLarge(message),
            OrchestratorError::Store(StoreError::UnsupportedKind(_)) => {
                AppError::UnsupportedMediaType(message)
            }
            OrchestratorError::Store(StoreError::NotFound(_))
            | OrchestratorError::Registry(RegistryError::NotFound(_)) => {
                AppError::NotFound(anyhow::anyhow!(message))
            }
            OrchestratorError::Store(StoreError::Expired(_))
            | OrchestratorError::Registry(RegistryError::Expired(_)) => {
                AppError::Gone(anyhow::anyhow!(message))
            }
            OrchestratorError::Registry(RegistryError::Busy(_))
            | OrchestratorError::NothingToNarrate(_) => AppError::Conflict(anyhow::anyhow!(message)),
            OrchestratorError::UnknownVersion { .. } => AppError::NotFound(anyhow::anyhow!(message)),
            other => match other.class() {
                ErrorClass::Input => AppError::BadRequest(anyhow::anyhow!(message)),
                ErrorClass::Capacity => AppError::TooManyRequests(message, Some(RETRY_AFTER_SECS)),
                ErrorClass::BackendTransient => AppError::BadGateway(message),
                ErrorClass::State => AppError::Conflict(anyhow::anyhow!(message)),
                ErrorClass::Internal => AppError::InternalError(anyhow::anyhow!(message)),
            },
        }
    }
}
