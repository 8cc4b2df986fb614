//! Upload and navigation workflows over the store, registry and backends.
//!
//! The orchestrator is the only place that decides between retrying and
//! surfacing a failure. Transient backend failures become a per-unit result
//! marked `failed` or `timed_out`; permanent ones propagate.

mod admission;
mod error;
mod retry;
mod sweeper;

pub use admission::{Admission, AdmissionGate};
pub use error::{ErrorClass, OrchestratorError};
pub use retry::{retry_backend_call, RetryPolicy};
pub use sweeper::spawn_sweeper;

use crate::analyzers::{AnalyzerRegistry, UnitInput};
use crate::backends::{BackendAdapter, BackendStatus, Capability, HealthRecord};
use crate::models::{
    image_mime_type, AnalysisHints, AnalysisProfile, AnalysisResult, AnalysisStatus, ArtifactKind,
    ArtifactRef, Navigation, SessionId, SessionView, SpeechClip, UnitImage, UnitSource,
    UnitVersion,
};
use crate::services::{ArtifactStore, StoreError};
use crate::sessions::{NewSession, SessionGuard, SessionRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_units: usize,
    /// Bound on the rendered page bytes one session keeps in memory.
    pub max_rendered_bytes: usize,
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    /// Bound on one unit analysis including every retry.
    pub analysis_deadline: Duration,
    pub default_language: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_units: 100,
            max_rendered_bytes: 200 * 1024 * 1024,
            max_in_flight: 32,
            retry: RetryPolicy::default(),
            analysis_deadline: Duration::from_secs(90),
            default_language: "ar".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    /// Kind name, MIME type, extension or file name.
    pub declared_kind: String,
    pub profile: Option<AnalysisProfile>,
    pub language: Option<String>,
}

/// A unit's analysis as seen by a client.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub session: SessionView,
    pub unit: usize,
    pub result: Arc<AnalysisResult>,
    /// Served from the session cache without a backend call.
    pub cached: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Reanalysis {
    pub language: Option<String>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnitSpeech {
    pub unit: usize,
    pub version: u32,
    pub clip: Arc<SpeechClip>,
}

/// Every unit's latest cached analysis, gathered without calling a backend.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: SessionView,
    pub units: Vec<UnitSummary>,
    /// Narrations of the analyzed units in unit order.
    pub narrative: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnitSummary {
    pub unit: usize,
    /// `None` until the unit has a successful analysis.
    pub result: Option<Arc<AnalysisResult>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub backend: String,
    #[serde(flatten)]
    pub record: HealthRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: BackendStatus,
    pub backends: BTreeMap<Capability, BackendHealth>,
    pub active_sessions: usize,
    pub staged_artifacts: usize,
    pub in_flight: usize,
}

pub struct Orchestrator {
    store: Arc<ArtifactStore>,
    registry: Arc<SessionRegistry>,
    adapter: Arc<BackendAdapter>,
    analyzers: AnalyzerRegistry,
    gate: AdmissionGate,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ArtifactStore>,
        registry: Arc<SessionRegistry>,
        adapter: Arc<BackendAdapter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            adapter,
            analyzers: AnalyzerRegistry::new(),
            gate: AdmissionGate::new(config.max_in_flight),
            config,
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Stages an artifact, splits it into units, opens a session and
    /// analyzes the first unit. Nothing is left behind when this fails.
    #[tracing::instrument(skip_all, fields(kind = %request.declared_kind))]
    pub async fn upload(&self, request: UploadRequest) -> Result<UnitOutcome, OrchestratorError> {
        let admission = self.gate.try_admit()?;

        let kind = ArtifactKind::from_declared(&request.declared_kind)
            .ok_or_else(|| StoreError::UnsupportedKind(request.declared_kind.clone()))?;
        let profile = request
            .profile
            .unwrap_or_else(|| AnalysisProfile::default_for(kind));
        if !profile.supports(kind) {
            return Err(OrchestratorError::ProfileMismatch { profile, kind });
        }
        let language = request
            .language
            .filter(|language| !language.trim().is_empty())
            .unwrap_or_else(|| self.config.default_language.clone());

        let artifact = self
            .store
            .put(request.bytes, &request.declared_kind)
            .await
            .inspect_err(|_| record_upload("rejected"))?;

        let units = match self.decompose(&artifact).await {
            Ok(units) => units,
            Err(err) => {
                self.store.release(&artifact).await;
                record_upload("failed");
                return Err(err);
            }
        };
        let unit_count = units.len();

        let id = match self
            .registry
            .create(NewSession {
                artifact: artifact.clone(),
                profile,
                language: language.clone(),
                units,
            })
            .await
        {
            Ok(id) => id,
            Err(err) => {
                self.store.release(&artifact).await;
                record_upload("failed");
                return Err(err.into());
            }
        };

        tracing::info!(
            session_id = %id,
            artifact_id = %artifact.id,
            kind = %kind,
            profile = %profile,
            unit_count,
            "Session created"
        );

        let hints = AnalysisHints::new(language);
        let first = self
            .registry
            .with_session(&id, |mut session| async move {
                let key = UnitVersion::new(0, 0);
                let (result, cached) = self
                    .analyze_cached(&mut session, key, &hints, Some(&admission))
                    .await?;
                Ok::<_, OrchestratorError>(UnitOutcome {
                    session: session.view(),
                    unit: 0,
                    result,
                    cached,
                })
            })
            .await
            .map_err(OrchestratorError::from)
            .and_then(|outcome| outcome);

        match first {
            Ok(outcome) => {
                record_upload("success");
                Ok(outcome)
            }
            Err(err) => {
                // The session was never handed out; do not leave it behind.
                let _ = self.registry.close(&id).await;
                record_upload("failed");
                Err(err)
            }
        }
    }

    pub fn session(&self, id: &SessionId) -> Result<SessionView, OrchestratorError> {
        Ok(self.registry.get(id)?)
    }

    /// Moves the cursor (clamped) and returns the analysis of the unit it
    /// lands on, analyzing lazily on a cache miss. The cursor only moves
    /// when the request succeeds; a unit whose analysis failed still counts.
    #[tracing::instrument(skip(self), fields(session_id = %id))]
    pub async fn navigate(
        &self,
        id: &SessionId,
        navigation: Navigation,
    ) -> Result<UnitOutcome, OrchestratorError> {
        self.registry
            .with_session(id, |mut session| async move {
                let unit = session.resolve(navigation);
                let key = UnitVersion::new(unit, session.current_version(unit));
                let hints = AnalysisHints::new(session.language());
                let (result, cached) = self.analyze_cached(&mut session, key, &hints, None).await?;
                session.set_cursor(unit);
                Ok::<_, OrchestratorError>(UnitOutcome {
                    session: session.view(),
                    unit,
                    result,
                    cached,
                })
            })
            .await?
    }

    /// Reads one unit, latest version unless `version` is given. Unlike
    /// `navigate`, an out-of-range index is an input error.
    #[tracing::instrument(skip(self), fields(session_id = %id))]
    pub async fn unit(
        &self,
        id: &SessionId,
        index: usize,
        version: Option<u32>,
    ) -> Result<UnitOutcome, OrchestratorError> {
        self.registry
            .with_session(id, |mut session| async move {
                check_index(&session, index)?;

                let current = session.current_version(index);
                let version = version.unwrap_or(current);
                let key = UnitVersion::new(index, version);
                if version > current || (version > 0 && session.cached(key).is_none()) {
                    return Err(OrchestratorError::UnknownVersion {
                        unit: index,
                        version,
                    });
                }

                let hints = AnalysisHints::new(session.language());
                let (result, cached) = self.analyze_cached(&mut session, key, &hints, None).await?;
                session.set_cursor(index);
                Ok::<_, OrchestratorError>(UnitOutcome {
                    session: session.view(),
                    unit: index,
                    result,
                    cached,
                })
            })
            .await?
    }

    /// Analyzes a unit again with new hints. A success is stored as the
    /// unit's next version; earlier versions stay readable.
    #[tracing::instrument(skip(self, reanalysis), fields(session_id = %id))]
    pub async fn reanalyze(
        &self,
        id: &SessionId,
        index: usize,
        reanalysis: Reanalysis,
    ) -> Result<UnitOutcome, OrchestratorError> {
        self.registry
            .with_session(id, |mut session| async move {
                check_index(&session, index)?;

                let key = UnitVersion::new(index, session.current_version(index) + 1);
                let language = reanalysis
                    .language
                    .filter(|language| !language.trim().is_empty())
                    .unwrap_or_else(|| session.language().to_string());
                let hints = AnalysisHints {
                    language,
                    hint: reanalysis.hint,
                };

                let (result, cached) = self.analyze_cached(&mut session, key, &hints, None).await?;
                session.set_cursor(index);
                Ok::<_, OrchestratorError>(UnitOutcome {
                    session: session.view(),
                    unit: index,
                    result,
                    cached,
                })
            })
            .await?
    }

    /// Narration of a unit's latest analysis, synthesized once per version.
    #[tracing::instrument(skip(self), fields(session_id = %id))]
    pub async fn speak_unit(
        &self,
        id: &SessionId,
        index: usize,
    ) -> Result<UnitSpeech, OrchestratorError> {
        self.registry
            .with_session(id, |mut session| async move {
                check_index(&session, index)?;

                let key = UnitVersion::new(index, session.current_version(index));
                if let Some(clip) = session.cached_speech(key) {
                    return Ok::<_, OrchestratorError>(UnitSpeech {
                        unit: index,
                        version: key.version,
                        clip,
                    });
                }

                let hints = AnalysisHints::new(session.language());
                let (result, _) = self.analyze_cached(&mut session, key, &hints, None).await?;
                let narration = result
                    .payload
                    .as_ref()
                    .filter(|_| result.is_success())
                    .map(|payload| payload.narration().trim().to_string())
                    .filter(|text| !text.is_empty())
                    .ok_or(OrchestratorError::NothingToNarrate(index))?;

                let clip = self.speak(&narration, session.language(), None).await?;
                let clip = session.record_speech(key, clip)?;
                Ok::<_, OrchestratorError>(UnitSpeech {
                    unit: index,
                    version: key.version,
                    clip,
                })
            })
            .await?
    }

    /// Image bytes a unit is analyzed from: the rendered page, or the
    /// uploaded image itself.
    #[tracing::instrument(skip(self), fields(session_id = %id))]
    pub async fn unit_image(
        &self,
        id: &SessionId,
        index: usize,
    ) -> Result<UnitImage, OrchestratorError> {
        self.registry
            .with_session(id, |session| async move {
                check_index(&session, index)?;
                let input = self.unit_input(&session, index).await?;
                Ok::<_, OrchestratorError>(input.image)
            })
            .await?
    }

    /// Combines the cached analyses of a session. Units that were never
    /// visited stay unanalyzed.
    #[tracing::instrument(skip(self), fields(session_id = %id))]
    pub async fn summary(&self, id: &SessionId) -> Result<SessionSummary, OrchestratorError> {
        let summary = self
            .registry
            .with_session(id, |session| async move {
                let units: Vec<UnitSummary> = (0..session.unit_count())
                    .map(|unit| {
                        let key = UnitVersion::new(unit, session.current_version(unit));
                        UnitSummary {
                            unit,
                            result: session.cached(key),
                        }
                    })
                    .collect();

                let narrations: Vec<&str> = units
                    .iter()
                    .filter_map(|summary| summary.result.as_ref())
                    .filter_map(|result| result.payload.as_ref())
                    .map(|payload| payload.narration().trim())
                    .filter(|text| !text.is_empty())
                    .collect();
                let narrative = (!narrations.is_empty()).then(|| narrations.join("\n\n"));

                SessionSummary {
                    session: session.view(),
                    units,
                    narrative,
                }
            })
            .await?;
        Ok(summary)
    }

    /// Stateless text-to-speech.
    pub async fn synthesize(
        &self,
        text: &str,
        language: Option<&str>,
    ) -> Result<SpeechClip, OrchestratorError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "Text to synthesize is empty".to_string(),
            ));
        }
        let language = language
            .filter(|language| !language.trim().is_empty())
            .unwrap_or(self.config.default_language.as_str());
        self.speak(text, language, None).await
    }

    pub async fn close(&self, id: &SessionId) -> Result<(), OrchestratorError> {
        self.registry.close(id).await?;
        tracing::info!(session_id = %id, "Session closed");
        Ok(())
    }

    /// Last observed backend state. Never calls a backend.
    pub fn health(&self) -> HealthReport {
        let board = self.adapter.health();
        let backends = board
            .snapshot()
            .into_iter()
            .map(|(capability, record)| {
                (
                    capability,
                    BackendHealth {
                        backend: self.adapter.backends().name_of(capability).to_string(),
                        record,
                    },
                )
            })
            .collect();

        HealthReport {
            status: board.overall(),
            backends,
            active_sessions: self.registry.len(),
            staged_artifacts: self.store.staged_count(),
            in_flight: self.gate.in_flight(),
        }
    }

    async fn decompose(&self, artifact: &ArtifactRef) -> Result<Vec<UnitSource>, OrchestratorError> {
        if !artifact.kind.is_paged() {
            return Ok(vec![UnitSource::Artifact]);
        }

        let document = self.store.get(artifact).await?;
        let adapter = self.adapter.as_ref();
        let document = document.as_slice();
        let kind = artifact.kind;
        let pages = retry_backend_call(&self.config.retry, "render", move || {
            adapter.render(document, kind)
        })
        .await?;

        if pages.is_empty() {
            return Err(OrchestratorError::NoUnits);
        }
        if pages.len() > self.config.max_units {
            return Err(OrchestratorError::TooManyUnits {
                count: pages.len(),
                max: self.config.max_units,
            });
        }
        let size: usize = pages.iter().map(|page| page.image.bytes.len()).sum();
        if size > self.config.max_rendered_bytes {
            return Err(OrchestratorError::RenderedTooLarge {
                size,
                max: self.config.max_rendered_bytes,
            });
        }

        Ok(pages.into_iter().map(UnitSource::Page).collect())
    }

    async fn unit_input(
        &self,
        session: &SessionGuard,
        index: usize,
    ) -> Result<UnitInput, OrchestratorError> {
        match session.unit(index) {
            Some(UnitSource::Page(page)) => Ok(UnitInput {
                index,
                image: page.image.clone(),
                text: page.text.clone(),
            }),
            Some(UnitSource::Artifact) => {
                let bytes = self.store.get(session.artifact()).await?;
                let mime_type = image_mime_type(&bytes);
                Ok(UnitInput {
                    index,
                    image: UnitImage::new(bytes, mime_type),
                    text: None,
                })
            }
            None => Err(OrchestratorError::InvalidUnit {
                index,
                unit_count: session.unit_count(),
            }),
        }
    }

    /// Returns the cached result for `key`, or runs the analysis. Only
    /// successes are cached, so a failed unit is retried on the next visit.
    async fn analyze_cached(
        &self,
        session: &mut SessionGuard,
        key: UnitVersion,
        hints: &AnalysisHints,
        admission: Option<&Admission>,
    ) -> Result<(Arc<AnalysisResult>, bool), OrchestratorError> {
        if let Some(result) = session.cached(key) {
            tracing::debug!(unit = key.unit, version = key.version, "Serving cached analysis");
            return Ok((result, true));
        }

        let _admission = match admission {
            Some(_) => None,
            None => Some(self.gate.try_admit()?),
        };

        let input = self.unit_input(session, key.unit).await?;
        let result = self.run_analysis(session.profile(), key, &input, hints).await?;

        let result = if result.is_success() {
            session.record(result)?
        } else {
            Arc::new(result)
        };
        Ok((result, false))
    }

    async fn run_analysis(
        &self,
        profile: AnalysisProfile,
        key: UnitVersion,
        input: &UnitInput,
        hints: &AnalysisHints,
    ) -> Result<AnalysisResult, OrchestratorError> {
        let analyzer = self.analyzers.find(profile).ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("No analyzer for profile {}", profile))
        })?;

        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let adapter = self.adapter.as_ref();
        let run = retry_backend_call(&self.config.retry, "analyze", move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            analyzer.analyze(adapter, input, hints)
        });

        let result = match tokio::time::timeout(self.config.analysis_deadline, run).await {
            Ok(Ok(payload)) => {
                AnalysisResult::succeeded(profile, key, payload, counter.load(Ordering::SeqCst))
            }
            Ok(Err(err)) if err.is_transient() => AnalysisResult::failed(
                profile,
                key,
                AnalysisStatus::Failed,
                err.to_string(),
                counter.load(Ordering::SeqCst),
            ),
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => AnalysisResult::failed(
                profile,
                key,
                AnalysisStatus::TimedOut,
                format!(
                    "Analysis did not finish within {:?}",
                    self.config.analysis_deadline
                ),
                counter.load(Ordering::SeqCst),
            ),
        };

        let status = match result.status {
            AnalysisStatus::Succeeded => "succeeded",
            AnalysisStatus::Failed => "failed",
            AnalysisStatus::TimedOut => "timed_out",
        };
        metrics::counter!(
            "analyses_total",
            "profile" => profile.to_string(),
            "status" => status
        )
        .increment(1);
        tracing::info!(
            unit = key.unit,
            version = key.version,
            profile = %profile,
            status,
            attempts = result.attempts,
            "Unit analyzed"
        );

        Ok(result)
    }

    async fn speak(
        &self,
        text: &str,
        language: &str,
        admission: Option<&Admission>,
    ) -> Result<SpeechClip, OrchestratorError> {
        let _admission = match admission {
            Some(_) => None,
            None => Some(self.gate.try_admit()?),
        };
        let adapter = self.adapter.as_ref();
        let clip = retry_backend_call(&self.config.retry, "synthesize", move || {
            adapter.synthesize_speech(text, language)
        })
        .await?;
        Ok(clip)
    }
}

fn check_index(session: &SessionGuard, index: usize) -> Result<(), OrchestratorError> {
    if index >= session.unit_count() {
        return Err(OrchestratorError::InvalidUnit {
            index,
            unit_count: session.unit_count(),
        });
    }
    Ok(())
}

fn record_upload(outcome: &'static str) {
    metrics::counter!("uploads_total", "outcome" => outcome).increment(1);
}
