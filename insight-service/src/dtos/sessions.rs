use crate::models::{AnalysisResult, ArtifactKind, Direction, Navigation, SessionView};
use crate::orchestrator::{SessionSummary, UnitOutcome};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: SessionView,
}

/// One unit's analysis together with the session state after the request.
#[derive(Debug, Serialize)]
pub struct UnitResponse {
    pub session: SessionView,
    pub unit: usize,
    pub version: u32,
    pub cached: bool,
    pub has_next: bool,
    pub has_previous: bool,
    pub result: AnalysisResult,
}

impl From<UnitOutcome> for UnitResponse {
    fn from(outcome: UnitOutcome) -> Self {
        let unit_count = outcome.session.unit_count;
        Self {
            unit: outcome.unit,
            version: outcome.result.version,
            cached: outcome.cached,
            has_next: outcome.unit + 1 < unit_count,
            has_previous: outcome.unit > 0,
            result: outcome.result.as_ref().clone(),
            session: outcome.session,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Analyzed,
    /// Not visited yet, or its last analysis failed.
    Pending,
}

#[derive(Debug, Serialize)]
pub struct UnitSummaryResponse {
    pub unit: usize,
    pub state: UnitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
}

/// Whole-session overview built from cached analyses only.
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub session: SessionView,
    pub analyzed: usize,
    pub pending: usize,
    pub narrative: Option<String>,
    pub units: Vec<UnitSummaryResponse>,
}

impl From<SessionSummary> for SummaryResponse {
    fn from(summary: SessionSummary) -> Self {
        let units: Vec<UnitSummaryResponse> = summary
            .units
            .into_iter()
            .map(|unit| UnitSummaryResponse {
                unit: unit.unit,
                state: if unit.result.is_some() {
                    UnitState::Analyzed
                } else {
                    UnitState::Pending
                },
                result: unit.result.map(|result| result.as_ref().clone()),
            })
            .collect();
        let analyzed = units
            .iter()
            .filter(|unit| unit.state == UnitState::Analyzed)
            .count();

        Self {
            session: summary.session,
            analyzed,
            pending: units.len() - analyzed,
            narrative: summary.narrative,
            units,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UnitQuery {
    pub version: Option<u32>,
}

/// Exactly one of `direction`, `index` or `command` must be given.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct NavigateRequest {
    pub direction: Option<Direction>,
    pub index: Option<i64>,
    #[validate(length(min = 1, max = 64, message = "Command must be 1-64 characters"))]
    pub command: Option<String>,
}

impl NavigateRequest {
    pub fn navigation(&self) -> Result<Navigation, String> {
        match (self.direction, self.index, self.command.as_deref()) {
            (Some(direction), None, None) => Ok(Navigation::Relative(direction)),
            (None, Some(index), None) => Ok(Navigation::Index(index)),
            (None, None, Some(command)) => command.parse(),
            (None, None, None) => {
                Err("One of direction, index or command is required".to_string())
            }
            _ => Err("Only one of direction, index or command may be given".to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReanalyzeRequest {
    #[validate(length(min = 2, max = 16, message = "Language must be a short language code"))]
    pub language: Option<String>,
    #[validate(length(max = 1000, message = "Hint cannot exceed 1000 characters"))]
    pub hint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FormatResponse {
    pub kind: ArtifactKind,
    pub description: &'static str,
    pub paged: bool,
    pub mime_types: &'static [&'static str],
    pub extensions: &'static [&'static str],
}

impl From<ArtifactKind> for FormatResponse {
    fn from(kind: ArtifactKind) -> Self {
        Self {
            kind,
            description: kind.description(),
            paged: kind.is_paged(),
            mime_types: kind.mime_types(),
            extensions: kind.extensions(),
        }
    }
}
