use crate::models::ArtifactKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which reader pipeline analyzes the units of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisProfile {
    /// Field/box detection, OCR and an explanation of the form.
    Form,
    /// Banknote and coin reading.
    Currency,
    /// Per-page text and explanation of slides and PDFs.
    Document,
}

impl AnalysisProfile {
    pub fn default_for(kind: ArtifactKind) -> Self {
        if kind.is_paged() {
            AnalysisProfile::Document
        } else {
            AnalysisProfile::Form
        }
    }

    pub fn supports(self, kind: ArtifactKind) -> bool {
        match self {
            AnalysisProfile::Form | AnalysisProfile::Currency => !kind.is_paged(),
            AnalysisProfile::Document => true,
        }
    }
}

impl fmt::Display for AnalysisProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisProfile::Form => "form",
            AnalysisProfile::Currency => "currency",
            AnalysisProfile::Document => "document",
        };
        f.write_str(name)
    }
}

impl FromStr for AnalysisProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "form" => Ok(AnalysisProfile::Form),
            "currency" | "money" => Ok(AnalysisProfile::Currency),
            "document" => Ok(AnalysisProfile::Document),
            other => Err(format!("Invalid analysis profile: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Succeeded,
    /// The retry budget was exhausted on transient backend failures.
    Failed,
    /// The overall analysis deadline elapsed.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// True when the intersection covers more than `threshold` of the
    /// smaller of the two boxes.
    pub fn overlaps(&self, other: &BoundingBox, threshold: f32) -> bool {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        if right <= left || bottom <= top {
            return false;
        }

        let smaller = self.area().min(other.area());
        if smaller <= 0.0 {
            return false;
        }

        (right - left) * (bottom - top) / smaller > threshold
    }
}

/// A region reported by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

/// A piece of recognized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub confidence: f32,
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub field_type: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub value: Option<String>,
}

/// Kind-specific body of a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisPayload {
    Form {
        fields: Vec<FormField>,
        text: Vec<TextSpan>,
        explanation: String,
    },
    Currency {
        reading: String,
    },
    Page {
        text: String,
        explanation: String,
    },
}

impl AnalysisPayload {
    /// Text read aloud when the unit is narrated.
    pub fn narration(&self) -> &str {
        match self {
            AnalysisPayload::Form { explanation, .. } => explanation,
            AnalysisPayload::Currency { reading } => reading,
            AnalysisPayload::Page { text, explanation } => {
                if explanation.trim().is_empty() {
                    text
                } else {
                    explanation
                }
            }
        }
    }
}

/// Outcome of analyzing one unit version. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub profile: AnalysisProfile,
    pub unit: usize,
    pub version: u32,
    pub status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<AnalysisPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn succeeded(
        profile: AnalysisProfile,
        key: UnitVersion,
        payload: AnalysisPayload,
        attempts: u32,
    ) -> Self {
        Self {
            profile,
            unit: key.unit,
            version: key.version,
            status: AnalysisStatus::Succeeded,
            payload: Some(payload),
            error: None,
            attempts,
            analyzed_at: Utc::now(),
        }
    }

    pub fn failed(
        profile: AnalysisProfile,
        key: UnitVersion,
        status: AnalysisStatus,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            profile,
            unit: key.unit,
            version: key.version,
            status,
            payload: None,
            error: Some(error.into()),
            attempts,
            analyzed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AnalysisStatus::Succeeded
    }

    pub fn key(&self) -> UnitVersion {
        UnitVersion {
            unit: self.unit,
            version: self.version,
        }
    }
}

/// Cache address of an analysis: a unit index plus a version that is bumped
/// on every explicit reanalysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UnitVersion {
    pub unit: usize,
    pub version: u32,
}

impl UnitVersion {
    pub fn new(unit: usize, version: u32) -> Self {
        Self { unit, version }
    }
}

/// Parameters an analysis runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisHints {
    pub language: String,
    /// Free-form user guidance appended to the backend instruction.
    pub hint: Option<String>,
}

impl AnalysisHints {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            hint: None,
        }
    }
}

/// Synthesized narration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechClip {
    pub mime_type: String,
    pub audio: Vec<u8>,
    pub language: String,
}
