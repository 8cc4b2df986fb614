use crate::models::{AnalysisProfile, ArtifactKind, RenderedPage};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque session token: 256 random bits, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the bytes of a unit come from.
#[derive(Debug, Clone)]
pub enum UnitSource {
    /// The staged artifact itself (single images).
    Artifact,
    /// A page rendered from a paged document.
    Page(RenderedPage),
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub artifact_id: Uuid,
    pub kind: ArtifactKind,
    pub profile: AnalysisProfile,
    pub language: String,
    pub unit_count: usize,
    pub cursor: usize,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Previous,
    First,
    Last,
}

/// A cursor move. Every target is clamped to the session's units; there is
/// no wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Relative(Direction),
    /// Absolute 0-based index; out-of-range values clamp.
    Index(i64),
}

impl Navigation {
    pub fn resolve(self, cursor: usize, unit_count: usize) -> usize {
        let last = unit_count.saturating_sub(1);
        match self {
            Navigation::Relative(Direction::Next) => cursor.saturating_add(1).min(last),
            Navigation::Relative(Direction::Previous) => cursor.saturating_sub(1).min(last),
            Navigation::Relative(Direction::First) => 0,
            Navigation::Relative(Direction::Last) => last,
            Navigation::Index(index) => {
                if index <= 0 {
                    0
                } else {
                    usize::try_from(index).unwrap_or(usize::MAX).min(last)
                }
            }
        }
    }
}

/// Spoken or typed navigation commands, in English or Arabic. Bare numbers
/// are 1-based page numbers.
impl FromStr for Navigation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = s.trim().to_lowercase();
        let navigation = match command.as_str() {
            "next" | "التالي" | "التالية" => Navigation::Relative(Direction::Next),
            "previous" | "prev" | "السابق" | "السابقة" => {
                Navigation::Relative(Direction::Previous)
            }
            "first" | "الأول" | "البداية" => Navigation::Relative(Direction::First),
            "last" | "الأخير" | "النهاية" => Navigation::Relative(Direction::Last),
            other => match parse_page_number(other) {
                Some(page) => Navigation::Index(page.saturating_sub(1)),
                None => return Err(format!("Unknown navigation command: {}", other)),
            },
        };
        Ok(navigation)
    }
}

/// Parses Western or Arabic-Indic digits.
fn parse_page_number(input: &str) -> Option<i64> {
    let normalized: String = input
        .chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            _ => c,
        })
        .collect();
    normalized.parse().ok()
}
