//! Per-profile analysis pipelines composed from backend capabilities.

mod currency;
mod document;
mod form;

pub use currency::CurrencyAnalyzer;
pub use document::DocumentAnalyzer;
pub use form::{associate_fields, FormAnalyzer};

use crate::backends::{BackendAdapter, BackendError};
use crate::models::{AnalysisHints, AnalysisPayload, AnalysisProfile, UnitImage};
use async_trait::async_trait;

/// Everything an analyzer needs about one unit.
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub index: usize,
    pub image: UnitImage,
    /// Text layer from the renderer, if any.
    pub text: Option<String>,
}

#[async_trait]
pub trait UnitAnalyzer: Send + Sync {
    fn profile(&self) -> AnalysisProfile;

    async fn analyze(
        &self,
        adapter: &BackendAdapter,
        unit: &UnitInput,
        hints: &AnalysisHints,
    ) -> Result<AnalysisPayload, BackendError>;
}

pub struct AnalyzerRegistry {
    analyzers: Vec<Box<dyn UnitAnalyzer>>,
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self {
            analyzers: vec![
                Box::new(FormAnalyzer::new()),
                Box::new(CurrencyAnalyzer::new()),
                Box::new(DocumentAnalyzer::new()),
            ],
        }
    }

    pub fn find(&self, profile: AnalysisProfile) -> Option<&dyn UnitAnalyzer> {
        self.analyzers
            .iter()
            .find(|analyzer| analyzer.profile() == profile)
            .map(|analyzer| analyzer.as_ref())
    }
}

pub(crate) fn language_name(code: &str) -> &str {
    match code {
        "ar" => "Arabic",
        "en" => "English",
        "fr" => "French",
        "ur" => "Urdu",
        other => other,
    }
}

/// Base instruction plus the response language and any user hint.
pub(crate) fn instruction(base: &str, hints: &AnalysisHints) -> String {
    let mut instruction = format!(
        "{} Respond in {}.",
        base,
        language_name(&hints.language)
    );
    if let Some(hint) = hints.hint.as_deref().filter(|hint| !hint.trim().is_empty()) {
        instruction.push_str(" Additional guidance from the user: ");
        instruction.push_str(hint.trim());
    }
    instruction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_profile() {
        let registry = AnalyzerRegistry::new();
        for profile in [
            AnalysisProfile::Form,
            AnalysisProfile::Currency,
            AnalysisProfile::Document,
        ] {
            assert_eq!(registry.find(profile).unwrap().profile(), profile);
        }
    }

    #[test]
    fn instruction_appends_language_and_hint() {
        let mut hints = AnalysisHints::new("ar");
        hints.hint = Some(" focus on the totals ".to_string());
        assert_eq!(
            instruction("Explain this page.", &hints),
            "Explain this page. Respond in Arabic. Additional guidance from the user: focus on the totals"
        );
        assert_eq!(
            instruction("Read it.", &AnalysisHints::new("de")),
            "Read it. Respond in de."
        );
    }
}
