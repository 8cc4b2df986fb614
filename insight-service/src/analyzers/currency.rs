use crate::analyzers::{instruction, UnitAnalyzer, UnitInput};
use crate::backends::{BackendAdapter, BackendError, SummaryRequest};
use crate::models::{AnalysisHints, AnalysisPayload, AnalysisProfile};
use async_trait::async_trait;

const CURRENCY_INSTRUCTION: &str = "Identify the banknotes and coins in this image. \
For a single note or coin state its value; for several, state the total first and then \
the breakdown. Reply with the amount only, without greetings.";

#[derive(Default)]
pub struct CurrencyAnalyzer;

impl CurrencyAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UnitAnalyzer for CurrencyAnalyzer {
    fn profile(&self) -> AnalysisProfile {
        AnalysisProfile::Currency
    }

    async fn analyze(
        &self,
        adapter: &BackendAdapter,
        unit: &UnitInput,
        hints: &AnalysisHints,
    ) -> Result<AnalysisPayload, BackendError> {
        let reading = adapter
            .summarize(&SummaryRequest {
                instruction: instruction(CURRENCY_INSTRUCTION, hints),
                text: None,
                image: Some(unit.image.clone()),
                language: hints.language.clone(),
            })
            .await?;

        Ok(AnalysisPayload::Currency { reading })
    }
}
