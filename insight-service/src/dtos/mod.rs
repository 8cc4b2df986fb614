pub mod sessions;
pub mod speech;

pub use sessions::{
    FormatResponse, NavigateRequest, ReanalyzeRequest, SessionResponse, SummaryResponse,
    UnitQuery, UnitResponse, UnitState, UnitSummaryResponse,
};
pub use speech::SpeechRequest;
