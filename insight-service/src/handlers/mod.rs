pub mod health;
pub mod sessions;
pub mod speech;

pub use health::{health_check, list_formats, metrics_endpoint, readiness_check};
pub use sessions::{
    close_session, get_session, get_unit, navigate, reanalyze_unit, session_summary, unit_image,
    unit_speech, upload,
};
pub use speech::synthesize;
